//! Lock-free metrics collection and periodic reporting
//!
//! Uses atomics for every counter so the observer, the state machine and the
//! action tasks can record without contention.
//!
//! All atomics use Relaxed ordering: these are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::types::{Action, ActionOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Raw records read from the proximity source (monotonic)
    records_total: AtomicU64,
    /// Records that mentioned the tracked device (monotonic)
    records_matched: AtomicU64,
    /// De-duplicated ticks emitted to the state machine (monotonic)
    ticks_emitted: AtomicU64,
    /// Proximity source restarts, forced or after termination (monotonic)
    source_restarts: AtomicU64,
    /// Individual action attempts, including retries (monotonic)
    action_attempts: AtomicU64,
    /// Final outcomes by kind (monotonic)
    check_in_success: AtomicU64,
    check_out_success: AtomicU64,
    already_done: AtomicU64,
    action_failed: AtomicU64,
    /// Check-out requests rejected by the in-flight guard (monotonic)
    checkout_rejected: AtomicU64,
    started_at: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            records_total: AtomicU64::new(0),
            records_matched: AtomicU64::new(0),
            ticks_emitted: AtomicU64::new(0),
            source_restarts: AtomicU64::new(0),
            action_attempts: AtomicU64::new(0),
            check_in_success: AtomicU64::new(0),
            check_out_success: AtomicU64::new(0),
            already_done: AtomicU64::new(0),
            action_failed: AtomicU64::new(0),
            checkout_rejected: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn record_raw_record(&self, matched: bool) {
        self.records_total.fetch_add(1, Ordering::Relaxed);
        if matched {
            self.records_matched.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub fn record_tick(&self) {
        self.ticks_emitted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_source_restart(&self) {
        self.source_restarts.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_action_attempt(&self) {
        self.action_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome(&self, action: Action, outcome: &ActionOutcome) {
        let counter = match (action, outcome) {
            (Action::CheckIn, ActionOutcome::Success(_)) => &self.check_in_success,
            (Action::CheckOut, ActionOutcome::Success(_)) => &self.check_out_success,
            (_, ActionOutcome::AlreadyDone) => &self.already_done,
            (_, ActionOutcome::Failed(_)) => &self.action_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_checkout_rejected(&self) {
        self.checkout_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsSummary {
        MetricsSummary {
            records_total: self.records_total.load(Ordering::Relaxed),
            records_matched: self.records_matched.load(Ordering::Relaxed),
            ticks_emitted: self.ticks_emitted.load(Ordering::Relaxed),
            source_restarts: self.source_restarts.load(Ordering::Relaxed),
            action_attempts: self.action_attempts.load(Ordering::Relaxed),
            check_in_success: self.check_in_success.load(Ordering::Relaxed),
            check_out_success: self.check_out_success.load(Ordering::Relaxed),
            already_done: self.already_done.load(Ordering::Relaxed),
            action_failed: self.action_failed.load(Ordering::Relaxed),
            checkout_rejected: self.checkout_rejected.load(Ordering::Relaxed),
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

/// Point-in-time snapshot of all counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub records_total: u64,
    pub records_matched: u64,
    pub ticks_emitted: u64,
    pub source_restarts: u64,
    pub action_attempts: u64,
    pub check_in_success: u64,
    pub check_out_success: u64,
    pub already_done: u64,
    pub action_failed: u64,
    pub checkout_rejected: u64,
    pub uptime_secs: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            records = %self.records_total,
            matched = %self.records_matched,
            ticks = %self.ticks_emitted,
            source_restarts = %self.source_restarts,
            attempts = %self.action_attempts,
            check_ins = %self.check_in_success,
            check_outs = %self.check_out_success,
            already_done = %self.already_done,
            failed = %self.action_failed,
            rejected = %self.checkout_rejected,
            uptime_secs = %self.uptime_secs,
            "metrics"
        );
    }
}
