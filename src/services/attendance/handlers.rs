//! Work-day transitions
//!
//! Pure functions of the current state, the wall-clock time and the schedule.
//! They decide what should happen; the machine in `mod.rs` performs it.

use crate::domain::types::{Action, ActionOutcome, ProximityTick, TodayStatus, NEVER_DETECTED, UNREGISTERED};
use crate::infra::config::Config;
use chrono::{NaiveDateTime, Timelike};
use tracing::{debug, info};

/// Time-of-day policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub work_start_hour: u32,
    pub work_start_end_hour: u32,
    pub work_start_end_minute: u32,
    pub work_end_hour: u32,
    pub forced_checkout_hour: u32,
    pub absence_threshold_mins: u64,
}

impl Schedule {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_start_hour: config.work_start_hour(),
            work_start_end_hour: config.work_start_end_hour(),
            work_start_end_minute: config.work_start_end_minute(),
            work_end_hour: config.work_end_hour(),
            forced_checkout_hour: config.forced_checkout_hour(),
            absence_threshold_mins: config.absence_threshold_mins(),
        }
    }

    /// From the start hour up to and including the end hour:minute cutoff
    pub fn in_start_window(&self, now: NaiveDateTime) -> bool {
        let (hour, minute) = (now.hour(), now.minute());
        (hour >= self.work_start_hour && hour < self.work_start_end_hour)
            || (hour == self.work_start_end_hour && minute <= self.work_start_end_minute)
    }
}

/// Why a check-out was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Presence,
    Manual,
    Absence,
    Forced,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Presence => "presence",
            Trigger::Manual => "manual",
            Trigger::Absence => "absence",
            Trigger::Forced => "forced",
        }
    }
}

/// What to do with the absence monitor after an outcome is applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorChange {
    Start,
    Stop,
    Keep,
}

/// The day's mutable state; reset wholesale at midnight
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkDayState {
    pub is_work_started: bool,
    pub forced_checkout_done: bool,
    /// True for the lifetime of exactly one check-out invocation
    pub is_checkout_in_progress: bool,
    pub last_observed_quality: Option<i32>,
    pub last_observed_at: Option<NaiveDateTime>,
    pub check_in_time: Option<String>,
    pub check_out_time: Option<String>,
}

impl WorkDayState {
    /// Record a tick; true when it should start the work day
    pub fn on_tick(&mut self, tick: &ProximityTick, schedule: &Schedule) -> bool {
        let starts_day = !self.is_work_started
            && tick.signal_quality != self.last_observed_quality
            && schedule.in_start_window(tick.observed_at);

        if starts_day {
            info!(
                device = %tick.device_id,
                quality = ?tick.signal_quality,
                at = %tick.observed_at,
                "work_day_detected"
            );
            // Set before the check-in settles so later ticks cannot trigger another
            self.is_work_started = true;
        }

        self.last_observed_quality = tick.signal_quality;
        self.on_sighting(tick.observed_at);
        starts_day
    }

    /// Record that the device was seen; never moves the time backwards
    pub fn on_sighting(&mut self, at: NaiveDateTime) {
        if self.last_observed_at.map_or(true, |last| at > last) {
            self.last_observed_at = Some(at);
        }
    }

    /// Periodic absence check; returns the check-out to request, if any
    pub fn on_absence_check(&mut self, now: NaiveDateTime, schedule: &Schedule) -> Option<Trigger> {
        if now.hour() < schedule.work_end_hour {
            return None;
        }
        // The forced check-out is the day's last automatic attempt
        if self.forced_checkout_done {
            return None;
        }

        let minutes_absent = self.minutes_absent(now);
        debug!(minutes_absent = ?minutes_absent, "absence_check");

        if now.hour() >= schedule.forced_checkout_hour {
            info!(hour = %now.hour(), "forced_checkout_due");
            self.forced_checkout_done = true;
            return Some(Trigger::Forced);
        }

        match minutes_absent {
            Some(minutes) if minutes < schedule.absence_threshold_mins as i64 => None,
            _ => {
                info!(minutes_absent = ?minutes_absent, "absence_threshold_reached");
                Some(Trigger::Absence)
            }
        }
    }

    /// `None` when the device was never observed
    pub fn minutes_absent(&self, now: NaiveDateTime) -> Option<i64> {
        self.last_observed_at.map(|at| (now - at).num_minutes())
    }

    /// Claim the check-out slot; false if one is already in flight
    pub fn begin_checkout(&mut self) -> bool {
        if self.is_checkout_in_progress {
            return false;
        }
        self.is_checkout_in_progress = true;
        true
    }

    /// Fold a finished action into the state
    pub fn apply_outcome(&mut self, action: Action, outcome: &ActionOutcome) -> MonitorChange {
        if let ActionOutcome::Success(times) = outcome {
            if let Some(time) = times.get(action) {
                match action {
                    Action::CheckIn => self.check_in_time = Some(time.to_string()),
                    Action::CheckOut => self.check_out_time = Some(time.to_string()),
                }
            }
        }

        match action {
            Action::CheckIn if outcome.is_settled() => {
                self.is_work_started = true;
                MonitorChange::Start
            }
            Action::CheckIn => MonitorChange::Keep,
            Action::CheckOut => {
                self.is_checkout_in_progress = false;
                if outcome.is_settled() {
                    MonitorChange::Stop
                } else {
                    MonitorChange::Keep
                }
            }
        }
    }

    pub fn status(&self) -> TodayStatus {
        TodayStatus {
            is_work_started: self.is_work_started,
            check_in_time: self.check_in_time.clone().unwrap_or_else(|| UNREGISTERED.to_string()),
            check_out_time: self.check_out_time.clone().unwrap_or_else(|| UNREGISTERED.to_string()),
            last_detected: self
                .last_observed_at
                .map(|at| at.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| NEVER_DETECTED.to_string()),
            last_signal_quality: self.last_observed_quality,
        }
    }
}
