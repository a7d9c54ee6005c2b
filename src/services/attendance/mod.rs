//! Attendance state machine
//!
//! Owns the work day and is its only writer. Every entry point (presence
//! ticks, manual requests, action completions, the absence monitor and the
//! midnight reset) is a branch of one `select!` loop, so handlers never
//! interleave. Actions run in spawned tasks and report back through a
//! channel; ticks keep being recorded while an action is in flight.
//!
//! - Idle -> Working: a new-quality tick inside the start window triggers a
//!   check-in; once it settles the absence monitor starts
//! - Working -> Idle: a settled check-out (absence, forced or manual) stops
//!   the monitor
//! - Midnight: everything but the check-out guard resets and the timer
//!   re-arms for the next midnight
//!
//! Ticks only drive the check-in decision. Absence is measured from the
//! sightings channel, which carries the time of every matching record.

mod handlers;

pub use handlers::{MonitorChange, Schedule, Trigger, WorkDayState};

use crate::domain::types::{
    Action, ActionOutcome, AttendanceTimes, PageElement, ProximityTick, RequestOutcome, TodayStatus,
};
use crate::infra::clock::{until_next_midnight, Clock};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::notify::{Notification, Notifier};
use crate::services::executor::{ActionError, AttendanceActions};
use crate::services::signal::SignalTier;
use chrono::NaiveDateTime;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("attendance state machine is not running")]
    Stopped,
    #[error(transparent)]
    Action(#[from] ActionError),
}

enum Command {
    Perform { action: Action, reply: oneshot::Sender<RequestOutcome> },
    Status { reply: oneshot::Sender<TodayStatus> },
}

struct Completion {
    action: Action,
    trigger: Trigger,
    outcome: ActionOutcome,
    /// Day the action was started on; stale completions do not touch state
    day: u64,
    reply: Option<oneshot::Sender<RequestOutcome>>,
}

/// Cloneable entry point for manual requests
#[derive(Clone)]
pub struct AttendanceHandle {
    commands: mpsc::Sender<Command>,
    actions: Arc<dyn AttendanceActions>,
}

impl AttendanceHandle {
    pub async fn check_in(&self) -> Result<RequestOutcome, HandleError> {
        self.perform(Action::CheckIn).await
    }

    /// Returns `RequestOutcome::InProgress` if a check-out is already running
    pub async fn check_out(&self) -> Result<RequestOutcome, HandleError> {
        self.perform(Action::CheckOut).await
    }

    async fn perform(&self, action: Action) -> Result<RequestOutcome, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::Perform { action, reply })
            .await
            .map_err(|_| HandleError::Stopped)?;
        rx.await.map_err(|_| HandleError::Stopped)
    }

    pub async fn today_status(&self) -> Result<TodayStatus, HandleError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(Command::Status { reply }).await.map_err(|_| HandleError::Stopped)?;
        rx.await.map_err(|_| HandleError::Stopped)
    }

    /// Uncached read straight from the remote system
    pub async fn actual_times(&self) -> Result<AttendanceTimes, HandleError> {
        Ok(self.actions.actual_times().await?)
    }

    /// Attendance controls and time fields as they appear on the page now
    pub async fn page_elements(&self) -> Result<Vec<PageElement>, HandleError> {
        Ok(self.actions.page_elements().await?)
    }
}

pub struct AttendanceMachine {
    state: WorkDayState,
    schedule: Schedule,
    absence_interval: Duration,
    /// Absence monitor; `None` while Idle
    monitor: Option<Interval>,
    /// Bumped at every midnight reset
    day: u64,
    actions: Arc<dyn AttendanceActions>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
    commands: mpsc::Receiver<Command>,
    completion_tx: mpsc::Sender<Completion>,
    completion_rx: mpsc::Receiver<Completion>,
}

impl AttendanceMachine {
    pub fn new(
        config: &Config,
        actions: Arc<dyn AttendanceActions>,
        notifier: Arc<dyn Notifier>,
        clock: Arc<dyn Clock>,
        metrics: Arc<Metrics>,
    ) -> (Self, AttendanceHandle) {
        let (command_tx, commands) = mpsc::channel(32);
        let (completion_tx, completion_rx) = mpsc::channel(32);
        let handle = AttendanceHandle { commands: command_tx, actions: actions.clone() };
        let machine = Self {
            state: WorkDayState::default(),
            schedule: Schedule::from_config(config),
            absence_interval: config.absence_check_interval(),
            monitor: None,
            day: 0,
            actions,
            notifier,
            clock,
            metrics,
            commands,
            completion_tx,
            completion_rx,
        };
        (machine, handle)
    }

    /// Run until shutdown
    pub async fn run(
        mut self,
        mut tick_rx: mpsc::Receiver<ProximityTick>,
        mut sightings: watch::Receiver<Option<NaiveDateTime>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let midnight = tokio::time::sleep(until_next_midnight(self.clock.now()));
        tokio::pin!(midnight);
        let mut ticks_open = true;
        let mut sightings_open = true;

        info!(
            start_hour = %self.schedule.work_start_hour,
            end_hour = %self.schedule.work_end_hour,
            forced_hour = %self.schedule.forced_checkout_hour,
            "attendance_machine_started"
        );

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("attendance_machine_shutdown");
                        return;
                    }
                }
                tick = tick_rx.recv(), if ticks_open => match tick {
                    Some(tick) => self.handle_tick(tick),
                    None => {
                        info!("tick_channel_closed");
                        ticks_open = false;
                    }
                },
                seen = sightings.changed(), if sightings_open => match seen {
                    Ok(()) => {
                        let seen_at = *sightings.borrow_and_update();
                        if let Some(seen_at) = seen_at {
                            self.handle_sighting(seen_at);
                        }
                    }
                    Err(_) => sightings_open = false,
                },
                Some(command) = self.commands.recv() => self.handle_command(command),
                Some(completion) = self.completion_rx.recv() => self.handle_completion(completion),
                _ = next_absence_check(&mut self.monitor) => self.handle_absence_check(),
                _ = &mut midnight => {
                    let next = self.handle_midnight();
                    midnight.as_mut().reset(Instant::now() + next);
                }
            }
        }
    }

    fn handle_tick(&mut self, tick: ProximityTick) {
        if !self.state.on_tick(&tick, &self.schedule) {
            return;
        }
        let tier = SignalTier::classify(tick.signal_quality);
        let quality = tick.signal_quality.map_or_else(|| "?".to_string(), |q| q.to_string());
        self.notify(
            Notification::new("Check-in", "Device detected, registering check-in")
                .with_subtitle(format!("RSSI {quality} ({tier})")),
        );
        self.dispatch(Action::CheckIn, Trigger::Presence, None);
    }

    fn handle_sighting(&mut self, seen_at: NaiveDateTime) {
        // A sighting from before the last reset belongs to the previous day
        if seen_at.date() == self.clock.now().date() {
            self.state.on_sighting(seen_at);
        }
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Perform { action, reply } => {
                info!(action = %action, "manual_request");
                self.dispatch(action, Trigger::Manual, Some(reply));
            }
            Command::Status { reply } => {
                let _ = reply.send(self.state.status());
            }
        }
    }

    fn handle_absence_check(&mut self) {
        let now = self.clock.now();
        if let Some(trigger) = self.state.on_absence_check(now, &self.schedule) {
            self.dispatch(Action::CheckOut, trigger, None);
        }
    }

    /// Reset the day; returns the delay until the next midnight
    fn handle_midnight(&mut self) -> Duration {
        let now = self.clock.now();
        info!(at = %now, was_working = %self.state.is_work_started, "midnight_reset");
        // A check-out started yesterday may still be running
        let checkout_in_progress = self.state.is_checkout_in_progress;
        self.state = WorkDayState { is_checkout_in_progress: checkout_in_progress, ..Default::default() };
        self.monitor = None;
        self.day += 1;
        until_next_midnight(now)
    }

    /// Start an action in the background, honouring the check-out guard
    fn dispatch(&mut self, action: Action, trigger: Trigger, reply: Option<oneshot::Sender<RequestOutcome>>) {
        if action == Action::CheckOut && !self.state.begin_checkout() {
            self.metrics.record_checkout_rejected();
            info!(trigger = trigger.as_str(), "checkout_rejected_in_progress");
            if let Some(reply) = reply {
                let _ = reply.send(RequestOutcome::InProgress);
            }
            return;
        }

        info!(action = %action, trigger = trigger.as_str(), "action_dispatched");
        let actions = self.actions.clone();
        let completion_tx = self.completion_tx.clone();
        let day = self.day;
        tokio::spawn(async move {
            let outcome = actions.perform(action).await;
            let completion = Completion { action, trigger, outcome, day, reply };
            if completion_tx.send(completion).await.is_err() {
                warn!(action = %action, "completion_dropped");
            }
        });
    }

    fn handle_completion(&mut self, completion: Completion) {
        let Completion { action, trigger, outcome, day, reply } = completion;

        if day == self.day {
            match self.state.apply_outcome(action, &outcome) {
                MonitorChange::Start => self.start_monitor(),
                MonitorChange::Stop => {
                    if self.monitor.take().is_some() {
                        info!("absence_monitor_stopped");
                    }
                }
                MonitorChange::Keep => {}
            }
        } else {
            warn!(action = %action, "stale_completion_ignored");
            if action == Action::CheckOut {
                self.state.is_checkout_in_progress = false;
            }
        }

        match &outcome {
            ActionOutcome::Failed(reason) => {
                error!(action = %action, trigger = trigger.as_str(), reason = %reason, "action_failed")
            }
            _ => info!(action = %action, trigger = trigger.as_str(), outcome = outcome.as_str(), "action_settled"),
        }
        self.notify(outcome_notification(action, trigger, &outcome));

        if let Some(reply) = reply {
            let _ = reply.send(RequestOutcome::Completed(outcome));
        }
    }

    fn start_monitor(&mut self) {
        if self.monitor.is_some() {
            return;
        }
        let mut interval =
            tokio::time::interval_at(Instant::now() + self.absence_interval, self.absence_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.monitor = Some(interval);
        info!(interval_secs = %self.absence_interval.as_secs(), "absence_monitor_started");
    }

    fn notify(&self, notification: Notification) {
        let notifier = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.notify(notification).await {
                warn!(error = %e, "notification_failed");
            }
        });
    }
}

async fn next_absence_check(monitor: &mut Option<Interval>) {
    match monitor {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn outcome_notification(action: Action, trigger: Trigger, outcome: &ActionOutcome) -> Notification {
    let title = match action {
        Action::CheckIn => "Check-in",
        Action::CheckOut => "Check-out",
    };
    let message = match outcome {
        ActionOutcome::Success(times) => match times.get(action) {
            Some(time) => format!("Registered at {time}"),
            None => "Registered".to_string(),
        },
        ActionOutcome::AlreadyDone => "Already registered".to_string(),
        ActionOutcome::Failed(reason) => format!("Failed: {reason}"),
    };
    Notification::new(title, message).with_subtitle(trigger.as_str())
}
