//! Shared types for the attendance agent

use chrono::NaiveDateTime;
use serde::Serialize;

/// Placeholder shown for a time the remote system has not registered yet
pub const UNREGISTERED: &str = "unregistered";

/// Placeholder shown when the tracked device has never been observed
pub const NEVER_DETECTED: &str = "none";

/// Newtype wrapper for the tracked device identifier (a Bluetooth address)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[repr(transparent)]
pub struct DeviceId(pub String);

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One de-duplicated presence observation
#[derive(Debug, Clone, PartialEq)]
pub struct ProximityTick {
    pub observed_at: NaiveDateTime,
    pub device_id: DeviceId,
    /// RSSI reading, `None` when the record carried no parseable value
    pub signal_quality: Option<i32>,
}

/// An action performed against the remote attendance form
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    CheckIn,
    CheckOut,
}

impl Action {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::CheckIn => "check_in",
            Action::CheckOut => "check_out",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Check-in / check-out times as rendered by the remote page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AttendanceTimes {
    pub check_in: Option<String>,
    pub check_out: Option<String>,
}

impl AttendanceTimes {
    pub fn get(&self, action: Action) -> Option<&str> {
        match action {
            Action::CheckIn => self.check_in.as_deref(),
            Action::CheckOut => self.check_out.as_deref(),
        }
    }

    pub fn set(&mut self, action: Action, value: String) {
        match action {
            Action::CheckIn => self.check_in = Some(value),
            Action::CheckOut => self.check_out = Some(value),
        }
    }

    pub fn check_in_display(&self) -> &str {
        self.check_in.as_deref().unwrap_or(UNREGISTERED)
    }

    pub fn check_out_display(&self) -> &str {
        self.check_out.as_deref().unwrap_or(UNREGISTERED)
    }
}

/// Result of one action invocation, after retries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The control was activated; carries whatever times could be read back
    Success(AttendanceTimes),
    /// The remote system shows the action as already completed (disabled control)
    AlreadyDone,
    Failed(String),
}

impl ActionOutcome {
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionOutcome::Success(_) => "success",
            ActionOutcome::AlreadyDone => "already_done",
            ActionOutcome::Failed(_) => "failed",
        }
    }

    /// True when the day's transition can be treated as completed
    #[inline]
    pub fn is_settled(&self) -> bool {
        matches!(self, ActionOutcome::Success(_) | ActionOutcome::AlreadyDone)
    }
}

/// Result handed back to manual (control-plane) callers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestOutcome {
    Completed(ActionOutcome),
    /// A check-out is already in flight; the request was not executed
    InProgress,
}

/// An attendance-related element as found on the live page
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageElement {
    /// `control` or `time`
    pub kind: &'static str,
    pub text: String,
    pub disabled: bool,
    pub visible: bool,
}

/// Cached view of today's work-day state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayStatus {
    pub is_work_started: bool,
    pub check_in_time: String,
    pub check_out_time: String,
    pub last_detected: String,
    pub last_signal_quality: Option<i32>,
}
