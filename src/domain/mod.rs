//! Domain models - core attendance types
//!
//! This module contains the canonical data types used throughout the system:
//! - `ProximityTick` - one de-duplicated observation of the tracked device
//! - `Action` - check-in or check-out against the remote form
//! - `ActionOutcome` - tagged result of an action (success / already done / failed)
//! - `TodayStatus` - cached work-day view served to the control plane

pub mod types;

pub use types::{
    Action, ActionOutcome, AttendanceTimes, DeviceId, PageElement, ProximityTick, RequestOutcome,
    TodayStatus, NEVER_DETECTED, UNREGISTERED,
};
