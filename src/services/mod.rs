//! Services - business logic and state management
//!
//! This module contains the core business logic services:
//! - `signal` - Signal quality tiers
//! - `retry` - Bounded fixed-delay retry
//! - `executor` - Drives check-in / check-out on the attendance site
//! - `attendance` - Work-day state machine and its handle

pub mod attendance;
pub mod executor;
pub mod retry;
pub mod signal;

// Re-export commonly used types
pub use attendance::{AttendanceHandle, AttendanceMachine};
pub use executor::{ActionExecutor, AttendanceActions};
pub use retry::RetryPolicy;
pub use signal::SignalTier;
