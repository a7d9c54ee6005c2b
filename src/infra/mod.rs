//! Infrastructure - configuration, clock, and metrics
//!
//! This module contains infrastructure concerns:
//! - `config` - Application configuration (TOML loading, env overrides, defaults)
//! - `clock` - Local wall-clock abstraction used by the schedule policy
//! - `metrics` - Lock-free metrics collection

pub mod clock;
pub mod config;
pub mod metrics;

// Re-export commonly used types
pub use clock::{Clock, SystemClock};
#[cfg(test)]
pub use clock::FakeClock;
pub use config::{Config, FormLayout};
pub use metrics::Metrics;
