//! Presence attendance library
//!
//! Exposes modules for integration testing and the binary.

pub mod domain;
pub mod infra;
pub mod io;
pub mod services;
