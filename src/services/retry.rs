//! Bounded retry with a constant delay between attempts
//!
//! Attempts run strictly one after another. Every failure is logged before the
//! next attempt; the last failure is returned to the caller unchanged.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` is clamped to at least one attempt
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self { max_attempts: max_attempts.max(1), delay }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Run `operation` until it succeeds or `max_attempts` are used up
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut operation: F) -> Result<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 1;
        loop {
            match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.max_attempts => {
                    warn!(
                        operation = %label,
                        attempt = %attempt,
                        max_attempts = %self.max_attempts,
                        error = %e,
                        "retry_attempt_failed"
                    );
                    tokio::time::sleep(self.delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        operation = %label,
                        attempt = %attempt,
                        max_attempts = %self.max_attempts,
                        error = %e,
                        "retry_exhausted"
                    );
                    return Err(e);
                }
            }
        }
    }
}
