//! Wall-clock abstraction for testable time-of-day policy
//!
//! Work windows, the forced-checkout deadline and the midnight reset are all
//! defined in local wall-clock time, so the clock yields `NaiveDateTime`.

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use std::time::Duration;

/// A clock that provides the current local time
pub trait Clock: Send + Sync + 'static {
    fn now(&self) -> NaiveDateTime;
}

/// Real local clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

#[cfg(test)]
pub use fake::FakeClock;

#[cfg(test)]
mod fake {
    use super::{ChronoDuration, Clock, Duration, NaiveDateTime};
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Fake clock for testing with controllable time
    #[derive(Clone, Debug)]
    pub struct FakeClock {
        current: Arc<Mutex<NaiveDateTime>>,
    }

    impl FakeClock {
        pub fn new(start: NaiveDateTime) -> Self {
            Self { current: Arc::new(Mutex::new(start)) }
        }

        pub fn set(&self, at: NaiveDateTime) {
            *self.current.lock() = at;
        }

        pub fn advance(&self, by: Duration) {
            let mut current = self.current.lock();
            *current += ChronoDuration::from_std(by).unwrap_or(ChronoDuration::zero());
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> NaiveDateTime {
            *self.current.lock()
        }
    }
}

/// Time remaining from `now` until the next local midnight
pub fn until_next_midnight(now: NaiveDateTime) -> Duration {
    let next_midnight = now
        .date()
        .succ_opt()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .unwrap_or(now + ChronoDuration::days(1));
    (next_midnight - now).to_std().unwrap_or(Duration::ZERO)
}
