//! Clock abstraction for determinism.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

/// Abstraction over system time for deterministic behavior.
pub trait Clock: Send + Sync {
    /// Returns the current time.
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock that delegates to the system clock.
#[derive(Debug, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Produces the lower bound of a replay scan, evaluated when the scan starts.
pub type Watermark = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Watermark trailing `clock` by `window`.
#[must_use]
pub fn lookback(clock: Arc<dyn Clock>, window: Duration) -> Watermark {
    Arc::new(move || clock.now() - window)
}

/// Watermark that replays the entire log.
#[must_use]
pub fn full_history() -> Watermark {
    Arc::new(|| DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    struct Frozen(DateTime<Utc>);

    impl Clock for Frozen {
        fn now(&self) -> DateTime<Utc> {
            self.0
        }
    }

    #[test]
    fn test_lookback_trails_clock() {
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 12, 0, 0).unwrap();
        let watermark = lookback(Arc::new(Frozen(now)), Duration::hours(3));

        assert_eq!(
            watermark(),
            Utc.with_ymd_and_hms(2024, 1, 2, 9, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_full_history_starts_at_epoch() {
        assert_eq!(full_history()().timestamp(), 0);
    }
}
