//! Deterministic clocks.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;
use thoughtflow_core::clock::Clock;

/// A clock that only moves when told to.
///
/// # Example
///
/// ```
/// use thoughtflow_testing::clock::test_clock;
/// use thoughtflow_core::clock::Clock;
///
/// let clock = test_clock();
/// let before = clock.now();
/// clock.advance_secs(60);
/// assert_eq!((clock.now() - before).num_seconds(), 60);
/// ```
#[derive(Debug)]
pub struct FixedClock {
    time: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Create a clock pinned to the given instant.
    #[must_use]
    pub fn new(time: DateTime<Utc>) -> Self {
        Self {
            time: Mutex::new(time),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        if let Ok(mut time) = self.time.lock() {
            *time += by;
        }
    }

    /// Move the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: i64) {
        self.advance(Duration::seconds(secs));
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.time.lock().map(|t| *t).unwrap_or_else(|_| Utc::now())
    }
}

/// A fixed clock at 2025-01-01T00:00:00Z.
///
/// # Panics
///
/// Panics if the hardcoded timestamp fails to parse, which cannot happen.
#[must_use]
#[allow(clippy::expect_used)]
pub fn test_clock() -> FixedClock {
    FixedClock::new(
        DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .expect("hardcoded timestamp should always parse")
            .with_timezone(&Utc),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_is_deterministic() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
    }

    #[test]
    fn clock_advances_on_demand() {
        let clock = test_clock();
        let before = clock.now();
        clock.advance_secs(600);
        assert_eq!((clock.now() - before).num_seconds(), 600);
    }
}
