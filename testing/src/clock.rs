//! A settable clock for deterministic expiry behavior.

use chrono::{DateTime, Duration, Utc};
use dispatch_core::Clock;
use std::sync::Mutex;

/// Clock that only moves when the test says so.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    /// Creates a clock pinned at `now`.
    #[must_use]
    pub const fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Creates a clock pinned at the current wall time.
    #[must_use]
    pub fn from_system() -> Self {
        Self::new(Utc::now())
    }

    /// Moves the clock forward by `duration` (negative moves it back).
    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += duration;
        }
    }

    /// Pins the clock at `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        if let Ok(mut now) = self.now.lock() {
            *now = instant;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|now| *now).unwrap_or_else(|_| Utc::now())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_time_forward() {
        let clock = FixedClock::from_system();
        let before = clock.now();
        clock.advance(Duration::minutes(10));
        assert_eq!(clock.now() - before, Duration::minutes(10));
    }
}
