//! Injected dependencies shared by the core services.
//!
//! All time reads go through [`Clock`] so expiry and timeout behavior is
//! deterministic under test (`dispatch-testing` provides a settable
//! `FixedClock`).

use chrono::{DateTime, Utc};

/// Clock trait - abstracts time operations for testability
pub trait Clock: Send + Sync {
    /// Get the current time
    fn now(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
