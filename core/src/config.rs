//! Configuration for the dispatch core.
//!
//! Loaded from environment variables with sensible defaults; every knob can
//! also be set directly when constructing the engine in tests.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Default search radius for emergency dispatch: 50 km.
const DEFAULT_MAX_RADIUS_KM: f64 = 50.0;
/// Default provider lock timeout: 5 minutes.
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 5 * 60;
/// Default reaper sweep interval: 5 minutes.
const DEFAULT_REAPER_INTERVAL_SECS: u64 = 5 * 60;
/// Default candidate list length requested from the geo index.
const DEFAULT_CANDIDATE_LIMIT: usize = 1;

/// Tunables for dispatch, locking, and the reaper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum great-circle distance to a candidate, in meters
    pub max_radius_m: f64,
    /// How long an emergency reservation holds a provider
    pub lock_timeout: Duration,
    /// How often the reaper sweeps for expired reservations
    pub reaper_interval: Duration,
    /// How many ranked candidates to request from the geo index
    pub candidate_limit: usize,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_radius_m: DEFAULT_MAX_RADIUS_KM * 1000.0,
            lock_timeout: Duration::from_secs(DEFAULT_LOCK_TIMEOUT_SECS),
            reaper_interval: Duration::from_secs(DEFAULT_REAPER_INTERVAL_SECS),
            candidate_limit: DEFAULT_CANDIDATE_LIMIT,
        }
    }
}

impl DispatchConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    ///
    /// Recognized variables: `DISPATCH_MAX_RADIUS_KM`,
    /// `DISPATCH_LOCK_TIMEOUT_SECS`, `DISPATCH_REAPER_INTERVAL_SECS`,
    /// `DISPATCH_CANDIDATE_LIMIT`.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_radius_m: env_parse("DISPATCH_MAX_RADIUS_KM", DEFAULT_MAX_RADIUS_KM)
                * 1000.0,
            lock_timeout: Duration::from_secs(env_parse(
                "DISPATCH_LOCK_TIMEOUT_SECS",
                DEFAULT_LOCK_TIMEOUT_SECS,
            )),
            reaper_interval: Duration::from_secs(env_parse(
                "DISPATCH_REAPER_INTERVAL_SECS",
                DEFAULT_REAPER_INTERVAL_SECS,
            )),
            candidate_limit: env_parse(
                "DISPATCH_CANDIDATE_LIMIT",
                defaults.candidate_limit,
            ),
        }
    }

    /// Lock timeout as a `chrono::Duration` for expiry arithmetic.
    ///
    /// Falls back to the default timeout if the configured value does not
    /// fit (it always does for sane configurations).
    #[must_use]
    pub fn lock_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.lock_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(
                i64::try_from(DEFAULT_LOCK_TIMEOUT_SECS).unwrap_or(300),
            ))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = DispatchConfig::default();
        assert!((config.max_radius_m - 50_000.0).abs() < f64::EPSILON);
        assert_eq!(config.lock_timeout, Duration::from_secs(300));
        assert_eq!(config.reaper_interval, Duration::from_secs(300));
        assert_eq!(config.candidate_limit, 1);
    }

    #[test]
    fn lock_timeout_converts_to_chrono() {
        let config = DispatchConfig::default();
        assert_eq!(config.lock_timeout_chrono(), chrono::Duration::minutes(5));
    }
}
