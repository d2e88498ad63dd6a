//! Error types for dispatch and lifecycle operations.

use crate::geo::GeoIndexError;
use crate::store::StoreError;
use crate::types::{BookingId, BookingStatus, ProviderId};
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Caller-facing error taxonomy for the dispatch core.
///
/// Contention outcomes (`ProviderLocked`, `NoProviderAvailable`) are expected
/// operational results, surfaced promptly so the caller can retry or fall
/// back; they are not faults and are not logged as errors. Guard violations
/// (`InvalidTransition`, `Forbidden`) never mutate state.
#[derive(Debug, Error)]
pub enum DispatchError {
    // ═══════════════════════════════════════════════════════════
    // Lookup
    // ═══════════════════════════════════════════════════════════
    /// Referenced booking does not exist.
    #[error("booking {0} not found")]
    BookingNotFound(BookingId),

    /// Referenced provider does not exist.
    #[error("provider {0} not found")]
    ProviderNotFound(ProviderId),

    // ═══════════════════════════════════════════════════════════
    // Dispatch contention (expected, user-actionable)
    // ═══════════════════════════════════════════════════════════
    /// The nearest candidate is exclusively reserved by another emergency
    /// booking. The caller may retry; the reservation is time-bounded.
    #[error("provider {provider} is currently locked by another booking")]
    ProviderLocked {
        /// The contended provider
        provider: ProviderId,
    },

    /// No eligible provider within the search radius.
    #[error("no available provider found nearby")]
    NoProviderAvailable,

    // ═══════════════════════════════════════════════════════════
    // Lifecycle guards
    // ═══════════════════════════════════════════════════════════
    /// The requested state-machine transition is not legal from the current
    /// status. State is left untouched.
    #[error("cannot {requested} booking with status: {current}")]
    InvalidTransition {
        /// Status the booking currently holds
        current: BookingStatus,
        /// The transition verb that was requested
        requested: &'static str,
    },

    /// The actor is not authorized for the requested transition.
    #[error("not authorized to {action} this booking")]
    Forbidden {
        /// The transition verb that was requested
        action: &'static str,
    },

    // ═══════════════════════════════════════════════════════════
    // Input validation
    // ═══════════════════════════════════════════════════════════
    /// A request field failed validation before any state was touched.
    #[error("validation failed: {0}")]
    Validation(String),

    // ═══════════════════════════════════════════════════════════
    // Infrastructure
    // ═══════════════════════════════════════════════════════════
    /// The persistence layer failed. Multi-step mutations either committed
    /// atomically or compensated before this was raised.
    #[error(transparent)]
    Storage(#[from] StoreError),

    /// The geo index query failed.
    #[error(transparent)]
    Geo(#[from] GeoIndexError),
}

impl DispatchError {
    /// Whether this outcome is expected contention rather than a fault.
    ///
    /// Contention is logged at `debug` and drives retry/fallback UX; faults
    /// are logged at `error`.
    #[must_use]
    pub const fn is_contention(&self) -> bool {
        matches!(self, Self::ProviderLocked { .. } | Self::NoProviderAvailable)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn invalid_transition_names_both_statuses() {
        let err = DispatchError::InvalidTransition {
            current: BookingStatus::Started,
            requested: "accept",
        };
        let msg = err.to_string();
        assert!(msg.contains("accept"));
        assert!(msg.contains("started"));
    }

    #[test]
    fn contention_classification() {
        assert!(DispatchError::NoProviderAvailable.is_contention());
        assert!(
            DispatchError::ProviderLocked {
                provider: ProviderId::new()
            }
            .is_contention()
        );
        assert!(
            !DispatchError::BookingNotFound(BookingId::new()).is_contention()
        );
    }
}
