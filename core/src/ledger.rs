//! The lock ledger: time-bounded exclusive claims on providers.
//!
//! Makes "reserve provider P for booking B until time T" atomic across
//! concurrent emergency requests targeting the same provider. The
//! reservation row is the single source of truth for exclusivity;
//! `Provider.isAvailable` is only an advisory projection updated as a side
//! effect.
//!
//! Conflict is an expected, non-exceptional outcome — it signals "try the
//! next candidate" (or surface the contention to the caller), and is
//! reported as a value, never as an error.

use crate::environment::Clock;
use crate::metrics;
use crate::store::{AcquireOutcome, ProviderDirectory, ReservationStore, StoreError};
use crate::types::{BookingId, LockExpiry, ProviderId, ProviderReservation};
use std::sync::Arc;

/// Why a reservation is being released.
///
/// Acceptance ends the exclusivity window but leaves the provider marked
/// busy (they are about to do the job); every other cause restores the
/// advisory availability flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReleaseCause {
    /// The assigned provider accepted the booking
    Accept,
    /// The booking was cancelled
    Cancel,
    /// The booking completed
    Complete,
    /// The booking was escalated to a dispute
    Dispute,
    /// Administrative/manual release
    Manual,
    /// The reaper reclaimed an expired claim
    Expired,
    /// Compensating release after a post-acquire dispatch failure
    DispatchFailed,
}

impl ReleaseCause {
    /// Metric label for this cause.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Cancel => "cancel",
            Self::Complete => "complete",
            Self::Dispute => "dispute",
            Self::Manual => "manual",
            Self::Expired => "expired",
            Self::DispatchFailed => "dispatch_failed",
        }
    }

    /// Whether releasing for this cause restores provider availability.
    #[must_use]
    pub const fn restores_availability(&self) -> bool {
        !matches!(self, Self::Accept)
    }
}

/// The reservation table plus its provider-availability side effects.
#[derive(Clone)]
pub struct LockLedger {
    reservations: Arc<dyn ReservationStore>,
    providers: Arc<dyn ProviderDirectory>,
    clock: Arc<dyn Clock>,
}

impl LockLedger {
    /// Creates a new `LockLedger`.
    #[must_use]
    pub fn new(
        reservations: Arc<dyn ReservationStore>,
        providers: Arc<dyn ProviderDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            reservations,
            providers,
            clock,
        }
    }

    /// Attempt to reserve `provider` for `booking` for the next `timeout`.
    ///
    /// Succeeds only if no other active claim exists for the provider; the
    /// check and insert are a single atomic store operation, so two
    /// requests racing for the same nearest provider cannot both be
    /// granted. On success the provider's advisory availability flag is
    /// flipped to `false`; on conflict no provider state is touched.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure. If the availability flip
    /// fails after the claim was granted, the claim is released again
    /// before the error propagates, so no orphaned lock is left behind.
    pub async fn acquire(
        &self,
        provider: ProviderId,
        booking: BookingId,
        timeout: chrono::Duration,
    ) -> Result<AcquireOutcome, StoreError> {
        let now = self.clock.now();
        let claim = ProviderReservation {
            provider,
            booking,
            expires_at: LockExpiry::new(now + timeout),
            acquired_at: now,
        };

        match self.reservations.try_acquire(claim, now).await? {
            AcquireOutcome::Granted(granted) => {
                if let Err(error) = self.providers.set_available(provider, false).await {
                    // Compensate: do not leave a claim the caller never saw.
                    self.reservations.release(booking).await?;
                    return Err(error);
                }
                metrics::record_lock_acquired();
                tracing::info!(
                    %provider,
                    %booking,
                    expires_at = %granted.expires_at,
                    "provider reserved for emergency booking"
                );
                Ok(AcquireOutcome::Granted(granted))
            }
            AcquireOutcome::Conflict { holder } => {
                metrics::record_lock_conflict();
                tracing::debug!(
                    %provider,
                    %booking,
                    holder = %holder.booking,
                    "provider already reserved"
                );
                Ok(AcquireOutcome::Conflict { holder })
            }
        }
    }

    /// Release the reservation owned by `booking`, if any.
    ///
    /// Idempotent: releasing an already-released claim is a no-op. Restores
    /// the provider's availability flag unless the cause says otherwise
    /// (see [`ReleaseCause`]).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] on backend failure. The claim removal commits
    /// before the availability write; a failed restore is retried by a
    /// later reaper cycle rather than resurrecting the claim.
    pub async fn release(
        &self,
        booking: BookingId,
        cause: ReleaseCause,
    ) -> Result<Option<ProviderId>, StoreError> {
        let Some(removed) = self.reservations.release(booking).await? else {
            return Ok(None);
        };

        metrics::record_lock_released(cause.as_str());
        tracing::info!(
            provider = %removed.provider,
            %booking,
            cause = cause.as_str(),
            "provider reservation released"
        );

        if cause.restores_availability() {
            self.providers.set_available(removed.provider, true).await?;
        }
        Ok(Some(removed.provider))
    }
}
