//! The dispatch engine: booking creation, including emergency matching.
//!
//! Emergency flow: query the geo index for the nearest qualified available
//! provider, atomically reserve them through the lock ledger, persist the
//! booking, notify. Nearest-first minimizes response time; the lock closes
//! the check-then-act race between "read nearest" and "create booking"
//! that an index-only read cannot prevent.
//!
//! On lock conflict the engine surfaces [`DispatchError::ProviderLocked`]
//! rather than cascading to the next-nearest candidate; the candidate
//! `limit` is already plumbed through the index query so a ranked-list
//! retry can be added behind the same seam.

use crate::config::DispatchConfig;
use crate::environment::Clock;
use crate::error::{DispatchError, Result};
use crate::events::{emit, DispatchEvent, EventSink};
use crate::geo::{CandidateFilter, GeoIndex, Location};
use crate::ledger::{LockLedger, ReleaseCause};
use crate::metrics;
use crate::store::{AcquireOutcome, BookingStore, ProviderDirectory};
use crate::types::{
    Booking, BookingId, BookingKind, CustomerId, LockState, Minutes,
    ProviderId, ServiceTag,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Orchestrates booking creation against the geo index, the lock ledger,
/// and the stores.
#[derive(Clone)]
pub struct DispatchEngine {
    geo: Arc<dyn GeoIndex>,
    bookings: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderDirectory>,
    ledger: LockLedger,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
    config: DispatchConfig,
}

impl DispatchEngine {
    /// Creates a new `DispatchEngine`.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        geo: Arc<dyn GeoIndex>,
        bookings: Arc<dyn BookingStore>,
        providers: Arc<dyn ProviderDirectory>,
        ledger: LockLedger,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            geo,
            bookings,
            providers,
            ledger,
            events,
            clock,
            config,
        }
    }

    /// Create an emergency booking by automatic nearest-provider dispatch.
    ///
    /// Finds the nearest verified, available provider offering `service`
    /// within the configured radius, reserves them atomically, and creates
    /// the booking in `pending` status with the reservation held.
    ///
    /// # Errors
    ///
    /// - [`DispatchError::NoProviderAvailable`] if no eligible candidate is
    ///   in radius — user-actionable, "try again later".
    /// - [`DispatchError::ProviderLocked`] if the nearest candidate is
    ///   reserved by a concurrent emergency — the caller may retry.
    /// - [`DispatchError::Validation`] for a duration below the minimum.
    /// - Storage/geo errors; any failure after a successful acquire
    ///   releases the reservation before propagating, so no orphaned lock
    ///   is left behind.
    pub async fn create_emergency_booking(
        &self,
        customer: CustomerId,
        service: ServiceTag,
        location: Location,
        estimated_duration: Minutes,
        notes: Option<String>,
    ) -> Result<Booking> {
        validate_duration(estimated_duration)?;

        let filter = CandidateFilter::emergency(service.clone());
        let candidates = self
            .geo
            .find_candidates(
                location.point,
                self.config.max_radius_m,
                &filter,
                self.config.candidate_limit,
            )
            .await?;

        let Some(candidate) = candidates.into_iter().next() else {
            metrics::record_no_provider();
            tracing::debug!(
                service = %service,
                origin = %location.point,
                "no eligible provider in radius"
            );
            return Err(DispatchError::NoProviderAvailable);
        };

        let total_amount = candidate
            .hourly_rate
            .checked_for_minutes(estimated_duration)
            .ok_or_else(|| {
                DispatchError::Validation("total amount overflows".to_string())
            })?;

        let booking_id = BookingId::new();
        let reservation = match self
            .ledger
            .acquire(
                candidate.id,
                booking_id,
                self.config.lock_timeout_chrono(),
            )
            .await?
        {
            AcquireOutcome::Granted(reservation) => reservation,
            AcquireOutcome::Conflict { .. } => {
                return Err(DispatchError::ProviderLocked {
                    provider: candidate.id,
                });
            }
        };

        let booking = Booking::emergency(
            booking_id,
            customer,
            candidate.id,
            service,
            location,
            estimated_duration,
            total_amount,
            reservation.expires_at.inner(),
            notes,
            self.clock.now(),
        );

        if let Err(error) = self.bookings.insert(booking.clone()).await {
            // Compensate before propagating: the claim must not outlive a
            // booking that was never persisted.
            if let Err(release_error) = self
                .ledger
                .release(booking_id, ReleaseCause::DispatchFailed)
                .await
            {
                tracing::error!(
                    booking = %booking_id,
                    %release_error,
                    "failed to release reservation after dispatch failure"
                );
            }
            return Err(error.into());
        }

        metrics::record_booking_created(true);
        tracing::info!(
            booking = %booking_id,
            provider = %candidate.id,
            distance_m = candidate.distance_m,
            "emergency booking dispatched"
        );
        self.notify_created(&booking).await;
        Ok(booking)
    }

    /// Create an ordinary booking for an explicitly chosen provider.
    ///
    /// Validates that the provider exists and — unless `emergency` is set —
    /// is available and verified. No reservation is involved.
    ///
    /// # Errors
    ///
    /// [`DispatchError::ProviderNotFound`], [`DispatchError::Validation`],
    /// or a storage error.
    #[allow(clippy::too_many_arguments)]
    pub async fn create_booking(
        &self,
        customer: CustomerId,
        provider: ProviderId,
        service: ServiceTag,
        location: Location,
        estimated_duration: Minutes,
        scheduled_at: Option<DateTime<Utc>>,
        notes: Option<String>,
        emergency: bool,
    ) -> Result<Booking> {
        validate_duration(estimated_duration)?;

        let summary = self
            .providers
            .fetch(provider)
            .await?
            .ok_or(DispatchError::ProviderNotFound(provider))?;

        if !emergency {
            if !summary.is_available {
                return Err(DispatchError::Validation(
                    "Provider is not available".to_string(),
                ));
            }
            if !summary.is_verified {
                return Err(DispatchError::Validation(
                    "Provider is not verified".to_string(),
                ));
            }
        }

        let total_amount = summary
            .hourly_rate
            .checked_for_minutes(estimated_duration)
            .ok_or_else(|| {
                DispatchError::Validation("total amount overflows".to_string())
            })?;

        let now = self.clock.now();
        let mut booking = Booking::standard(
            BookingId::new(),
            customer,
            provider,
            service,
            location,
            estimated_duration,
            total_amount,
            scheduled_at.or(Some(now)),
            notes,
            now,
        );
        if emergency {
            // Explicit-provider emergency: lock fields apply but nothing is
            // held — dispatch never reserved anyone.
            booking.kind = BookingKind::Emergency {
                lock: LockState::Released,
            };
        }

        self.bookings.insert(booking.clone()).await?;
        metrics::record_booking_created(emergency);
        tracing::info!(
            booking = %booking.id,
            provider = %provider,
            emergency,
            "booking created"
        );
        self.notify_created(&booking).await;
        Ok(booking)
    }

    async fn notify_created(&self, booking: &Booking) {
        emit(
            self.events.as_ref(),
            DispatchEvent::BookingCreated {
                booking: Box::new(booking.clone()),
            },
        )
        .await;
        emit(
            self.events.as_ref(),
            DispatchEvent::ProviderAssigned {
                booking: booking.id,
                provider: booking.provider,
            },
        )
        .await;
    }
}

fn validate_duration(estimated_duration: Minutes) -> Result<()> {
    if estimated_duration < Minutes::MINIMUM {
        return Err(DispatchError::Validation(format!(
            "estimated duration must be at least {}",
            Minutes::MINIMUM
        )));
    }
    Ok(())
}
