//! The booking state machine, shared by emergency and standard bookings.
//!
//! Legal paths: `pending → accepted → started → completed`,
//! `pending|accepted → cancelled`, and any non-terminal state `→ disputed`
//! (admin only). Emergency bookings additionally drive reservation release:
//! acceptance ends the exclusivity window early, cancellation and the
//! terminal states release defensively and restore availability.
//!
//! Guards are checked twice: once against the fetched booking for
//! authorization and a fast failure, and again atomically at write time by
//! the store's conditional update, so a racing transition cannot slip
//! through between check and act. No state is mutated on a failed guard.

use crate::environment::Clock;
use crate::error::{DispatchError, Result};
use crate::events::{emit, DispatchEvent, EventSink};
use crate::ledger::{LockLedger, ReleaseCause};
use crate::store::{
    BookingPatch, BookingStore, ConditionalUpdate, ProviderDirectory,
};
use crate::types::{Actor, Booking, BookingId, BookingStatus, Minutes};
use std::sync::Arc;

/// A requested state-machine transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// `pending → accepted`, by the assigned provider
    Accept,
    /// `accepted → started`, by the assigned provider
    Start,
    /// `started → completed`, by the assigned provider
    Complete,
    /// `pending|accepted → cancelled`, by customer, provider, or admin
    Cancel,
    /// any non-terminal `→ disputed`, admin only
    Dispute,
}

impl Transition {
    /// Verb used in error messages and logs.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Start => "start",
            Self::Complete => "complete",
            Self::Cancel => "cancel",
            Self::Dispute => "dispute",
        }
    }

    /// Statuses this transition may be taken from.
    #[must_use]
    pub const fn allowed_from(&self) -> &'static [BookingStatus] {
        match self {
            Self::Accept => &[BookingStatus::Pending],
            Self::Start => &[BookingStatus::Accepted],
            Self::Complete => &[BookingStatus::Started],
            Self::Cancel => &[BookingStatus::Pending, BookingStatus::Accepted],
            Self::Dispute => &[
                BookingStatus::Pending,
                BookingStatus::Accepted,
                BookingStatus::Started,
            ],
        }
    }

    /// The status this transition lands in.
    #[must_use]
    pub const fn target(&self) -> BookingStatus {
        match self {
            Self::Accept => BookingStatus::Accepted,
            Self::Start => BookingStatus::Started,
            Self::Complete => BookingStatus::Completed,
            Self::Cancel => BookingStatus::Cancelled,
            Self::Dispute => BookingStatus::Disputed,
        }
    }

    /// Checks the status guard against `current`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::InvalidTransition`] naming the current and
    /// requested statuses if the transition is not legal from `current`.
    pub fn guard(&self, current: BookingStatus) -> Result<()> {
        if self.allowed_from().contains(&current) {
            Ok(())
        } else {
            Err(DispatchError::InvalidTransition {
                current,
                requested: self.verb(),
            })
        }
    }

    /// Checks that `actor` may request this transition on `booking`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Forbidden`] if the actor is not authorized.
    pub fn authorize(&self, actor: Actor, booking: &Booking) -> Result<()> {
        let allowed = match self {
            // Only the assigned provider works the job.
            Self::Accept | Self::Start | Self::Complete => {
                matches!(actor, Actor::Provider(p) if p == booking.provider)
            }
            Self::Cancel => match actor {
                Actor::Customer(c) => c == booking.customer,
                Actor::Provider(p) => p == booking.provider,
                Actor::Admin => true,
            },
            Self::Dispute => matches!(actor, Actor::Admin),
        };
        if allowed {
            Ok(())
        } else {
            Err(DispatchError::Forbidden { action: self.verb() })
        }
    }
}

/// Applies guarded lifecycle transitions and drives reservation release.
#[derive(Clone)]
pub struct LifecycleController {
    bookings: Arc<dyn BookingStore>,
    providers: Arc<dyn ProviderDirectory>,
    ledger: LockLedger,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl LifecycleController {
    /// Creates a new `LifecycleController`.
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        providers: Arc<dyn ProviderDirectory>,
        ledger: LockLedger,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            providers,
            ledger,
            events,
            clock,
        }
    }

    /// Accept a pending booking. Clears the lock fields — acceptance ends
    /// the exclusivity window even if `lockedUntil` has not passed yet —
    /// but leaves the provider marked busy.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`], [`DispatchError::Forbidden`],
    /// [`DispatchError::InvalidTransition`], or a storage error.
    pub async fn accept(&self, id: BookingId, actor: Actor) -> Result<Booking> {
        let patch = BookingPatch::to_status(BookingStatus::Accepted).releasing_lock();
        let booking = self.transition(id, actor, Transition::Accept, patch).await?;
        if booking.is_emergency() {
            self.ledger.release(id, ReleaseCause::Accept).await?;
        }
        Ok(booking)
    }

    /// Start an accepted booking; sets `startedAt`.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`], [`DispatchError::Forbidden`],
    /// [`DispatchError::InvalidTransition`], or a storage error.
    pub async fn start(&self, id: BookingId, actor: Actor) -> Result<Booking> {
        let patch = BookingPatch::to_status(BookingStatus::Started)
            .with_started_at(self.clock.now());
        self.transition(id, actor, Transition::Start, patch).await
    }

    /// Complete a started booking; sets `completedAt`. When
    /// `actual_duration` is supplied, records it and recomputes
    /// `totalAmount` from the provider's *current* hourly rate.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`], [`DispatchError::Forbidden`],
    /// [`DispatchError::InvalidTransition`], or a storage error.
    pub async fn complete(
        &self,
        id: BookingId,
        actor: Actor,
        actual_duration: Option<Minutes>,
    ) -> Result<Booking> {
        let mut patch = BookingPatch::to_status(BookingStatus::Completed)
            .with_completed_at(self.clock.now());

        if let Some(actual) = actual_duration {
            patch = patch.with_actual_duration(actual);
            // Recompute from the provider's current rate, as billed rates
            // may have changed since creation. A provider record removed
            // out-of-band leaves the original amount in place.
            let booking = self.fetch(id).await?;
            if let Some(provider) = self.providers.fetch(booking.provider).await? {
                let amount = provider
                    .hourly_rate
                    .checked_for_minutes(actual)
                    .ok_or_else(|| {
                        DispatchError::Validation(
                            "total amount overflows".to_string(),
                        )
                    })?;
                patch = patch.with_total_amount(amount);
            }
        }

        let booking = self
            .transition(id, actor, Transition::Complete, patch)
            .await?;
        self.release_terminal(&booking, ReleaseCause::Complete).await?;
        Ok(booking)
    }

    /// Cancel a pending or accepted booking. Clears the lock fields and,
    /// for emergency bookings, restores provider availability.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`], [`DispatchError::Forbidden`],
    /// [`DispatchError::InvalidTransition`], or a storage error.
    pub async fn cancel(&self, id: BookingId, actor: Actor) -> Result<Booking> {
        let patch = BookingPatch::to_status(BookingStatus::Cancelled).releasing_lock();
        let booking = self.transition(id, actor, Transition::Cancel, patch).await?;
        self.release_terminal(&booking, ReleaseCause::Cancel).await?;
        Ok(booking)
    }

    /// Escalate any non-terminal booking to a dispute (admin only).
    /// Terminal for lock purposes: releases any outstanding claim.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`], [`DispatchError::Forbidden`],
    /// [`DispatchError::InvalidTransition`], or a storage error.
    pub async fn dispute(&self, id: BookingId, actor: Actor) -> Result<Booking> {
        let patch = BookingPatch::to_status(BookingStatus::Disputed).releasing_lock();
        let booking = self.transition(id, actor, Transition::Dispute, patch).await?;
        self.release_terminal(&booking, ReleaseCause::Dispute).await?;
        Ok(booking)
    }

    /// Terminal-state release hook: drop any outstanding claim (defensive —
    /// accept or cancel normally released it already) and restore the
    /// provider's availability, which the claim release alone cannot do
    /// once the claim is gone.
    async fn release_terminal(
        &self,
        booking: &Booking,
        cause: ReleaseCause,
    ) -> Result<()> {
        if !booking.is_emergency() {
            return Ok(());
        }
        self.ledger.release(booking.id, cause).await?;
        if cause.restores_availability() {
            self.providers
                .set_available(booking.provider, true)
                .await?;
        }
        Ok(())
    }

    /// Manual/administrative escape hatch: clear a booking's lock fields
    /// and restore the provider's availability. Idempotent — releasing an
    /// already-released lock is a no-op. Standard bookings are untouched.
    ///
    /// # Errors
    ///
    /// [`DispatchError::BookingNotFound`] or a storage error.
    pub async fn release_lock(&self, id: BookingId) -> Result<()> {
        let booking = self.fetch(id).await?;
        if !booking.is_locked() {
            // Still release any ledger row; the mirror may lag the truth.
            self.ledger.release(id, ReleaseCause::Manual).await?;
            return Ok(());
        }

        self.bookings
            .update_if(id, &[], BookingPatch::default().releasing_lock())
            .await?;
        self.ledger.release(id, ReleaseCause::Manual).await?;
        // Restore unconditionally: the ledger row may already be gone while
        // the mirror was still held.
        self.providers.set_available(booking.provider, true).await?;
        emit(
            self.events.as_ref(),
            DispatchEvent::LockReleased {
                booking: id,
                provider: booking.provider,
            },
        )
        .await;
        Ok(())
    }

    /// Shared transition path: fetch, authorize, guard, conditionally
    /// write, emit.
    async fn transition(
        &self,
        id: BookingId,
        actor: Actor,
        transition: Transition,
        patch: BookingPatch,
    ) -> Result<Booking> {
        let booking = self.fetch(id).await?;
        transition.authorize(actor, &booking)?;
        transition.guard(booking.status)?;

        // The store re-checks the guard at write time; a transition that
        // raced us surfaces as a rejection with the status that won.
        let updated = match self
            .bookings
            .update_if(id, transition.allowed_from(), patch)
            .await?
        {
            ConditionalUpdate::Applied(updated) => updated,
            ConditionalUpdate::Rejected { current } => {
                return Err(DispatchError::InvalidTransition {
                    current,
                    requested: transition.verb(),
                });
            }
        };

        tracing::info!(
            booking = %id,
            from = %booking.status,
            to = %updated.status,
            "booking transitioned"
        );
        emit(
            self.events.as_ref(),
            DispatchEvent::BookingStatusChanged {
                booking: id,
                status: updated.status,
            },
        )
        .await;
        Ok(updated)
    }

    async fn fetch(&self, id: BookingId) -> Result<Booking> {
        self.bookings
            .fetch(id)
            .await?
            .ok_or(DispatchError::BookingNotFound(id))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn guard_matrix_matches_the_state_machine() {
        use BookingStatus as S;

        // Exhaustive: every (transition, status) pair.
        let legal: &[(Transition, &[S])] = &[
            (Transition::Accept, &[S::Pending]),
            (Transition::Start, &[S::Accepted]),
            (Transition::Complete, &[S::Started]),
            (Transition::Cancel, &[S::Pending, S::Accepted]),
            (Transition::Dispute, &[S::Pending, S::Accepted, S::Started]),
        ];
        let all = [
            S::Pending,
            S::Accepted,
            S::Started,
            S::Completed,
            S::Cancelled,
            S::Disputed,
        ];

        for (transition, allowed) in legal {
            for status in all {
                let outcome = transition.guard(status);
                assert_eq!(
                    outcome.is_ok(),
                    allowed.contains(&status),
                    "{} from {status}",
                    transition.verb()
                );
            }
        }
    }

    #[test]
    fn terminal_states_admit_no_transition() {
        for status in [
            BookingStatus::Completed,
            BookingStatus::Cancelled,
            BookingStatus::Disputed,
        ] {
            for transition in [
                Transition::Accept,
                Transition::Start,
                Transition::Complete,
                Transition::Cancel,
                Transition::Dispute,
            ] {
                assert!(transition.guard(status).is_err());
            }
        }
    }

    #[test]
    fn invalid_transition_reports_current_status() {
        let err = Transition::Accept.guard(BookingStatus::Started).unwrap_err();
        match err {
            DispatchError::InvalidTransition { current, requested } => {
                assert_eq!(current, BookingStatus::Started);
                assert_eq!(requested, "accept");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
