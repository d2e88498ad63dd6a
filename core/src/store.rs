//! Storage seams for bookings, reservations, and the provider directory.
//!
//! The traits here are deliberately minimal and expose *semantic* atomic
//! operations rather than generic predicates: a conditional booking update
//! scoped to expected statuses, an insert-if-no-active-lock for
//! reservations, and an expiry-scoped sweep. Each maps directly onto a
//! single conditional statement in the `PostgreSQL` implementation
//! (`dispatch-postgres`) and onto one mutex-guarded step in the in-memory
//! implementation (`dispatch-testing`), so the store is the sole
//! serialization mechanism — no in-process mutex is assumed, because
//! multiple server instances may run concurrently.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`; every method is a suspend point
//! with no ordering guarantee relative to other in-flight requests beyond
//! what the conditional primitives themselves provide.

use crate::types::{
    Booking, BookingId, BookingStatus, LockState, Minutes, Money,
    ProviderId, ProviderReservation, ProviderSummary,
};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A row with the same identity already exists.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// The backing database failed.
    #[error("storage backend error: {0}")]
    Backend(String),

    /// Row (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome of a conditional booking update.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalUpdate {
    /// The predicate held at write time; the returned booking reflects the
    /// applied patch.
    Applied(Booking),
    /// The predicate did not hold; nothing was written.
    Rejected {
        /// Status the booking held at write time
        current: BookingStatus,
    },
}

/// Outcome of an atomic reservation acquire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// No active reservation existed; the claim was inserted.
    Granted(ProviderReservation),
    /// Another booking holds an active claim on the provider.
    Conflict {
        /// The competing reservation observed at write time
        holder: ProviderReservation,
    },
}

/// Field-level changes applied by a conditional booking update.
///
/// Only the fields set here are written; everything else is left untouched.
/// Built with the chained constructors so call sites read like the
/// transition they perform.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BookingPatch {
    /// New lifecycle status
    pub status: Option<BookingStatus>,
    /// Set `started_at` (exactly once, never cleared)
    pub started_at: Option<DateTime<Utc>>,
    /// Set `completed_at` (exactly once, never cleared)
    pub completed_at: Option<DateTime<Utc>>,
    /// Record the actual duration on completion
    pub actual_duration: Option<Minutes>,
    /// Recomputed total amount
    pub total_amount: Option<Money>,
    /// Replace the lock state (emergency bookings only; ignored for
    /// standard bookings)
    pub lock: Option<LockState>,
}

impl BookingPatch {
    /// Patch that moves the booking to `status`.
    #[must_use]
    pub fn to_status(status: BookingStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Also release the lock fields.
    #[must_use]
    pub const fn releasing_lock(mut self) -> Self {
        self.lock = Some(LockState::Released);
        self
    }

    /// Also set `started_at`.
    #[must_use]
    pub const fn with_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    /// Also set `completed_at`.
    #[must_use]
    pub const fn with_completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Also record the actual duration.
    #[must_use]
    pub const fn with_actual_duration(mut self, minutes: Minutes) -> Self {
        self.actual_duration = Some(minutes);
        self
    }

    /// Also overwrite the total amount.
    #[must_use]
    pub const fn with_total_amount(mut self, amount: Money) -> Self {
        self.total_amount = Some(amount);
        self
    }

    /// Applies this patch to a booking in place.
    ///
    /// Shared by the in-memory store and by row reconstruction after a
    /// database update, so both backends agree on patch semantics.
    pub fn apply(&self, booking: &mut Booking) {
        if let Some(status) = self.status {
            booking.status = status;
        }
        if let Some(at) = self.started_at {
            booking.started_at = Some(at);
        }
        if let Some(at) = self.completed_at {
            booking.completed_at = Some(at);
        }
        if let Some(minutes) = self.actual_duration {
            booking.actual_duration = Some(minutes);
        }
        if let Some(amount) = self.total_amount {
            booking.total_amount = amount;
        }
        if let Some(lock) = self.lock {
            if let crate::types::BookingKind::Emergency { lock: slot } =
                &mut booking.kind
            {
                *slot = lock;
            }
        }
    }
}

/// Persistence for bookings with a conditional-update primitive.
#[async_trait::async_trait]
pub trait BookingStore: Send + Sync {
    /// Insert a new booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateKey`] if the id already exists, or a
    /// backend error.
    async fn insert(&self, booking: Booking) -> Result<(), StoreError>;

    /// Fetch a booking by id. `None` means not found.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    async fn fetch(&self, id: BookingId) -> Result<Option<Booking>, StoreError>;

    /// Conditionally patch a booking.
    ///
    /// The patch is applied only if the booking's status at write time is in
    /// `expected` (an empty slice means "any status"). Check and write are a
    /// single atomic step; on rejection nothing is written and the observed
    /// status is returned.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] on database failure; a booking that
    /// does not exist surfaces as `Rejected` only from backends that cannot
    /// distinguish it, otherwise as a backend error — callers fetch first
    /// and treat missing rows as not-found before updating.
    async fn update_if(
        &self,
        id: BookingId,
        expected: &[BookingStatus],
        patch: BookingPatch,
    ) -> Result<ConditionalUpdate, StoreError>;

    /// Atomically clear the lock fields of every emergency booking whose
    /// lock is held and expired as of `now`, returning the affected
    /// bookings (post-clear).
    ///
    /// The expiry predicate is re-checked at write time: a lock extended or
    /// cleared between a caller's scan and this write is left alone. Safe
    /// to call at any cadence.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    async fn sweep_expired_locks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError>;
}

/// Persistence for provider reservations — the source of truth for
/// emergency exclusivity.
#[async_trait::async_trait]
pub trait ReservationStore: Send + Sync {
    /// Atomically insert `claim` unless the provider already has an active
    /// reservation.
    ///
    /// A reservation is *active* when it has not expired as of `now` and its
    /// owning booking is still in a lock-holding status (`pending` or
    /// `accepted`). A claim whose booking row does not exist yet is active:
    /// dispatch acquires before it persists the booking, and the window in
    /// between must stay exclusive. Only a claim that is expired, or whose
    /// owning booking has left the lock-holding statuses, is replaced.
    ///
    /// This is the one mutual-exclusion point in the system: of any set of
    /// concurrent calls for the same provider, at most one may be granted.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails; contention is reported
    /// through [`AcquireOutcome::Conflict`], never as an error.
    async fn try_acquire(
        &self,
        claim: ProviderReservation,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, StoreError>;

    /// Remove the reservation owned by `booking`, if any. Idempotent:
    /// releasing an absent reservation returns `None` and is not an error.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails.
    async fn release(
        &self,
        booking: BookingId,
    ) -> Result<Option<ProviderReservation>, StoreError>;
}

/// Read/write access to provider records as the core sees them.
///
/// `set_available` is a last-write-wins advisory projection: the provider's
/// own toggle, the dispatch engine, and the reaper all write it without
/// coordination. Exclusivity never depends on it.
#[async_trait::async_trait]
pub trait ProviderDirectory: Send + Sync {
    /// Fetch a provider summary by id. `None` means not found.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the read fails.
    async fn fetch(
        &self,
        id: ProviderId,
    ) -> Result<Option<ProviderSummary>, StoreError>;

    /// Overwrite the advisory availability flag.
    ///
    /// # Errors
    ///
    /// Returns a backend error if the write fails. Unknown providers are a
    /// no-op, not an error (the provider record may have been removed
    /// out-of-band).
    async fn set_available(
        &self,
        id: ProviderId,
        available: bool,
    ) -> Result<(), StoreError>;
}
