//! Domain types for the dispatch core.
//!
//! Value objects, entities, and state types shared by the lock ledger, the
//! dispatch engine, the lifecycle controller, and the reaper. Field and
//! variant names are the canonical vocabulary any REST/JSON representation
//! of bookings must preserve.

use crate::geo::{GeoPoint, Location};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a customer
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CustomerId(Uuid);

impl CustomerId {
    /// Creates a new random `CustomerId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `CustomerId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for CustomerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CustomerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a provider
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProviderId(Uuid);

impl ProviderId {
    /// Creates a new random `ProviderId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `ProviderId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for ProviderId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Money Value Object (cents-based to avoid floating point errors)
// ============================================================================

/// Represents money in cents to avoid floating-point arithmetic errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Creates a `Money` value from cents
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Creates a `Money` value from whole currency units
    ///
    /// # Panics
    ///
    /// Panics if the conversion would overflow (`major * 100 > u64::MAX`).
    /// Use [`Money::checked_from_major`] for non-panicking conversion.
    #[must_use]
    #[allow(clippy::panic)]
    pub const fn from_major(major: u64) -> Self {
        match major.checked_mul(100) {
            Some(cents) => Self(cents),
            None => panic!("Money::from_major overflow"),
        }
    }

    /// Creates a `Money` value from whole currency units with overflow checking
    #[must_use]
    pub const fn checked_from_major(major: u64) -> Option<Self> {
        match major.checked_mul(100) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Returns the amount in cents
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Returns the amount in whole currency units (rounded down)
    #[must_use]
    pub const fn major(&self) -> u64 {
        self.0 / 100
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two money amounts with overflow checking
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(result) => Some(Self(result)),
            None => None,
        }
    }

    /// Billed amount for `minutes` of work at an hourly rate of `self`.
    ///
    /// Computes `rate × minutes / 60` in integer cents, rounding half-up to
    /// the nearest cent. The same function is used at creation (estimated
    /// duration) and completion (actual duration), so the two amounts agree
    /// exactly whenever the durations do.
    #[must_use]
    pub const fn checked_for_minutes(self, minutes: Minutes) -> Option<Self> {
        match self.0.checked_mul(minutes.value() as u64) {
            Some(product) => match product.checked_add(30) {
                Some(padded) => Some(Self(padded / 60)),
                None => None,
            },
            None => None,
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.major(), self.0 % 100)
    }
}

// ============================================================================
// Duration and Time Value Objects
// ============================================================================

/// A duration expressed in whole minutes
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Minutes(u32);

impl Minutes {
    /// Minimum bookable duration
    pub const MINIMUM: Self = Self(15);

    /// Creates a new `Minutes` value
    #[must_use]
    pub const fn new(minutes: u32) -> Self {
        Self(minutes)
    }

    /// Returns the number of minutes
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for Minutes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.0)
    }
}

/// Expiry instant of a provider reservation, with comparison helpers
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LockExpiry(DateTime<Utc>);

impl LockExpiry {
    /// Creates a new `LockExpiry`
    #[must_use]
    pub const fn new(expiry: DateTime<Utc>) -> Self {
        Self(expiry)
    }

    /// Returns the inner `DateTime`
    #[must_use]
    pub const fn inner(&self) -> DateTime<Utc> {
        self.0
    }

    /// Checks if the reservation has expired
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.0
    }
}

impl fmt::Display for LockExpiry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S UTC"))
    }
}

// ============================================================================
// Service Tag
// ============================================================================

/// Free-text service-type tag (e.g. "Plumbing")
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServiceTag(String);

impl ServiceTag {
    /// Creates a new `ServiceTag`
    pub fn new(tag: impl Into<String>) -> Self {
        Self(tag.into())
    }

    /// Returns the tag as a string reference
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServiceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Statuses
// ============================================================================

/// Booking lifecycle status. Exactly one holder at a time; transitions are
/// guarded by the lifecycle controller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    /// Created, awaiting provider acceptance
    Pending,
    /// Accepted by the assigned provider
    Accepted,
    /// Work in progress
    Started,
    /// Work finished (terminal)
    Completed,
    /// Cancelled by customer, provider, or admin (terminal)
    Cancelled,
    /// Escalated to admin dispute resolution (terminal for lock purposes)
    Disputed,
}

impl BookingStatus {
    /// Terminal states admit no further lifecycle transition.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Disputed)
    }

    /// Only bookings in these states can own an active provider lock.
    #[must_use]
    pub const fn can_hold_lock(&self) -> bool {
        matches!(self, Self::Pending | Self::Accepted)
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Started => "started",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Disputed => "disputed",
        };
        write!(f, "{name}")
    }
}

impl std::str::FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "accepted" => Ok(Self::Accepted),
            "started" => Ok(Self::Started),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "disputed" => Ok(Self::Disputed),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

/// Payment status, independent of booking status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    /// Not yet paid
    Pending,
    /// Paid in full
    Paid,
    /// Refunded after a dispute resolution
    Refunded,
}

impl PaymentStatus {
    /// Stable lowercase name, matching the serialized form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Refunded => "refunded",
        }
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "refunded" => Ok(Self::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

// ============================================================================
// Lock State
// ============================================================================

/// Canonical serialized shape of a lock state (`isLocked`/`lockedUntil`).
#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockFields {
    is_locked: bool,
    locked_until: Option<DateTime<Utc>>,
}

/// Reservation state carried by an emergency booking.
///
/// `Held` always carries its expiry; a released lock carries nothing. This
/// makes the `isLocked = true ⇒ lockedUntil set` invariant structural.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "LockFields", from = "LockFields")]
pub enum LockState {
    /// The provider is exclusively reserved until the given instant
    Held {
        /// When the reservation lapses
        until: DateTime<Utc>,
    },
    /// No reservation outstanding
    Released,
}

impl LockState {
    /// Whether the lock is currently flagged as held (ignores expiry).
    #[must_use]
    pub const fn is_held(&self) -> bool {
        matches!(self, Self::Held { .. })
    }

    /// The expiry instant, if held.
    #[must_use]
    pub const fn until(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Held { until } => Some(*until),
            Self::Released => None,
        }
    }
}

impl From<LockState> for LockFields {
    fn from(state: LockState) -> Self {
        Self {
            is_locked: state.is_held(),
            locked_until: state.until(),
        }
    }
}

impl From<LockFields> for LockState {
    fn from(fields: LockFields) -> Self {
        match (fields.is_locked, fields.locked_until) {
            (true, Some(until)) => Self::Held { until },
            _ => Self::Released,
        }
    }
}

// ============================================================================
// Booking
// ============================================================================

/// How a booking was created, with emergency-only state attached to the
/// emergency variant rather than always-optional fields on the common case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum BookingKind {
    /// Ordinary booking with an explicitly chosen provider
    Standard,
    /// Created by automatic nearest-provider dispatch
    Emergency {
        /// Current reservation state for the assigned provider
        lock: LockState,
    },
}

/// The central transactional entity.
///
/// Customer and provider ids are non-owning foreign keys; the referenced
/// records live outside the core. `location` is immutable after creation.
/// Temporal fields are set exactly once and never cleared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    /// Unique booking identifier
    pub id: BookingId,
    /// Customer who requested the service
    pub customer: CustomerId,
    /// Provider assigned to fulfil it
    pub provider: ProviderId,
    /// Requested service tag
    pub service: ServiceTag,
    /// Current lifecycle status
    pub status: BookingStatus,
    /// Where the service is to be performed
    pub location: Location,
    /// Desired start time, if any
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When work actually started
    pub started_at: Option<DateTime<Utc>>,
    /// When work finished
    pub completed_at: Option<DateTime<Utc>>,
    /// Estimated duration in minutes (at least [`Minutes::MINIMUM`])
    pub estimated_duration: Minutes,
    /// Actual duration, set once on completion if it differed
    pub actual_duration: Option<Minutes>,
    /// `hourly_rate × duration / 60`; recomputed once at completion if the
    /// actual duration differs
    pub total_amount: Money,
    /// Payment progress, independent of lifecycle status
    pub payment_status: PaymentStatus,
    /// Free-text notes from the customer
    pub notes: Option<String>,
    /// Standard vs emergency, with lock state on the emergency variant
    pub kind: BookingKind,
    /// Creation instant
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// Creates a standard booking in `pending` status.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn standard(
        id: BookingId,
        customer: CustomerId,
        provider: ProviderId,
        service: ServiceTag,
        location: Location,
        estimated_duration: Minutes,
        total_amount: Money,
        scheduled_at: Option<DateTime<Utc>>,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer,
            provider,
            service,
            status: BookingStatus::Pending,
            location,
            scheduled_at,
            started_at: None,
            completed_at: None,
            estimated_duration,
            actual_duration: None,
            total_amount,
            payment_status: PaymentStatus::Pending,
            notes,
            kind: BookingKind::Standard,
            created_at,
        }
    }

    /// Creates an emergency booking in `pending` status with the provider
    /// reservation already held.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub const fn emergency(
        id: BookingId,
        customer: CustomerId,
        provider: ProviderId,
        service: ServiceTag,
        location: Location,
        estimated_duration: Minutes,
        total_amount: Money,
        locked_until: DateTime<Utc>,
        notes: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer,
            provider,
            service,
            status: BookingStatus::Pending,
            location,
            scheduled_at: Some(created_at),
            started_at: None,
            completed_at: None,
            estimated_duration,
            actual_duration: None,
            total_amount,
            payment_status: PaymentStatus::Pending,
            notes,
            kind: BookingKind::Emergency {
                lock: LockState::Held {
                    until: locked_until,
                },
            },
            created_at,
        }
    }

    /// Whether this booking was created by emergency dispatch.
    #[must_use]
    pub const fn is_emergency(&self) -> bool {
        matches!(self.kind, BookingKind::Emergency { .. })
    }

    /// Whether the lock flag is currently held (ignores expiry).
    ///
    /// Always `false` for standard bookings.
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        match self.kind {
            BookingKind::Emergency { lock } => lock.is_held(),
            BookingKind::Standard => false,
        }
    }

    /// Lock expiry instant, if held.
    #[must_use]
    pub const fn locked_until(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            BookingKind::Emergency { lock } => lock.until(),
            BookingKind::Standard => None,
        }
    }
}

// ============================================================================
// Provider
// ============================================================================

/// Provider summary as returned by the geo index.
///
/// A read-only snapshot: rate and flags are as last reported. Availability
/// here is advisory; the lock ledger is the source of truth for exclusivity.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSummary {
    /// Provider identifier
    pub id: ProviderId,
    /// Current hourly rate
    pub hourly_rate: Money,
    /// Offered service tags
    pub services: Vec<ServiceTag>,
    /// Last reported location
    pub current_location: GeoPoint,
    /// Verification gate for non-emergency eligibility
    pub is_verified: bool,
    /// Advisory availability flag
    pub is_available: bool,
    /// Great-circle distance from the query origin in meters, when ranked
    pub distance_m: Option<f64>,
}

impl ProviderSummary {
    /// Whether the provider offers the given service tag.
    #[must_use]
    pub fn offers(&self, service: &ServiceTag) -> bool {
        self.services.iter().any(|s| s == service)
    }
}

// ============================================================================
// Reservation (ledger row)
// ============================================================================

/// An active exclusive claim on a provider, keyed by provider id.
///
/// At most one non-expired reservation may exist per provider; the store's
/// atomic acquire primitive enforces this, not this struct.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderReservation {
    /// The reserved provider
    pub provider: ProviderId,
    /// The booking owning the claim
    pub booking: BookingId,
    /// When the claim lapses
    pub expires_at: LockExpiry,
    /// When the claim was granted
    pub acquired_at: DateTime<Utc>,
}

// ============================================================================
// Actors
// ============================================================================

/// The caller on whose behalf a lifecycle transition is requested.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "role", content = "id")]
pub enum Actor {
    /// The customer who owns the booking
    Customer(CustomerId),
    /// The provider assigned to the booking
    Provider(ProviderId),
    /// An administrator
    Admin,
}
