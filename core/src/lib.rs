//! # Dispatch Core
//!
//! Emergency dispatch and provider-locking core for a home-service booking
//! marketplace: given a customer's real-time location, find the nearest
//! qualified available provider, atomically reserve them against concurrent
//! emergency requests, and release the reservation on timeout or a terminal
//! booking state.
//!
//! # Architecture
//!
//! ```text
//!  customer emergency request
//!            │
//!            ▼
//!  ┌──────────────────┐   nearest candidate   ┌─────────────┐
//!  │  DispatchEngine  │──────────────────────▶│  GeoIndex   │ (external)
//!  │                  │◀──────────────────────│             │
//!  └────────┬─────────┘                       └─────────────┘
//!           │ acquire / release
//!           ▼
//!  ┌──────────────────┐   atomic try_acquire  ┌─────────────┐
//!  │    LockLedger    │──────────────────────▶│   Stores    │
//!  └────────┬─────────┘                       │ (bookings,  │
//!           │                                 │ reservations│
//!           ▼                                 │ providers)  │
//!  ┌──────────────────────┐  conditional      └─────────────┘
//!  │ LifecycleController  │  update_if              ▲
//!  │ pending → accepted → │─────────────────────────┤
//!  │ started → completed  │                         │
//!  └──────────────────────┘                         │
//!  ┌──────────────────┐  sweep_expired_locks        │
//!  │    LockReaper    │─────────────────────────────┘
//!  └──────────────────┘  (periodic, shutdown-aware)
//! ```
//!
//! # Key guarantees
//!
//! - **Mutual exclusion**: of any set of concurrent acquires for the same
//!   provider, at most one is granted — serialized solely by the store's
//!   atomic conditional write, never by an in-process mutex, because
//!   multiple server instances may run concurrently.
//! - **No partial effects**: a conflicting acquire mutates nothing; a
//!   failure after a successful acquire releases the reservation before the
//!   error propagates.
//! - **Lazy timeouts**: `lockedUntil` is advisory until the reaper or the
//!   next acquire observes it; there is no push-based cancellation.
//! - **Advisory availability**: `Provider.isAvailable` is a last-write-wins
//!   UX signal; the reservation table is the source of truth.
//!
//! Everything the core touches beyond its own logic — the spatial index,
//! persistence, notification delivery — enters through traits
//! ([`geo::GeoIndex`], the [`store`] traits, [`events::EventSink`]) so the
//! surrounding HTTP/database/socket layers stay out of the core.

pub mod config;
pub mod engine;
pub mod environment;
pub mod error;
pub mod events;
pub mod geo;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod reaper;
pub mod store;
pub mod types;

pub use config::DispatchConfig;
pub use engine::DispatchEngine;
pub use environment::{Clock, SystemClock};
pub use error::{DispatchError, Result};
pub use events::{BroadcastEventSink, DispatchEvent, EventSink, NullEventSink};
pub use geo::{CandidateFilter, GeoIndex, GeoIndexError, GeoPoint, Location};
pub use ledger::{LockLedger, ReleaseCause};
pub use lifecycle::{LifecycleController, Transition};
pub use reaper::{LockReaper, SweepReport};
pub use store::{
    AcquireOutcome, BookingPatch, BookingStore, ConditionalUpdate,
    ProviderDirectory, ReservationStore, StoreError,
};
pub use types::{
    Actor, Booking, BookingId, BookingKind, BookingStatus, CustomerId,
    LockExpiry, LockState, Minutes, Money, PaymentStatus, ProviderId,
    ProviderReservation, ProviderSummary, ServiceTag,
};
