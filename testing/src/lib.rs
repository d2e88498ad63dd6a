//! Deterministic test doubles and fixtures for the dispatch core.
//!
//! Everything here preserves the production contracts exactly:
//! [`InMemoryStore`] applies the same conditional-update and
//! insert-if-no-active-lock semantics as the `PostgreSQL` backend (one
//! mutex acquisition per store operation stands in for one atomic
//! statement), and doubles as a haversine-ordered [`GeoIndex`] over its
//! provider table. [`FixedClock`] makes expiry arithmetic deterministic.
//!
//! The [`DispatchHarness`] wires a full core (engine, ledger, lifecycle,
//! reaper) over these doubles for scenario tests.

mod builders;
mod clock;
mod events;
mod harness;
mod memory;

pub use builders::ProviderBuilder;
pub use clock::FixedClock;
pub use events::RecordingEventSink;
pub use harness::DispatchHarness;
pub use memory::InMemoryStore;

/// Install a compact tracing subscriber for test output.
///
/// Safe to call from every test; only the first call installs.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
