//! Full-core wiring over the in-memory doubles for scenario tests.

use crate::{FixedClock, InMemoryStore, RecordingEventSink};
use dispatch_core::{
    DispatchConfig, DispatchEngine, LifecycleController, LockLedger, LockReaper,
};
use std::sync::Arc;

/// A complete dispatch core (engine, ledger, lifecycle, reaper) wired over
/// [`InMemoryStore`], [`FixedClock`], and [`RecordingEventSink`].
pub struct DispatchHarness {
    /// The shared backend (stores + geo index)
    pub store: Arc<InMemoryStore>,
    /// The settable clock driving every timeout and expiry
    pub clock: Arc<FixedClock>,
    /// The event log
    pub events: Arc<RecordingEventSink>,
    /// The lock ledger
    pub ledger: LockLedger,
    /// The dispatch engine under test
    pub engine: DispatchEngine,
    /// The lifecycle controller under test
    pub lifecycle: LifecycleController,
    /// The lock reaper under test
    pub reaper: LockReaper,
}

impl DispatchHarness {
    /// Wires a harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(DispatchConfig::default())
    }

    /// Wires a harness with a custom configuration.
    #[must_use]
    pub fn with_config(config: DispatchConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let clock = Arc::new(FixedClock::from_system());
        let events = Arc::new(RecordingEventSink::new());

        let ledger = LockLedger::new(store.clone(), store.clone(), clock.clone());
        let engine = DispatchEngine::new(
            store.clone(),
            store.clone(),
            store.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
            config,
        );
        let lifecycle = LifecycleController::new(
            store.clone(),
            store.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
        );
        let reaper = LockReaper::new(
            store.clone(),
            ledger.clone(),
            events.clone(),
            clock.clone(),
        );

        Self {
            store,
            clock,
            events,
            ledger,
            engine,
            lifecycle,
            reaper,
        }
    }
}

impl Default for DispatchHarness {
    fn default() -> Self {
        Self::new()
    }
}
