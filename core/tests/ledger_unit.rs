//! Unit-level tests for the lock ledger, driven over the in-memory backend.
//!
//! These live as an integration test (rather than an in-crate `#[cfg(test)]`
//! module) because they depend on `dispatch-testing`, which itself depends on
//! `dispatch-core`; compiled inside the lib that cycle would link two copies
//! of `dispatch-core` and the store types would fail to unify.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use dispatch_core::{
    AcquireOutcome, BookingId, LockLedger, ReleaseCause, SystemClock,
};
use dispatch_testing::{InMemoryStore, ProviderBuilder};

fn ledger(store: &Arc<InMemoryStore>) -> LockLedger {
    LockLedger::new(
        store.clone(),
        store.clone(),
        Arc::new(SystemClock),
    )
}

#[tokio::test]
async fn acquire_grants_then_conflicts() {
    let store = Arc::new(InMemoryStore::new());
    let provider = store.add_provider(ProviderBuilder::new().build());
    let ledger = ledger(&store);

    let first = ledger
        .acquire(provider, BookingId::new(), chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(first, AcquireOutcome::Granted(_)));

    let second = ledger
        .acquire(provider, BookingId::new(), chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(second, AcquireOutcome::Conflict { .. }));
}

#[tokio::test]
async fn acquire_flips_availability_and_release_restores_it() {
    let store = Arc::new(InMemoryStore::new());
    let provider = store.add_provider(ProviderBuilder::new().build());
    let booking = BookingId::new();
    let ledger = ledger(&store);

    ledger
        .acquire(provider, booking, chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(!store.provider_available(provider));

    ledger.release(booking, ReleaseCause::Cancel).await.unwrap();
    assert!(store.provider_available(provider));
}

#[tokio::test]
async fn release_on_accept_keeps_provider_busy() {
    let store = Arc::new(InMemoryStore::new());
    let provider = store.add_provider(ProviderBuilder::new().build());
    let booking = BookingId::new();
    let ledger = ledger(&store);

    ledger
        .acquire(provider, booking, chrono::Duration::minutes(5))
        .await
        .unwrap();
    ledger.release(booking, ReleaseCause::Accept).await.unwrap();

    // Exclusivity window over: a new claim can be granted...
    let again = ledger
        .acquire(provider, BookingId::new(), chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(again, AcquireOutcome::Granted(_)));
}

#[tokio::test]
async fn release_is_idempotent() {
    let store = Arc::new(InMemoryStore::new());
    let ledger = ledger(&store);

    let released = ledger
        .release(BookingId::new(), ReleaseCause::Manual)
        .await
        .unwrap();
    assert!(released.is_none());
}

#[tokio::test]
async fn expired_claim_does_not_block_a_new_acquire() {
    let store = Arc::new(InMemoryStore::new());
    let provider = store.add_provider(ProviderBuilder::new().build());
    let ledger = ledger(&store);

    // A claim that is already past its expiry.
    ledger
        .acquire(provider, BookingId::new(), chrono::Duration::seconds(-1))
        .await
        .unwrap();

    let outcome = ledger
        .acquire(provider, BookingId::new(), chrono::Duration::minutes(5))
        .await
        .unwrap();
    assert!(matches!(outcome, AcquireOutcome::Granted(_)));
}
