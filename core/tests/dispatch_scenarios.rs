//! End-to-end scenarios for emergency dispatch, locking, lifecycle, and
//! the reaper, driven through the full core wired over the in-memory
//! backend.

#![allow(clippy::unwrap_used, clippy::panic)]

use chrono::Duration;
use dispatch_core::{
    Actor, BookingStatus, CustomerId, DispatchError, GeoPoint, Location,
    Minutes, Money, ServiceTag,
};
use dispatch_testing::{DispatchHarness, ProviderBuilder};

fn mg_road() -> Location {
    Location::new(GeoPoint::new(77.5946, 12.9716), "12 MG Road".to_string())
}

fn plumbing() -> ServiceTag {
    ServiceTag::new("Plumbing")
}

#[tokio::test]
async fn emergency_dispatch_reserves_nearest_provider() {
    let harness = DispatchHarness::new();
    let near = harness.store.add_provider(
        ProviderBuilder::new()
            .location(GeoPoint::new(77.60, 12.98))
            .build(),
    );
    let _farther = harness.store.add_provider(
        ProviderBuilder::new()
            .location(GeoPoint::new(77.80, 13.20))
            .build(),
    );

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    assert_eq!(booking.provider, near);
    assert_eq!(booking.status, BookingStatus::Pending);
    assert!(booking.is_emergency());
    assert!(booking.is_locked());
    assert!(booking.locked_until().is_some());
    assert_eq!(booking.total_amount, Money::from_major(600));
    // Provider flagged busy while reserved.
    assert!(!harness.store.provider_available(near));
}

#[tokio::test]
async fn concurrent_emergencies_for_sole_provider_grant_exactly_one() {
    let harness = DispatchHarness::new();
    let provider = harness
        .store
        .add_provider(ProviderBuilder::new().hourly_rate(Money::from_major(600)).build());

    let (first, second) = tokio::join!(
        harness.engine.create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        ),
        harness.engine.create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        ),
    );

    let outcomes = [first, second];
    let winners: Vec<_> = outcomes.iter().filter(|o| o.is_ok()).collect();
    assert_eq!(winners.len(), 1, "exactly one request may win the provider");

    let booking = winners[0].as_ref().unwrap();
    assert_eq!(booking.provider, provider);
    assert!(booking.is_locked());

    let loser = outcomes.iter().find(|o| o.is_err()).unwrap();
    assert!(matches!(
        loser.as_ref().unwrap_err(),
        DispatchError::ProviderLocked { .. } | DispatchError::NoProviderAvailable
    ));
}

#[tokio::test]
async fn no_candidate_in_radius_fails_promptly() {
    let harness = DispatchHarness::new();
    // Mumbai is ~845 km from the request point: outside the 50 km radius.
    harness.store.add_provider(
        ProviderBuilder::new()
            .location(GeoPoint::new(72.8777, 19.0760))
            .build(),
    );

    let outcome = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await;
    assert!(matches!(outcome, Err(DispatchError::NoProviderAvailable)));
}

#[tokio::test]
async fn unverified_or_unavailable_providers_are_not_dispatched() {
    let harness = DispatchHarness::new();
    harness
        .store
        .add_provider(ProviderBuilder::new().verified(false).build());
    harness
        .store
        .add_provider(ProviderBuilder::new().available(false).build());

    let outcome = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await;
    assert!(matches!(outcome, Err(DispatchError::NoProviderAvailable)));
}

#[tokio::test]
async fn reaper_reclaims_expired_locks_and_restores_availability() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();
    assert!(!harness.store.provider_available(provider));

    // Nothing to reap while the lock is fresh.
    assert_eq!(harness.reaper.sweep().await.unwrap().reaped, 0);

    // Default lock timeout is 5 minutes; step past it.
    harness.clock.advance(Duration::minutes(6));
    let report = harness.reaper.sweep().await.unwrap();
    assert_eq!(report.reaped, 1);

    let swept = harness.store.booking(booking.id).unwrap();
    assert!(!swept.is_locked());
    assert!(swept.locked_until().is_none());
    assert!(harness.store.provider_available(provider));

    // Idempotent: a second pass finds nothing.
    assert_eq!(harness.reaper.sweep().await.unwrap().reaped, 0);
}

#[tokio::test]
async fn expired_lock_frees_the_provider_for_the_next_emergency() {
    let harness = DispatchHarness::new();
    harness.store.add_provider(ProviderBuilder::new().build());

    harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    harness.clock.advance(Duration::minutes(6));
    harness.reaper.sweep().await.unwrap();

    // A fresh emergency can now reserve the same provider.
    let next = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(30),
            None,
        )
        .await;
    assert!(next.is_ok());
}

#[tokio::test]
async fn accept_ends_the_exclusivity_window_before_expiry() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let accepted = harness
        .lifecycle
        .accept(booking.id, Actor::Provider(provider))
        .await
        .unwrap();
    assert_eq!(accepted.status, BookingStatus::Accepted);
    assert!(!accepted.is_locked(), "acceptance clears the lock fields");
    // The provider stays busy (they are about to do the job) but the
    // reservation row is gone.
    assert!(!harness.store.provider_available(provider));
    assert!(harness.store.reservation_for(provider).is_none());
}

#[tokio::test]
async fn cancel_releases_the_lock_and_restores_availability() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let customer = CustomerId::new();
    let booking = harness
        .engine
        .create_emergency_booking(customer, plumbing(), mg_road(), Minutes::new(60), None)
        .await
        .unwrap();

    let cancelled = harness
        .lifecycle
        .cancel(booking.id, Actor::Customer(customer))
        .await
        .unwrap();
    assert_eq!(cancelled.status, BookingStatus::Cancelled);
    assert!(!cancelled.is_locked());
    assert!(harness.store.provider_available(provider));
}

#[tokio::test]
async fn started_booking_rejects_backward_transitions_without_mutation() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let actor = Actor::Provider(provider);
    harness.lifecycle.accept(booking.id, actor).await.unwrap();
    harness.lifecycle.start(booking.id, actor).await.unwrap();

    let outcome = harness.lifecycle.accept(booking.id, actor).await;
    match outcome {
        Err(DispatchError::InvalidTransition { current, requested }) => {
            assert_eq!(current, BookingStatus::Started);
            assert_eq!(requested, "accept");
        }
        other => panic!("expected InvalidTransition, got {other:?}"),
    }
    // No state was mutated by the failed attempt.
    let unchanged = harness.store.booking(booking.id).unwrap();
    assert_eq!(unchanged.status, BookingStatus::Started);
}

#[tokio::test]
async fn completion_with_actual_duration_recomputes_the_amount() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(
        ProviderBuilder::new()
            .hourly_rate(Money::from_major(600))
            .build(),
    );

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();
    assert_eq!(booking.total_amount, Money::from_major(600));

    let actor = Actor::Provider(provider);
    harness.lifecycle.accept(booking.id, actor).await.unwrap();
    harness.lifecycle.start(booking.id, actor).await.unwrap();
    let completed = harness
        .lifecycle
        .complete(booking.id, actor, Some(Minutes::new(90)))
        .await
        .unwrap();

    assert_eq!(completed.status, BookingStatus::Completed);
    assert_eq!(completed.actual_duration, Some(Minutes::new(90)));
    assert_eq!(completed.total_amount, Money::from_major(900));
    assert!(completed.completed_at.is_some());
    // Completion restores the provider's availability.
    assert!(harness.store.provider_available(provider));
}

#[tokio::test]
async fn completion_without_actual_duration_keeps_the_estimate() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let actor = Actor::Provider(provider);
    harness.lifecycle.accept(booking.id, actor).await.unwrap();
    harness.lifecycle.start(booking.id, actor).await.unwrap();
    let completed = harness
        .lifecycle
        .complete(booking.id, actor, None)
        .await
        .unwrap();

    assert_eq!(completed.total_amount, booking.total_amount);
    assert!(completed.actual_duration.is_none());
}

#[tokio::test]
async fn only_the_assigned_provider_may_accept() {
    let harness = DispatchHarness::new();
    harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let interloper = Actor::Provider(dispatch_core::ProviderId::new());
    let outcome = harness.lifecycle.accept(booking.id, interloper).await;
    assert!(matches!(outcome, Err(DispatchError::Forbidden { .. })));

    let unchanged = harness.store.booking(booking.id).unwrap();
    assert_eq!(unchanged.status, BookingStatus::Pending);
    assert!(unchanged.is_locked(), "failed authorization must not touch the lock");
}

#[tokio::test]
async fn manual_release_lock_is_idempotent() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    harness.lifecycle.release_lock(booking.id).await.unwrap();
    let released = harness.store.booking(booking.id).unwrap();
    assert!(!released.is_locked());
    assert!(harness.store.provider_available(provider));

    // Releasing again is a no-op.
    harness.lifecycle.release_lock(booking.id).await.unwrap();
}

#[tokio::test]
async fn standard_booking_validates_provider_flags() {
    let harness = DispatchHarness::new();
    let unavailable = harness
        .store
        .add_provider(ProviderBuilder::new().available(false).build());

    let outcome = harness
        .engine
        .create_booking(
            CustomerId::new(),
            unavailable,
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
            None,
            false,
        )
        .await;
    assert!(matches!(outcome, Err(DispatchError::Validation(_))));

    let unverified = harness
        .store
        .add_provider(ProviderBuilder::new().verified(false).build());
    let outcome = harness
        .engine
        .create_booking(
            CustomerId::new(),
            unverified,
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
            None,
            false,
        )
        .await;
    assert!(matches!(outcome, Err(DispatchError::Validation(_))));
}

#[tokio::test]
async fn standard_booking_runs_the_full_lifecycle() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let customer = CustomerId::new();
    let booking = harness
        .engine
        .create_booking(
            customer,
            provider,
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
            Some("leaky sink".to_string()),
            false,
        )
        .await
        .unwrap();
    assert!(!booking.is_emergency());
    assert_eq!(booking.status, BookingStatus::Pending);

    let actor = Actor::Provider(provider);
    let accepted = harness.lifecycle.accept(booking.id, actor).await.unwrap();
    assert_eq!(accepted.status, BookingStatus::Accepted);
    let started = harness.lifecycle.start(booking.id, actor).await.unwrap();
    assert!(started.started_at.is_some());
    let completed = harness
        .lifecycle
        .complete(booking.id, actor, None)
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);
}

#[tokio::test]
async fn duration_below_minimum_is_rejected() {
    let harness = DispatchHarness::new();
    harness.store.add_provider(ProviderBuilder::new().build());

    let outcome = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(10),
            None,
        )
        .await;
    assert!(matches!(outcome, Err(DispatchError::Validation(_))));
}

#[tokio::test]
async fn dispatch_emits_created_and_assigned_events() {
    use dispatch_core::DispatchEvent;

    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let events = harness.events.events();
    assert!(events.iter().any(|e| matches!(
        e,
        DispatchEvent::BookingCreated { booking: b } if b.id == booking.id
    )));
    assert!(events.iter().any(|e| matches!(
        e,
        DispatchEvent::ProviderAssigned { booking: b, provider: p }
            if *b == booking.id && *p == provider
    )));
}

#[tokio::test]
async fn reaper_emits_lock_expired_events() {
    use dispatch_core::DispatchEvent;

    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    harness.clock.advance(Duration::minutes(6));
    harness.reaper.sweep().await.unwrap();

    assert!(harness.events.events().iter().any(|e| matches!(
        e,
        DispatchEvent::LockExpired { booking: b, provider: p }
            if *b == booking.id && *p == provider
    )));
}

#[tokio::test]
async fn spawned_reaper_sweeps_and_stops_on_shutdown() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();
    harness.clock.advance(Duration::minutes(6));

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(1);
    let handle = harness
        .reaper
        .clone()
        .spawn(std::time::Duration::from_millis(10), shutdown_rx);

    // The first tick fires immediately; give the loop a moment to run.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    shutdown_tx.send(()).unwrap();
    handle.await.unwrap();

    let swept = harness.store.booking(booking.id).unwrap();
    assert!(!swept.is_locked());
    assert!(harness.store.provider_available(provider));
}

#[tokio::test]
async fn dispute_is_admin_only_and_terminal() {
    let harness = DispatchHarness::new();
    let provider = harness.store.add_provider(ProviderBuilder::new().build());

    let booking = harness
        .engine
        .create_emergency_booking(
            CustomerId::new(),
            plumbing(),
            mg_road(),
            Minutes::new(60),
            None,
        )
        .await
        .unwrap();

    let outcome = harness
        .lifecycle
        .dispute(booking.id, Actor::Provider(provider))
        .await;
    assert!(matches!(outcome, Err(DispatchError::Forbidden { .. })));

    let disputed = harness
        .lifecycle
        .dispute(booking.id, Actor::Admin)
        .await
        .unwrap();
    assert_eq!(disputed.status, BookingStatus::Disputed);
    assert!(!disputed.is_locked());
    assert!(harness.store.provider_available(provider));

    // Terminal: nothing more is allowed.
    let after = harness
        .lifecycle
        .cancel(booking.id, Actor::Admin)
        .await;
    assert!(matches!(after, Err(DispatchError::InvalidTransition { .. })));
}
