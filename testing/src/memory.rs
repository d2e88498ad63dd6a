//! In-memory backend implementing every storage seam plus the geo index.
//!
//! One mutex acquisition per store operation stands in for one atomic
//! database statement, so the conditional-update and
//! insert-if-no-active-lock contracts hold under concurrent tokio tasks
//! exactly as they do against `PostgreSQL`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dispatch_core::geo::{CandidateFilter, GeoIndex, GeoIndexError, GeoPoint};
use dispatch_core::store::{
    AcquireOutcome, BookingPatch, BookingStore, ConditionalUpdate,
    ProviderDirectory, ReservationStore, StoreError,
};
use dispatch_core::types::{
    Booking, BookingId, BookingStatus, ProviderId, ProviderReservation,
    ProviderSummary,
};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct Inner {
    bookings: HashMap<BookingId, Booking>,
    reservations: HashMap<ProviderId, ProviderReservation>,
    providers: HashMap<ProviderId, ProviderSummary>,
}

/// In-memory bookings, reservations, and providers behind one mutex.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("store mutex poisoned".to_string()))
    }

    /// Registers a provider; returns its id for convenience.
    ///
    /// # Panics
    ///
    /// Panics if the store mutex is poisoned (test-fixture setup only).
    #[allow(clippy::expect_used)]
    pub fn add_provider(&self, summary: ProviderSummary) -> ProviderId {
        let id = summary.id;
        self.inner
            .lock()
            .expect("store mutex poisoned")
            .providers
            .insert(id, summary);
        id
    }

    /// Current advisory availability of a provider (false if unknown).
    #[must_use]
    pub fn provider_available(&self, id: ProviderId) -> bool {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .providers
                    .get(&id)
                    .is_some_and(|provider| provider.is_available)
            })
            .unwrap_or(false)
    }

    /// Snapshot of a booking row.
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<Booking> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.bookings.get(&id).cloned())
    }

    /// Snapshot of the reservation row for a provider, if any.
    #[must_use]
    pub fn reservation_for(&self, provider: ProviderId) -> Option<ProviderReservation> {
        self.inner
            .lock()
            .ok()
            .and_then(|inner| inner.reservations.get(&provider).copied())
    }
}

#[async_trait]
impl BookingStore for InMemoryStore {
    async fn insert(&self, booking: Booking) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if inner.bookings.contains_key(&booking.id) {
            return Err(StoreError::DuplicateKey(booking.id.to_string()));
        }
        inner.bookings.insert(booking.id, booking);
        Ok(())
    }

    async fn fetch(&self, id: BookingId) -> Result<Option<Booking>, StoreError> {
        Ok(self.lock()?.bookings.get(&id).cloned())
    }

    async fn update_if(
        &self,
        id: BookingId,
        expected: &[BookingStatus],
        patch: BookingPatch,
    ) -> Result<ConditionalUpdate, StoreError> {
        let mut inner = self.lock()?;
        let Some(booking) = inner.bookings.get_mut(&id) else {
            return Err(StoreError::Backend(format!("booking {id} not found")));
        };
        if !expected.is_empty() && !expected.contains(&booking.status) {
            return Ok(ConditionalUpdate::Rejected {
                current: booking.status,
            });
        }
        patch.apply(booking);
        Ok(ConditionalUpdate::Applied(booking.clone()))
    }

    async fn sweep_expired_locks(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Booking>, StoreError> {
        let mut inner = self.lock()?;
        let mut affected = Vec::new();
        for booking in inner.bookings.values_mut() {
            let held_until = booking.locked_until();
            if let Some(until) = held_until {
                if until <= now {
                    BookingPatch::default().releasing_lock().apply(booking);
                    affected.push(booking.clone());
                }
            }
        }
        Ok(affected)
    }
}

#[async_trait]
impl ReservationStore for InMemoryStore {
    async fn try_acquire(
        &self,
        claim: ProviderReservation,
        now: DateTime<Utc>,
    ) -> Result<AcquireOutcome, StoreError> {
        let mut inner = self.lock()?;

        if let Some(existing) = inner.reservations.get(&claim.provider).copied() {
            let expired = existing.expires_at.is_expired(now);
            // A claim whose booking row does not exist yet is still being
            // dispatched and stays exclusive.
            let holder_active = inner
                .bookings
                .get(&existing.booking)
                .is_none_or(|booking| booking.status.can_hold_lock());
            if !expired && holder_active {
                return Ok(AcquireOutcome::Conflict { holder: existing });
            }
        }

        inner.reservations.insert(claim.provider, claim);
        Ok(AcquireOutcome::Granted(claim))
    }

    async fn release(
        &self,
        booking: BookingId,
    ) -> Result<Option<ProviderReservation>, StoreError> {
        let mut inner = self.lock()?;
        let provider = inner
            .reservations
            .values()
            .find(|claim| claim.booking == booking)
            .map(|claim| claim.provider);
        Ok(provider.and_then(|p| inner.reservations.remove(&p)))
    }
}

#[async_trait]
impl ProviderDirectory for InMemoryStore {
    async fn fetch(
        &self,
        id: ProviderId,
    ) -> Result<Option<ProviderSummary>, StoreError> {
        Ok(self.lock()?.providers.get(&id).cloned())
    }

    async fn set_available(
        &self,
        id: ProviderId,
        available: bool,
    ) -> Result<(), StoreError> {
        if let Some(provider) = self.lock()?.providers.get_mut(&id) {
            provider.is_available = available;
        }
        Ok(())
    }
}

#[async_trait]
impl GeoIndex for InMemoryStore {
    async fn find_candidates(
        &self,
        origin: GeoPoint,
        max_distance_m: f64,
        filter: &CandidateFilter,
        limit: usize,
    ) -> Result<Vec<ProviderSummary>, GeoIndexError> {
        let inner = self
            .inner
            .lock()
            .map_err(|_| GeoIndexError::QueryFailed("store mutex poisoned".to_string()))?;

        let mut candidates: Vec<ProviderSummary> = inner
            .providers
            .values()
            .filter(|provider| {
                (!filter.require_available || provider.is_available)
                    && (!filter.require_verified || provider.is_verified)
                    && provider.offers(&filter.service)
            })
            .map(|provider| {
                let mut ranked = provider.clone();
                ranked.distance_m = Some(origin.distance_m(&provider.current_location));
                ranked
            })
            .filter(|provider| {
                provider.distance_m.is_some_and(|d| d <= max_distance_m)
            })
            .collect();

        candidates.sort_by(|a, b| {
            let da = a.distance_m.unwrap_or(f64::INFINITY);
            let db = b.distance_m.unwrap_or(f64::INFINITY);
            da.partial_cmp(&db).unwrap_or(std::cmp::Ordering::Equal)
        });
        candidates.truncate(limit);
        Ok(candidates)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::ProviderBuilder;
    use dispatch_core::types::{LockExpiry, ServiceTag};

    fn claim(provider: ProviderId, offset_secs: i64) -> ProviderReservation {
        let now = Utc::now();
        ProviderReservation {
            provider,
            booking: BookingId::new(),
            expires_at: LockExpiry::new(now + chrono::Duration::seconds(offset_secs)),
            acquired_at: now,
        }
    }

    #[tokio::test]
    async fn concurrent_acquires_grant_exactly_one() {
        use std::sync::Arc;
        use tokio::sync::Barrier;

        let store = Arc::new(InMemoryStore::new());
        let provider = store.add_provider(ProviderBuilder::new().build());
        let barrier = Arc::new(Barrier::new(16));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let store = store.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                store
                    .try_acquire(claim(provider, 300), Utc::now())
                    .await
                    .unwrap()
            }));
        }

        let mut granted = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), AcquireOutcome::Granted(_)) {
                granted += 1;
            }
        }
        assert_eq!(granted, 1, "exactly one concurrent acquire may win");
    }

    #[tokio::test]
    async fn expired_claim_is_replaced() {
        let store = InMemoryStore::new();
        let provider = store.add_provider(ProviderBuilder::new().build());

        let stale = claim(provider, -1);
        assert!(matches!(
            store.try_acquire(stale, Utc::now()).await.unwrap(),
            AcquireOutcome::Granted(_)
        ));

        let fresh = claim(provider, 300);
        assert!(matches!(
            store.try_acquire(fresh, Utc::now()).await.unwrap(),
            AcquireOutcome::Granted(_)
        ));
    }

    #[tokio::test]
    async fn geo_index_orders_nearest_first_and_respects_radius() {
        let store = InMemoryStore::new();
        let origin = GeoPoint::new(77.5946, 12.9716);

        let near = store.add_provider(
            ProviderBuilder::new()
                .location(GeoPoint::new(77.60, 12.98))
                .build(),
        );
        let _far = store.add_provider(
            ProviderBuilder::new()
                // Mumbai: ~845 km away, outside a 50 km radius
                .location(GeoPoint::new(72.8777, 19.0760))
                .build(),
        );

        let filter = CandidateFilter::emergency(ServiceTag::new("Plumbing"));
        let found = store
            .find_candidates(origin, 50_000.0, &filter, 10)
            .await
            .unwrap();

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, near);
        assert!(found[0].distance_m.unwrap() < 50_000.0);
    }

    #[tokio::test]
    async fn geo_index_filters_unavailable_and_unverified() {
        let store = InMemoryStore::new();
        store.add_provider(ProviderBuilder::new().available(false).build());
        store.add_provider(ProviderBuilder::new().verified(false).build());

        let filter = CandidateFilter::emergency(ServiceTag::new("Plumbing"));
        let found = store
            .find_candidates(GeoPoint::new(77.5946, 12.9716), 50_000.0, &filter, 10)
            .await
            .unwrap();
        assert!(found.is_empty());
    }
}
