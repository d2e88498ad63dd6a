//! The lock reaper: periodic reclamation of expired reservations.
//!
//! Runs as an explicit scheduled task with its own shutdown signal, so
//! test harnesses and process shutdown can start and stop it
//! deterministically. Each sweep operates only on already-expired locks,
//! with the expiry predicate re-checked at write time by the store, so it
//! is safe to run concurrently with dispatch and lifecycle traffic and at
//! any cadence.
//!
//! Reaper failures are operational: they are logged, never surfaced to end
//! users, and only delay availability restoration until the next cycle.

use crate::environment::Clock;
use crate::events::{emit, DispatchEvent, EventSink};
use crate::ledger::{LockLedger, ReleaseCause};
use crate::metrics;
use crate::store::{BookingStore, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Result of one reaper pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SweepReport {
    /// Number of expired locks reclaimed in this pass
    pub reaped: usize,
}

/// Background sweep releasing expired locks and restoring availability.
#[derive(Clone)]
pub struct LockReaper {
    bookings: Arc<dyn BookingStore>,
    ledger: LockLedger,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl LockReaper {
    /// Creates a new `LockReaper`.
    #[must_use]
    pub fn new(
        bookings: Arc<dyn BookingStore>,
        ledger: LockLedger,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bookings,
            ledger,
            events,
            clock,
        }
    }

    /// One idempotent pass: clear every booking lock whose expiry has
    /// passed, release the backing reservations, restore availability, and
    /// emit a [`DispatchEvent::LockExpired`] per reclaimed booking.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] only if the sweep query itself fails.
    /// Per-booking release/restore failures are logged and skipped; the
    /// next cycle retries them.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let now = self.clock.now();
        let expired = self.bookings.sweep_expired_locks(now).await?;

        for booking in &expired {
            if let Err(error) = self
                .ledger
                .release(booking.id, ReleaseCause::Expired)
                .await
            {
                tracing::warn!(
                    booking = %booking.id,
                    provider = %booking.provider,
                    %error,
                    "failed to release expired reservation; will retry next sweep"
                );
                continue;
            }
            emit(
                self.events.as_ref(),
                DispatchEvent::LockExpired {
                    booking: booking.id,
                    provider: booking.provider,
                },
            )
            .await;
        }

        let reaped = expired.len();
        metrics::record_locks_reaped(reaped as u64);
        if reaped > 0 {
            tracing::info!(reaped, "lock reaper reclaimed expired reservations");
        }
        Ok(SweepReport { reaped })
    }

    /// Spawn the periodic sweep loop.
    ///
    /// Ticks every `interval` until a message (or close) arrives on
    /// `shutdown`. The first tick fires immediately, matching tokio's
    /// interval semantics; sweeps are idempotent so this is harmless.
    #[must_use]
    pub fn spawn(
        self,
        interval: Duration,
        mut shutdown: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(
                tokio::time::MissedTickBehavior::Delay,
            );
            tracing::info!(?interval, "lock reaper started");
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(error) = self.sweep().await {
                            tracing::error!(%error, "lock reaper sweep failed");
                        }
                    }
                    _ = shutdown.recv() => {
                        tracing::info!("lock reaper shutting down");
                        break;
                    }
                }
            }
        })
    }
}
