//! Domain events emitted by the dispatch core.
//!
//! The core owns event emission; delivery to customers/providers (sockets,
//! push, email) belongs to an external subscriber. Publication is
//! best-effort and fire-and-forget: a sink failure is logged and never
//! rolls back a committed booking or lock state change.

use crate::types::{Booking, BookingId, BookingStatus, ProviderId};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

/// Events observable by the notification/REST collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum DispatchEvent {
    /// A booking was created (standard or emergency).
    BookingCreated {
        /// The booking as persisted
        booking: Box<Booking>,
    },
    /// A booking moved to a new lifecycle status.
    BookingStatusChanged {
        /// The booking that changed
        booking: BookingId,
        /// The status it now holds
        status: BookingStatus,
    },
    /// Emergency dispatch assigned a provider to a booking.
    ProviderAssigned {
        /// The booking
        booking: BookingId,
        /// The provider now reserved for it
        provider: ProviderId,
    },
    /// A provider reservation was released before expiry.
    LockReleased {
        /// The booking that held the claim
        booking: BookingId,
        /// The provider made available again
        provider: ProviderId,
    },
    /// The reaper reclaimed an expired reservation.
    LockExpired {
        /// The booking whose claim lapsed
        booking: BookingId,
        /// The provider made available again
        provider: ProviderId,
    },
}

/// Errors from an event sink.
#[derive(Error, Debug, Clone)]
pub enum EventSinkError {
    /// The sink could not accept the event.
    #[error("event publish failed: {0}")]
    PublishFailed(String),
}

/// Outbound event seam.
///
/// Implementations must not block the caller on delivery; slow transports
/// should buffer internally.
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    /// Publish one event.
    ///
    /// # Errors
    ///
    /// Returns [`EventSinkError`] if the event could not be handed off. The
    /// core logs and discards such failures.
    async fn publish(&self, event: DispatchEvent) -> Result<(), EventSinkError>;
}

/// Publish `event`, logging (not propagating) sink failures.
pub(crate) async fn emit(sink: &dyn EventSink, event: DispatchEvent) {
    if let Err(error) = sink.publish(event).await {
        tracing::warn!(%error, "dropping domain event after sink failure");
    }
}

/// In-process sink backed by a tokio broadcast channel.
///
/// Lossy by design: with no subscribers, or with a lagging subscriber,
/// events are dropped rather than applying backpressure to dispatch.
#[derive(Clone, Debug)]
pub struct BroadcastEventSink {
    sender: broadcast::Sender<DispatchEvent>,
}

impl BroadcastEventSink {
    /// Creates a sink buffering up to `capacity` events per subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to the event stream.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.sender.subscribe()
    }
}

#[async_trait::async_trait]
impl EventSink for BroadcastEventSink {
    async fn publish(&self, event: DispatchEvent) -> Result<(), EventSinkError> {
        // A send error only means there are currently no subscribers.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// Sink that discards every event. Useful when wiring the core without a
/// notification layer.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullEventSink;

#[async_trait::async_trait]
impl EventSink for NullEventSink {
    async fn publish(&self, _event: DispatchEvent) -> Result<(), EventSinkError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastEventSink::new(8);
        let mut rx = sink.subscribe();

        let booking = BookingId::new();
        sink.publish(DispatchEvent::BookingStatusChanged {
            booking,
            status: BookingStatus::Accepted,
        })
        .await
        .unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(
            received,
            DispatchEvent::BookingStatusChanged {
                booking,
                status: BookingStatus::Accepted,
            }
        );
    }

    #[tokio::test]
    async fn broadcast_sink_without_subscribers_is_ok() {
        let sink = BroadcastEventSink::new(8);
        let outcome = sink
            .publish(DispatchEvent::ProviderAssigned {
                booking: BookingId::new(),
                provider: ProviderId::new(),
            })
            .await;
        assert!(outcome.is_ok());
    }
}
