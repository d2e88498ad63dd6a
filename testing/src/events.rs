//! Recording event sink for asserting on emitted domain events.

use dispatch_core::{DispatchEvent, EventSink};
use dispatch_core::events::EventSinkError;
use std::sync::Mutex;

/// Sink that appends every published event to an in-memory log.
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    log: Mutex<Vec<DispatchEvent>>,
}

impl RecordingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            log: Mutex::new(Vec::new()),
        }
    }

    /// Snapshot of all events published so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<DispatchEvent> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    /// Number of events published so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.lock().map(|log| log.len()).unwrap_or(0)
    }

    /// Whether nothing has been published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingEventSink {
    async fn publish(&self, event: DispatchEvent) -> Result<(), EventSinkError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(event);
        }
        Ok(())
    }
}
