//! The single fan-in point every adapter emits through

use parking_lot::Mutex;

use crate::models::EventEnvelope;

/// Accepts normalized events from adapters, the sweeper and the command service.
///
/// `emit` must not block: implementations hand the event off and return.
pub trait EventSink: Send + Sync {
    fn emit(&self, envelope: EventEnvelope);
}

/// Sink that keeps every event in memory, for wiring adapters up in tests
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<EventEnvelope>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<EventEnvelope> {
        self.events.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, envelope: EventEnvelope) {
        self.events.lock().push(envelope);
    }
}
