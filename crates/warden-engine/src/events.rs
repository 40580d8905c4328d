//! Outcome broadcasting

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;
use warden_types::{MemberId, WardenEvent, WardenEventEnvelope};

use crate::clock::Clock;

/// Fan-out of engine events to any number of subscribers.
///
/// Publishing never fails: with no subscribers the event is dropped.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WardenEventEnvelope>,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx, clock }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WardenEventEnvelope> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: WardenEvent) {
        self.send(WardenEventEnvelope::new(event));
    }

    pub fn emit_by(&self, actor: MemberId, event: WardenEvent) {
        self.send(WardenEventEnvelope::new(event).with_actor(actor));
    }

    fn send(&self, envelope: WardenEventEnvelope) {
        let envelope = envelope.with_timestamp(self.clock.now());
        trace!(source = ?envelope.source, event = %envelope.event, "Emitting event");
        let _ = self.tx.send(envelope);
    }
}
