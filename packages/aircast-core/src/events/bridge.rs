//! Bridge implementation that maps domain events to broadcast transport.
//!
//! The [`BroadcastEventBridge`] lives at the boundary between domain
//! services and transport concerns, mapping typed domain events onto the
//! broadcast channel that the SSE endpoint subscribes to.

use tokio::sync::broadcast;

use super::emitter::EventEmitter;
use super::{BroadcastEvent, BrokerEvent, DeviceEvent, HealthEvent, StreamEvent};

/// Bridges domain events to the SSE broadcast channel.
///
/// Implements [`EventEmitter`] by forwarding events to a
/// `tokio::sync::broadcast` channel. Sending with no subscribers is normal
/// (no dashboard connected) and only traced.
#[derive(Clone)]
pub struct BroadcastEventBridge {
    tx: broadcast::Sender<BroadcastEvent>,
}

impl BroadcastEventBridge {
    /// Creates a new bridge with the given channel capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Returns a new receiver for the broadcast channel.
    ///
    /// The SSE handler uses this to subscribe to events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastEvent> {
        self.tx.subscribe()
    }
}

/// Generates an [`EventEmitter`] method that sends to the broadcast channel.
macro_rules! impl_emit {
    ($method:ident, $event_ty:ty, $variant:ident) => {
        fn $method(&self, event: $event_ty) {
            if let Err(e) = self.tx.send(BroadcastEvent::$variant(event)) {
                log::trace!("[EventBridge] No broadcast receivers: {}", e);
            }
        }
    };
}

impl EventEmitter for BroadcastEventBridge {
    impl_emit!(emit_stream, StreamEvent, Stream);
    impl_emit!(emit_broker, BrokerEvent, Broker);
    impl_emit!(emit_device, DeviceEvent, Device);
    impl_emit!(emit_health, HealthEvent, Health);
}
