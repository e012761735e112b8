//! Event emitter abstraction for decoupling services from transport.
//!
//! Services depend on the [`EventEmitter`] trait rather than concrete
//! broadcast channels, enabling testing and alternative transports.

use super::{BrokerEvent, DeviceEvent, HealthEvent, StreamEvent};

/// Trait for emitting domain events without knowledge of transport.
pub trait EventEmitter: Send + Sync {
    /// Emits a stream lifecycle event.
    fn emit_stream(&self, event: StreamEvent);

    /// Emits a broker supervisor event.
    fn emit_broker(&self, event: BrokerEvent);

    /// Emits a device discovery event.
    fn emit_device(&self, event: DeviceEvent);

    /// Emits a health probe event.
    fn emit_health(&self, event: HealthEvent);
}

/// No-op emitter for tests and headless tools.
pub struct NoopEventEmitter;

impl EventEmitter for NoopEventEmitter {
    fn emit_stream(&self, _event: StreamEvent) {}

    fn emit_broker(&self, _event: BrokerEvent) {}

    fn emit_device(&self, _event: DeviceEvent) {}

    fn emit_health(&self, _event: HealthEvent) {}
}

/// Logging emitter for debugging and development.
pub struct LoggingEventEmitter;

impl EventEmitter for LoggingEventEmitter {
    fn emit_stream(&self, event: StreamEvent) {
        tracing::debug!(?event, "stream_event");
    }

    fn emit_broker(&self, event: BrokerEvent) {
        tracing::debug!(?event, "broker_event");
    }

    fn emit_device(&self, event: DeviceEvent) {
        tracing::debug!(?event, "device_event");
    }

    fn emit_health(&self, event: HealthEvent) {
        tracing::debug!(?event, "health_event");
    }
}
