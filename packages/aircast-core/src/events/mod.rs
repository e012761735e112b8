//! Event system for real-time admin-client communication.
//!
//! This module provides:
//! - [`EventEmitter`] trait for domain services to emit events
//! - Event types for the stream, broker, device and health domains
//!
//! The transport (an SSE endpoint in the `api` module) subscribes through
//! [`BroadcastEventBridge`]; services never know how events are delivered.

mod bridge;
mod emitter;

pub use bridge::BroadcastEventBridge;
pub use emitter::{EventEmitter, LoggingEventEmitter, NoopEventEmitter};

use serde::Serialize;

/// Events broadcast to connected admin clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "category", rename_all = "camelCase")]
pub enum BroadcastEvent {
    /// Stream lifecycle events.
    Stream(StreamEvent),
    /// Broker supervisor events.
    Broker(BrokerEvent),
    /// Device discovery events.
    Device(DeviceEvent),
    /// Health probe reports.
    Health(HealthEvent),
}

/// Stream lifecycle events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// A stream definition was created.
    Created {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// A stream reached `running`.
    Started {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// A stream was stopped by request.
    Stopped {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// A stream failed; the diagnosis title summarizes why.
    Failed {
        #[serde(rename = "streamId")]
        stream_id: String,
        title: String,
        category: String,
    },
    /// A stream definition was updated.
    Updated {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// A stream definition was deleted.
    Deleted {
        #[serde(rename = "streamId")]
        stream_id: String,
    },
    /// Display order changed.
    Reordered {
        order: Vec<String>,
    },
}

/// Broker supervisor events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum BrokerEvent {
    /// The broker process state changed.
    StateChanged {
        state: String,
    },
    /// The broker XML changed on disk and was re-parsed.
    ConfigChanged {
        port: u16,
        hostname: String,
    },
}

/// Device discovery events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeviceEvent {
    /// A device refresh completed.
    Refreshed {
        count: usize,
    },
}

/// Health probe events.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HealthEvent {
    /// A periodic health check completed.
    Checked {
        overall: String,
    },
}
