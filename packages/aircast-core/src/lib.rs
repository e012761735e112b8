//! Aircast Core - shared library for the Aircast broadcasting controller.
//!
//! This crate provides the core functionality for Aircast, a LAN-local
//! multi-channel audio broadcasting controller. It supervises one encoder
//! subprocess per logical stream, feeds an Icecast-compatible broker over
//! the source protocol, and fronts the broker with a same-origin listener
//! proxy.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`broker`]: Broker installation detection, XML config, process lifecycle
//! - [`streams`]: Stream data model, persistence, lifecycle management
//! - [`encoder`]: Encoder subprocess spawning and supervision
//! - [`devices`]: Audio capture device discovery and name mapping
//! - [`diagnostics`]: Failure classification into actionable diagnoses
//! - [`api`]: HTTP surface (admin API, listener proxy, admin guard, SSE)
//! - [`events`]: Domain event system for real-time clients
//! - [`platform`]: OS process-control capability
//! - [`persist`]/[`config_store`]: Atomic JSON persistence
//! - [`bootstrap`]: Composition root
//!
//! # Abstraction Traits
//!
//! Core seams are trait-shaped so tests can substitute implementations:
//!
//! - [`BrokerAdminClient`](broker::BrokerAdminClient): broker admin HTTP
//! - [`ProcessControl`](platform::ProcessControl): OS process operations
//! - [`EventEmitter`](events::EventEmitter): domain event delivery
//! - [`BrokerGateway`](streams::BrokerGateway) /
//!   [`DeviceResolver`](streams::DeviceResolver): what the stream manager
//!   needs from its collaborators

#![warn(clippy::all)]

pub mod api;
pub mod bootstrap;
pub mod broker;
pub mod config_store;
pub mod context;
pub mod devices;
pub mod diagnostics;
pub mod encoder;
pub mod error;
pub mod events;
mod mdns_advertise;
pub mod persist;
pub mod platform;
pub mod services;
pub mod streams;
pub mod utils;

// Re-export commonly used types at the crate root
pub use api::{start_server, AppState, ServerError};
pub use bootstrap::{bootstrap_services, BootstrapConfig, BootstrappedServices, TokenSecret};
pub use broker::{BrokerConfig, BrokerState, BrokerStatusReport, BrokerSupervisor};
pub use context::{IpDetector, LanIpDetector, NetworkContext};
pub use devices::{Device, DeviceBackend, DeviceKind, DeviceService, DeviceSource};
pub use diagnostics::{classify, Diagnosis, DiagnosisCategory, Severity};
pub use error::{AircastError, AircastResult};
pub use events::{BroadcastEvent, BroadcastEventBridge, EventEmitter};
pub use services::{HealthProbe, HealthReport};
pub use streams::{StreamManager, StreamStats, StreamStatus};
pub use utils::now_millis;

/// The embedded listener page served at `GET /streams`.
///
/// Compiled in so the binary is self-contained; there is no asset
/// directory to deploy next to the executable.
pub static LISTENER_PAGE: &str = include_str!("../assets/listen.html");
