//! Stream domain: data model, persistence, and lifecycle management.

pub mod manager;
pub mod store;
pub mod types;

pub use manager::{BrokerGateway, DeviceResolver, StreamManager, SweepOutcome};
pub use store::{StreamStore, StreamsDocument};
pub use types::{
    CreateStreamSpec, EncodingConfig, PersistedStream, PublicStreamStatus, StreamEntry,
    StreamFormat, StreamSource, StreamStats, StreamStatus, UpdateStreamPatch,
};
