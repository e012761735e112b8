//! Broker (Icecast-compatible) supervision: installation detection,
//! configuration parsing and editing, process lifecycle, admin stats,
//! and the config-file watcher.

pub mod config;
pub mod detect;
pub mod stats;
pub mod supervisor;
pub mod watcher;

pub use config::{
    apply_edits, generate_template, parse_broker_config, BrokerConfig, BrokerConfigEdits,
    BrokerConfigError, DEFAULT_BROKER_PORT,
};
pub use detect::{detect_installation, BrokerInstallation, DetectOverrides};
pub use stats::{AdminError, BrokerAdminClient, BrokerStats, HttpBrokerAdminClient};
pub use supervisor::{BrokerState, BrokerStatusReport, BrokerSupervisor};
pub use watcher::ConfigWatcher;
