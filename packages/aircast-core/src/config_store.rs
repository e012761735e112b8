//! Persisted device-config cache: last-known-good broker paths and port.
//!
//! This document is a cache, never an authority. The broker XML is the
//! source of truth for the port; the cache only lets the next startup skip
//! the detection walk. Passwords are never written here.

use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::persist::{read_json, write_json_atomic};
use crate::utils::now_iso8601;

const DEVICE_CONFIG_FILE: &str = "device-config.json";

/// Current schema version of the document.
const SCHEMA_VERSION: u32 = 1;

/// How a cached broker path was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    /// Environment variable override.
    EnvOverride,
    /// Platform-standard installation path.
    StandardPath,
    /// Found on PATH.
    PathLookup,
    /// Recorded by the user via the admin API.
    Custom,
    /// Not yet detected.
    #[default]
    Unknown,
}

/// Cached broker installation facts. Serialized atomically; unknown fields
/// from newer schema versions are preserved across load/save cycles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceConfig {
    /// Schema version for forward migrations.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Path to the broker executable.
    pub broker_exe_path: Option<PathBuf>,
    /// Path to the broker XML configuration.
    pub broker_config_path: Option<PathBuf>,
    /// Broker access log path, when the XML declares one.
    pub access_log_path: Option<PathBuf>,
    /// Broker error log path, when the XML declares one.
    pub error_log_path: Option<PathBuf>,
    /// Last port parsed from the broker XML.
    pub port: Option<u16>,
    /// ISO-8601 timestamp of the last successful validation.
    pub last_validated_iso: Option<String>,
    /// How the paths were discovered.
    #[serde(default)]
    pub source: DetectionSource,
    /// Fields written by newer versions; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

fn default_version() -> u32 {
    SCHEMA_VERSION
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            broker_exe_path: None,
            broker_config_path: None,
            access_log_path: None,
            error_log_path: None,
            port: None,
            last_validated_iso: None,
            source: DetectionSource::default(),
            extra: serde_json::Map::new(),
        }
    }
}

impl DeviceConfig {
    /// Re-syncs cached values from a fresh XML parse.
    ///
    /// Called on every parse so the cache can never drift from the XML.
    pub fn sync_from_broker(
        &mut self,
        port: u16,
        access_log: Option<PathBuf>,
        error_log: Option<PathBuf>,
    ) {
        self.port = Some(port);
        self.access_log_path = access_log;
        self.error_log_path = error_log;
        self.last_validated_iso = Some(now_iso8601());
    }
}

/// Owning store for the device-config cache file.
///
/// All writes are serialized through an internal mutex and go through the
/// atomic write helper.
pub struct DeviceConfigStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl DeviceConfigStore {
    /// Creates a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(DEVICE_CONFIG_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Loads the cached document, or a default when absent or unreadable.
    ///
    /// A corrupt cache is only a lost optimization, so unlike the stream
    /// store it degrades to defaults instead of failing.
    #[must_use]
    pub fn load(&self) -> DeviceConfig {
        let _guard = self.lock.lock();
        match read_json::<DeviceConfig>(&self.path) {
            Ok(Some(config)) => config,
            Ok(None) => DeviceConfig::default(),
            Err(e) => {
                log::warn!(
                    "[ConfigStore] Unreadable device config cache ({}), using defaults: {}",
                    self.path.display(),
                    e
                );
                DeviceConfig::default()
            }
        }
    }

    /// Persists the document atomically.
    pub fn save(&self, config: &DeviceConfig) -> std::io::Result<()> {
        let _guard = self.lock.lock();
        write_json_atomic(&self.path, config)
    }

    /// Loads, applies `mutate`, and saves in one locked step.
    pub fn update(&self, mutate: impl FnOnce(&mut DeviceConfig)) -> std::io::Result<DeviceConfig> {
        let _guard = self.lock.lock();
        let mut config = match read_json::<DeviceConfig>(&self.path) {
            Ok(Some(config)) => config,
            _ => DeviceConfig::default(),
        };
        mutate(&mut config);
        write_json_atomic(&self.path, &config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceConfigStore::new(dir.path());
        let config = store.load();
        assert_eq!(config.broker_exe_path, None);
        assert_eq!(config.source, DetectionSource::Unknown);
    }

    #[test]
    fn update_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let store = DeviceConfigStore::new(dir.path());

        store
            .update(|c| {
                c.broker_exe_path = Some(PathBuf::from("/usr/bin/icecast2"));
                c.port = Some(8000);
                c.source = DetectionSource::PathLookup;
            })
            .unwrap();

        let loaded = store.load();
        assert_eq!(
            loaded.broker_exe_path,
            Some(PathBuf::from("/usr/bin/icecast2"))
        );
        assert_eq!(loaded.port, Some(8000));
        assert_eq!(loaded.source, DetectionSource::PathLookup);
    }

    #[test]
    fn unknown_fields_survive_a_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(DEVICE_CONFIG_FILE);
        std::fs::write(
            &path,
            r#"{"version":2,"port":8100,"futureField":{"a":1}}"#,
        )
        .unwrap();

        let store = DeviceConfigStore::new(dir.path());
        let config = store.load();
        store.save(&config).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["futureField"]["a"], 1);
        assert_eq!(raw["version"], 2);
    }

    #[test]
    fn sync_from_broker_stamps_validation_time() {
        let mut config = DeviceConfig::default();
        config.sync_from_broker(8200, None, None);
        assert_eq!(config.port, Some(8200));
        assert!(config.last_validated_iso.is_some());
    }

    #[test]
    fn passwords_never_appear_in_the_schema() {
        // Compile-time shape guard: serializing a default document must not
        // contain any password-like key.
        let json = serde_json::to_string(&DeviceConfig::default()).unwrap();
        let lower = json.to_lowercase();
        assert!(!lower.contains("password"));
        assert!(!lower.contains("secret"));
    }
}
