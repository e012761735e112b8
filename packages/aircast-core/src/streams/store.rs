//! Persisted stream definitions: `streams.json`.
//!
//! One JSON document holds every stream definition plus a `_order` array
//! with the display order. Writes are atomic; the map is a `BTreeMap` so
//! repeated saves of the same state produce byte-identical files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::PersistedStream;
use crate::persist::{read_json, write_json_atomic};

const STREAMS_FILE: &str = "streams.json";

/// Current schema version of the document.
const SCHEMA_VERSION: u32 = 1;

fn default_version() -> u32 {
    SCHEMA_VERSION
}

/// The on-disk document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamsDocument {
    /// Schema version for forward migrations.
    #[serde(default = "default_version")]
    pub version: u32,
    /// Stream definitions keyed by id.
    #[serde(default)]
    pub streams: BTreeMap<String, PersistedStream>,
    /// Stream ids in display order.
    #[serde(rename = "_order", default)]
    pub order: Vec<String>,
    /// Fields written by newer versions; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Default for StreamsDocument {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION,
            streams: BTreeMap::new(),
            order: Vec::new(),
            extra: serde_json::Map::new(),
        }
    }
}

/// Owning store for the streams file.
pub struct StreamStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl StreamStore {
    /// Creates a store rooted at `data_dir`.
    #[must_use]
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(STREAMS_FILE),
            lock: Mutex::new(()),
        }
    }

    /// Loads the document; a missing file is an empty document, but a
    /// corrupt one is an error - stream definitions must not silently
    /// reset.
    pub fn load(&self) -> std::io::Result<StreamsDocument> {
        let _guard = self.lock.lock();
        Ok(read_json::<StreamsDocument>(&self.path)?.unwrap_or_default())
    }

    /// Persists the document atomically.
    pub fn save(&self, document: &StreamsDocument) -> std::io::Result<()> {
        let _guard = self.lock.lock();
        write_json_atomic(&self.path, document)
    }

    /// Raw file bytes, for byte-level comparisons in tests and backups.
    pub fn raw_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}
