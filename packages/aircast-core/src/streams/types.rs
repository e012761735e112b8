//! Stream data model: persisted definition, runtime state, wire shapes.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::diagnostics::{Diagnosis, DiagnosisSummary};
use crate::encoder::EncoderProcess;

/// Default bitrate for new streams.
pub const DEFAULT_BITRATE_KBPS: u32 = 192;
/// Allowed bitrate range.
pub const BITRATE_RANGE_KBPS: std::ops::RangeInclusive<u32> = 32..=320;
/// Default sample rate for new streams.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
/// Default channel count for new streams.
pub const DEFAULT_CHANNELS: u8 = 2;

/// Output format, in cascade preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamFormat {
    #[default]
    Mp3,
    Aac,
    Ogg,
}

impl StreamFormat {
    /// Next format in the unknown-encoder cascade, if any.
    #[must_use]
    pub fn next_fallback(self) -> Option<Self> {
        match self {
            Self::Mp3 => Some(Self::Aac),
            Self::Aac => Some(Self::Ogg),
            Self::Ogg => None,
        }
    }

    /// Encoder codec name.
    #[must_use]
    pub fn codec(self) -> &'static str {
        match self {
            Self::Mp3 => "libmp3lame",
            Self::Aac => "aac",
            Self::Ogg => "libvorbis",
        }
    }

    /// Container muxer name.
    #[must_use]
    pub fn container(self) -> &'static str {
        match self {
            Self::Mp3 => "mp3",
            Self::Aac => "adts",
            Self::Ogg => "ogg",
        }
    }

    /// MIME type sent to the broker and listeners.
    #[must_use]
    pub fn content_type(self) -> &'static str {
        match self {
            Self::Mp3 => "audio/mpeg",
            Self::Aac => "audio/aac",
            Self::Ogg => "application/ogg",
        }
    }
}

/// Encoding parameters for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodingConfig {
    pub bitrate_kbps: u32,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for EncodingConfig {
    fn default() -> Self {
        Self {
            bitrate_kbps: DEFAULT_BITRATE_KBPS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

impl EncodingConfig {
    /// Validates ranges; returns a human-readable refusal on violation.
    pub fn validate(&self) -> Result<(), String> {
        if !BITRATE_RANGE_KBPS.contains(&self.bitrate_kbps) {
            return Err(format!(
                "bitrateKbps must be between {} and {}",
                BITRATE_RANGE_KBPS.start(),
                BITRATE_RANGE_KBPS.end()
            ));
        }
        if self.channels != 1 && self.channels != 2 {
            return Err("channels must be 1 or 2".to_string());
        }
        if self.sample_rate == 0 {
            return Err("sampleRate must be positive".to_string());
        }
        Ok(())
    }
}

/// A stream's audio source: exactly one of a capture device or a file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamSource {
    /// Capture from a device, referenced by logical id.
    Device(String),
    /// Read from a file at native rate.
    File(PathBuf),
}

impl StreamSource {
    /// Returns the device id when the source is a device.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Device(id) => Some(id),
            Self::File(_) => None,
        }
    }
}

/// Stream status as exposed to the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Stopped,
    Starting,
    Running,
    Error,
    Deleted,
}

impl StreamStatus {
    /// Whether the stream currently holds (or is acquiring) its device.
    #[must_use]
    pub fn holds_device(self) -> bool {
        matches!(self, Self::Starting | Self::Running)
    }
}

/// Persisted fields of a stream, as stored in `streams.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedStream {
    pub id: String,
    pub name: String,
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_file_path: Option<PathBuf>,
    #[serde(default)]
    pub format: StreamFormat,
    #[serde(flatten)]
    pub encoding: EncodingConfig,
    /// Unix millis of creation.
    pub created_at: u64,
    /// Fields written by newer versions; carried through untouched.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PersistedStream {
    /// Returns the source, if the persisted fields are coherent.
    #[must_use]
    pub fn source(&self) -> Option<StreamSource> {
        match (&self.device_id, &self.input_file_path) {
            (Some(id), None) => Some(StreamSource::Device(id.clone())),
            (None, Some(path)) => Some(StreamSource::File(path.clone())),
            _ => None,
        }
    }
}

/// Runtime-only stream state. Never serialized; `intentionally_stopped`
/// in particular is internal and not surfaced to the API.
#[derive(Default)]
pub struct StreamRuntime {
    pub status: Option<StreamStatus>,
    /// Set for persisted streams re-loaded after an orchestrator restart.
    pub needs_restart: bool,
    pub intentionally_stopped: bool,
    pub started_at: Option<Instant>,
    pub last_exit_code: Option<i64>,
    pub last_diagnosis: Option<Diagnosis>,
    /// Live encoder handle while starting/running.
    pub encoder: Option<Arc<EncoderProcess>>,
}

impl StreamRuntime {
    /// Resets error state and drops the encoder handle.
    pub fn clear_errors(&mut self) {
        self.last_exit_code = None;
        self.last_diagnosis = None;
        self.encoder = None;
    }
}

/// One stream as held by the manager: persisted definition + runtime.
pub struct StreamEntry {
    pub persisted: PersistedStream,
    pub runtime: StreamRuntime,
}

impl StreamEntry {
    /// Effective status (`stopped` when never started).
    #[must_use]
    pub fn status(&self) -> StreamStatus {
        self.runtime.status.unwrap_or(StreamStatus::Stopped)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Wire Shapes
// ─────────────────────────────────────────────────────────────────────────────

/// Body of `POST /api/streams`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateStreamSpec {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub input_file_path: Option<PathBuf>,
    #[serde(default)]
    pub bitrate_kbps: Option<u32>,
    #[serde(default)]
    pub format: Option<StreamFormat>,
    #[serde(default)]
    pub sample_rate: Option<u32>,
    #[serde(default)]
    pub channels: Option<u8>,
}

/// Body of `PATCH /api/streams/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateStreamPatch {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub input_file_path: Option<PathBuf>,
}

/// Per-stream stats for `GET /api/streams`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamStats {
    pub id: String,
    pub name: String,
    pub status: StreamStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    pub position: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<DiagnosisSummary>,
    /// Whether the stream should be restarted after an orchestrator restart.
    pub needs_restart: bool,
    /// Active listener-proxy connections for this mount.
    pub listeners: usize,
}

/// Public subset for `GET /api/streams/status`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicStreamStatus {
    pub id: String,
    pub name: String,
    pub status: StreamStatus,
    pub position: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_cascade_ends_at_ogg() {
        assert_eq!(StreamFormat::Mp3.next_fallback(), Some(StreamFormat::Aac));
        assert_eq!(StreamFormat::Aac.next_fallback(), Some(StreamFormat::Ogg));
        assert_eq!(StreamFormat::Ogg.next_fallback(), None);
    }

    #[test]
    fn encoding_defaults_are_valid() {
        assert!(EncodingConfig::default().validate().is_ok());
    }

    #[test]
    fn encoding_rejects_out_of_range_bitrate() {
        let low = EncodingConfig {
            bitrate_kbps: 16,
            ..Default::default()
        };
        assert!(low.validate().is_err());
        let high = EncodingConfig {
            bitrate_kbps: 400,
            ..Default::default()
        };
        assert!(high.validate().is_err());
    }

    #[test]
    fn encoding_rejects_bad_channel_counts() {
        let bad = EncodingConfig {
            channels: 6,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn persisted_source_requires_exactly_one() {
        let mut stream = PersistedStream {
            id: "a".into(),
            name: "A".into(),
            position: 0,
            device_id: Some("dev".into()),
            input_file_path: None,
            format: StreamFormat::Mp3,
            encoding: EncodingConfig::default(),
            created_at: 0,
            extra: serde_json::Map::new(),
        };
        assert!(matches!(stream.source(), Some(StreamSource::Device(_))));

        stream.input_file_path = Some(PathBuf::from("music.wav"));
        assert!(stream.source().is_none());

        stream.device_id = None;
        assert!(matches!(stream.source(), Some(StreamSource::File(_))));
    }

    #[test]
    fn runtime_is_not_serializable_by_construction() {
        // StreamRuntime carries process handles and the internal
        // intentionally_stopped flag; the compile-time absence of Serialize
        // is the guarantee. This test documents the surface instead: stats
        // are built from an allowlist of fields.
        let stats = StreamStats {
            id: "a".into(),
            name: "A".into(),
            status: StreamStatus::Stopped,
            device_id: None,
            position: 0,
            uptime_secs: None,
            last_error: None,
            needs_restart: false,
            listeners: 0,
        };
        let json = serde_json::to_value(&stats).unwrap();
        assert!(json.get("intentionallyStopped").is_none());
    }
}
