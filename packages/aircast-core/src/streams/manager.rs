//! Stream lifecycle management.
//!
//! The manager owns the stream set and is the only code that mutates it.
//! All mutating operations go through one writer lock; encoder I/O (spawn,
//! terminate, waits) always happens outside that lock. Device-conflict
//! checks (at most one stream per device in starting/running) are made
//! atomically at operation entry by reserving the device before the lock
//! is released.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::mpsc;

use super::store::{StreamStore, StreamsDocument};
use super::types::{
    CreateStreamSpec, PersistedStream, PublicStreamStatus, StreamEntry, StreamRuntime,
    StreamSource, StreamStats, StreamStatus, UpdateStreamPatch,
};
use crate::devices::DeviceBackend;
use crate::diagnostics::{classify, Diagnosis, DiagnosisContext};
use crate::encoder::{
    BrokerSourceTarget, EncoderExit, EncoderInput, EncoderProcess, SpawnParams, STARTUP_WINDOW,
};
use crate::error::{AircastError, AircastResult};
use crate::events::{EventEmitter, StreamEvent};
use crate::platform::ProcessControl;
use crate::utils::{normalize_name, now_millis, validate_stream_id};

/// Pause between operations in start-all/stop-all sweeps, so a burst of
/// source connections doesn't hammer the broker.
const SWEEP_DELAY: Duration = Duration::from_millis(150);

/// What the manager needs to know about the broker.
#[async_trait]
pub trait BrokerGateway: Send + Sync {
    /// Whether the broker is fully up (process + admin endpoint).
    async fn is_running(&self) -> bool;

    /// Current source-connection parameters from the parsed broker XML.
    fn source_target(&self) -> BrokerSourceTarget;
}

#[async_trait]
impl BrokerGateway for crate::broker::BrokerSupervisor {
    async fn is_running(&self) -> bool {
        // Fully qualified path resolves to the inherent method.
        crate::broker::BrokerSupervisor::is_running(self).await
    }

    fn source_target(&self) -> BrokerSourceTarget {
        crate::broker::BrokerSupervisor::source_target(self)
    }
}

/// What the manager needs to know about devices.
pub trait DeviceResolver: Send + Sync {
    /// Resolves a logical device id to `(backend name, backend)`.
    fn resolve_backend_name(&self, device_id: &str) -> Option<(String, DeviceBackend)>;
}

impl DeviceResolver for crate::devices::DeviceService {
    fn resolve_backend_name(&self, device_id: &str) -> Option<(String, DeviceBackend)> {
        crate::devices::DeviceService::resolve_backend_name(self, device_id)
    }
}

/// Per-stream outcome of a start-all / stop-all sweep.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepOutcome {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Owns the stream set and drives encoder lifecycles.
pub struct StreamManager {
    store: Arc<StreamStore>,
    streams: RwLock<HashMap<String, StreamEntry>>,
    broker: Arc<dyn BrokerGateway>,
    devices: Arc<dyn DeviceResolver>,
    control: Arc<dyn ProcessControl>,
    emitter: Arc<dyn EventEmitter>,
    encoder_exe: PathBuf,
    exit_tx: mpsc::UnboundedSender<EncoderExit>,
    /// Active listener-proxy connections per mount (shared with the proxy).
    listener_counts: Arc<DashMap<String, usize>>,
    /// Startup window; shortened by tests.
    startup_window: RwLock<Duration>,
}

impl StreamManager {
    /// Creates a manager and its encoder-exit pump.
    ///
    /// The returned manager is not yet populated; call
    /// [`StreamManager::initialize`] to load persisted streams and reap
    /// orphaned encoders.
    #[must_use]
    pub fn new(
        store: Arc<StreamStore>,
        broker: Arc<dyn BrokerGateway>,
        devices: Arc<dyn DeviceResolver>,
        control: Arc<dyn ProcessControl>,
        emitter: Arc<dyn EventEmitter>,
        encoder_exe: PathBuf,
        listener_counts: Arc<DashMap<String, usize>>,
    ) -> Arc<Self> {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let manager = Arc::new(Self {
            store,
            streams: RwLock::new(HashMap::new()),
            broker,
            devices,
            control,
            emitter,
            encoder_exe,
            exit_tx,
            listener_counts,
            startup_window: RwLock::new(STARTUP_WINDOW),
        });
        manager.spawn_exit_pump(exit_rx);
        manager
    }

    #[cfg(test)]
    pub(crate) fn set_startup_window(&self, window: Duration) {
        *self.startup_window.write() = window;
    }

    /// Loads persisted streams (all `stopped` + `needs_restart`) and kills
    /// orphaned encoder processes from a previous run.
    pub fn initialize(&self) -> AircastResult<()> {
        let document = self.store.load().map_err(|e| {
            AircastError::Fatal(format!("Stream store unreadable: {e}"))
        })?;

        {
            let mut streams = self.streams.write();
            for (id, persisted) in document.streams {
                streams.insert(
                    id,
                    StreamEntry {
                        persisted,
                        runtime: StreamRuntime {
                            status: Some(StreamStatus::Stopped),
                            needs_restart: true,
                            ..Default::default()
                        },
                    },
                );
            }
        }
        log::info!(
            "[Streams] Loaded {} persisted stream(s)",
            self.streams.read().len()
        );

        self.reap_orphans();
        Ok(())
    }

    /// Kills encoder processes left over from a previous orchestrator run.
    ///
    /// Adoption by pid was considered and rejected: a clean ground state is
    /// worth more than saving one stream restart.
    fn reap_orphans(&self) {
        let needle = self.broker.source_target().orphan_needle();
        let own_pid = std::process::id();
        for pid in self.control.find_processes_matching(&needle) {
            if pid == own_pid {
                continue;
            }
            log::warn!("[Streams] Killing orphaned encoder (pid {})", pid);
            if let Err(e) = self.control.kill_process_tree(pid) {
                log::warn!("[Streams] Failed to kill orphan {}: {}", pid, e);
            }
        }
    }

    fn spawn_exit_pump(self: &Arc<Self>, mut exit_rx: mpsc::UnboundedReceiver<EncoderExit>) {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(exit) = exit_rx.recv().await {
                let Some(manager) = weak.upgrade() else { break };
                manager.handle_encoder_exit(exit);
            }
        });
    }

    /// Applies an encoder exit to its stream.
    fn handle_encoder_exit(&self, exit: EncoderExit) {
        let mut streams = self.streams.write();
        let Some(entry) = streams.get_mut(&exit.stream_id) else {
            return;
        };

        // Ignore stale exits from an encoder this stream no longer owns
        // (a restart swapped in a new process before the old one reaped).
        let current_pid = entry.runtime.encoder.as_ref().map(|e| e.pid());
        if current_pid.is_some() && current_pid != Some(exit.pid) {
            return;
        }

        entry.runtime.encoder = None;
        entry.runtime.started_at = None;
        entry.runtime.last_exit_code = exit.exit_code;

        if exit.intentional || entry.runtime.intentionally_stopped {
            entry.runtime.status = Some(StreamStatus::Stopped);
            return;
        }

        let diagnosis = classify(
            &exit.stderr_tail,
            exit.exit_code,
            &self.diagnosis_context(&entry.persisted),
        );
        log::warn!(
            "[Streams] Encoder for '{}' exited unexpectedly: {}",
            exit.stream_id,
            diagnosis.title
        );
        self.emitter.emit_stream(StreamEvent::Failed {
            stream_id: exit.stream_id.clone(),
            title: diagnosis.title.clone(),
            category: diagnosis.category.as_str().to_string(),
        });
        entry.runtime.status = Some(StreamStatus::Error);
        entry.runtime.last_diagnosis = Some(diagnosis);
    }

    fn diagnosis_context(&self, persisted: &PersistedStream) -> DiagnosisContext {
        DiagnosisContext {
            device_id: persisted.device_id.clone(),
            device_name: persisted
                .device_id
                .as_deref()
                .and_then(|id| self.devices.resolve_backend_name(id))
                .map(|(name, _)| name),
            broker_port: Some(self.broker.source_target().port),
            stream_id: Some(persisted.id.clone()),
            backend: None,
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // CRUD
    // ─────────────────────────────────────────────────────────────────────

    /// Creates a stream definition. Does not start an encoder.
    pub fn create_stream(&self, spec: CreateStreamSpec) -> AircastResult<StreamStats> {
        validate_stream_id(&spec.id)
            .map_err(|e| AircastError::Validation(e.message()))?;

        let name = spec.name.trim().to_string();
        if name.is_empty() {
            return Err(AircastError::Validation("Name must not be empty".into()));
        }

        let source = match (&spec.device_id, &spec.input_file_path) {
            (Some(id), None) => StreamSource::Device(id.clone()),
            (None, Some(path)) => StreamSource::File(path.clone()),
            _ => {
                return Err(AircastError::Validation(
                    "Exactly one of deviceId or inputFilePath is required".into(),
                ))
            }
        };

        let mut encoding = super::types::EncodingConfig::default();
        if let Some(bitrate) = spec.bitrate_kbps {
            encoding.bitrate_kbps = bitrate;
        }
        if let Some(rate) = spec.sample_rate {
            encoding.sample_rate = rate;
        }
        if let Some(channels) = spec.channels {
            encoding.channels = channels;
        }
        encoding.validate().map_err(AircastError::Validation)?;

        let mut streams = self.streams.write();
        if streams.contains_key(&spec.id) {
            return Err(AircastError::Validation(format!(
                "Stream id '{}' already exists",
                spec.id
            )));
        }
        let normalized = normalize_name(&name);
        if let Some(existing) = streams
            .values()
            .find(|e| normalize_name(&e.persisted.name) == normalized)
        {
            return Err(AircastError::Duplicate(format!(
                "A stream named \"{}\" already exists",
                existing.persisted.name
            )));
        }

        let position = streams
            .values()
            .map(|e| e.persisted.position + 1)
            .max()
            .unwrap_or(0);

        let persisted = PersistedStream {
            id: spec.id.clone(),
            name,
            position,
            device_id: match &source {
                StreamSource::Device(id) => Some(id.clone()),
                StreamSource::File(_) => None,
            },
            input_file_path: match &source {
                StreamSource::File(path) => Some(path.clone()),
                StreamSource::Device(_) => None,
            },
            format: spec.format.unwrap_or_default(),
            encoding,
            created_at: now_millis(),
            extra: serde_json::Map::new(),
        };

        streams.insert(
            spec.id.clone(),
            StreamEntry {
                persisted,
                runtime: StreamRuntime {
                    status: Some(StreamStatus::Stopped),
                    ..Default::default()
                },
            },
        );
        self.persist_locked(&streams)?;
        drop(streams);

        log::info!("[Streams] Created '{}'", spec.id);
        self.emitter.emit_stream(StreamEvent::Created {
            stream_id: spec.id.clone(),
        });
        self.get_stream(&spec.id)
    }

    /// Updates name and/or source of a stream.
    pub async fn update_stream(
        &self,
        id: &str,
        patch: UpdateStreamPatch,
    ) -> AircastResult<StreamStats> {
        if patch.device_id.is_some() && patch.input_file_path.is_some() {
            return Err(AircastError::Validation(
                "Provide deviceId or inputFilePath, not both".into(),
            ));
        }

        let encoder_to_stop = {
            let mut streams = self.streams.write();
            let normalized_new_name = patch.name.as_deref().map(normalize_name);
            if let Some(ref normalized) = normalized_new_name {
                if normalized.is_empty() {
                    return Err(AircastError::Validation("Name must not be empty".into()));
                }
                if let Some(existing) = streams.values().find(|e| {
                    e.persisted.id != id && normalize_name(&e.persisted.name) == *normalized
                }) {
                    return Err(AircastError::Duplicate(format!(
                        "A stream named \"{}\" already exists",
                        existing.persisted.name
                    )));
                }
            }

            let entry = streams
                .get_mut(id)
                .ok_or_else(|| AircastError::NotFound(format!("Unknown stream '{id}'")))?;

            if let Some(name) = patch.name {
                entry.persisted.name = name.trim().to_string();
            }

            let source_changed = patch.device_id.is_some() || patch.input_file_path.is_some();
            if let Some(device_id) = patch.device_id {
                entry.persisted.device_id = Some(device_id);
                entry.persisted.input_file_path = None;
            } else if let Some(path) = patch.input_file_path {
                entry.persisted.input_file_path = Some(path);
                entry.persisted.device_id = None;
            }

            let was_error = entry.status() == StreamStatus::Error;
            let encoder = if source_changed || was_error {
                // Force a clean stopped state; the old capture target no
                // longer matches the definition.
                entry.runtime.intentionally_stopped = true;
                let encoder = entry.runtime.encoder.take();
                entry.runtime.clear_errors();
                entry.runtime.status = Some(StreamStatus::Stopped);
                entry.runtime.started_at = None;
                encoder
            } else {
                None
            };

            self.persist_locked(&streams)?;
            encoder
        };

        if let Some(encoder) = encoder_to_stop {
            encoder.terminate().await;
        }

        self.emitter.emit_stream(StreamEvent::Updated {
            stream_id: id.to_string(),
        });
        self.get_stream(id)
    }

    /// Deletes a stream, stopping it first if needed. The broker mount is
    /// not touched; it frees itself when the encoder disconnects.
    pub async fn delete_stream(&self, id: &str) -> AircastResult<()> {
        self.stop_stream(id).await?;

        let mut streams = self.streams.write();
        if streams.remove(id).is_none() {
            return Err(AircastError::NotFound(format!("Unknown stream '{id}'")));
        }
        self.persist_locked(&streams)?;
        drop(streams);

        self.listener_counts.remove(id);
        log::info!("[Streams] Deleted '{}'", id);
        self.emitter.emit_stream(StreamEvent::Deleted {
            stream_id: id.to_string(),
        });
        Ok(())
    }

    /// Reassigns positions by list index and persists.
    ///
    /// Streams not named in the list keep their relative order after the
    /// listed ones.
    pub fn reorder(&self, order: &[String]) -> AircastResult<()> {
        let mut streams = self.streams.write();
        for id in order {
            if !streams.contains_key(id) {
                return Err(AircastError::NotFound(format!("Unknown stream '{id}'")));
            }
        }

        for (index, id) in order.iter().enumerate() {
            if let Some(entry) = streams.get_mut(id) {
                entry.persisted.position = index as u32;
            }
        }

        // Renumber the rest after the listed block, preserving their order.
        let mut unlisted: Vec<(String, u32)> = streams
            .values()
            .filter(|e| !order.contains(&e.persisted.id))
            .map(|e| (e.persisted.id.clone(), e.persisted.position))
            .collect();
        unlisted.sort_by_key(|(_, position)| *position);
        for (offset, (id, _)) in unlisted.into_iter().enumerate() {
            if let Some(entry) = streams.get_mut(&id) {
                entry.persisted.position = (order.len() + offset) as u32;
            }
        }

        self.persist_locked(&streams)?;
        drop(streams);

        self.emitter.emit_stream(StreamEvent::Reordered {
            order: order.to_vec(),
        });
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Starts a stream's encoder after the pre-flight checks.
    pub async fn start_stream(self: &Arc<Self>, id: &str) -> AircastResult<StreamStats> {
        // Pre-flight 1+2 under the writer lock: existence, then device
        // conflict. Marking `starting` here reserves the device.
        let (source, encoding, format) = {
            let mut streams = self.streams.write();
            let conflict = {
                let entry = streams
                    .get(id)
                    .ok_or_else(|| AircastError::NotFound(format!("Unknown stream '{id}'")))?;

                if entry.status().holds_device() {
                    return Ok(self.stats_for(entry));
                }

                entry.persisted.device_id.as_deref().and_then(|device_id| {
                    streams
                        .values()
                        .find(|other| {
                            other.persisted.id != id
                                && other.persisted.device_id.as_deref() == Some(device_id)
                                && other.status().holds_device()
                        })
                        .map(|holder| (device_id.to_string(), holder.persisted.id.clone()))
                })
            };
            if let Some((device_id, holder)) = conflict {
                return Err(AircastError::precondition(Diagnosis::device_conflict(
                    &device_id, &holder,
                )));
            }

            let entry = streams.get_mut(id).expect("checked above");
            let source = entry.persisted.source().ok_or_else(|| {
                AircastError::Validation(format!("Stream '{id}' has an inconsistent source"))
            })?;
            entry.runtime.status = Some(StreamStatus::Starting);
            entry.runtime.intentionally_stopped = false;
            entry.runtime.clear_errors();
            (source, entry.persisted.encoding, entry.persisted.format)
        };

        // Pre-flights 3+4 and the spawn happen outside the lock; on any
        // failure the reservation is rolled back.
        let result = self
            .start_preflight_and_spawn(id, &source, &encoding, format)
            .await;

        match result {
            Ok(encoder) => {
                let mut streams = self.streams.write();
                if let Some(entry) = streams.get_mut(id) {
                    entry.runtime.status = Some(StreamStatus::Running);
                    entry.runtime.started_at = Some(Instant::now());
                    entry.runtime.needs_restart = false;
                    entry.runtime.encoder = Some(encoder);
                }
                drop(streams);
                log::info!("[Streams] '{}' is running", id);
                self.emitter.emit_stream(StreamEvent::Started {
                    stream_id: id.to_string(),
                });
                self.get_stream(id)
            }
            Err(e) => {
                let mut streams = self.streams.write();
                if let Some(entry) = streams.get_mut(id) {
                    match &e {
                        // Refusals leave the stream cleanly stopped.
                        AircastError::Precondition { .. } | AircastError::Validation(_) => {
                            entry.runtime.status = Some(StreamStatus::Stopped);
                        }
                        // Real failures carry a diagnosis into error state.
                        err => {
                            entry.runtime.status = Some(StreamStatus::Error);
                            entry.runtime.last_diagnosis = err.diagnosis().cloned();
                        }
                    }
                }
                drop(streams);
                if let AircastError::External { ref diagnosis, .. } = e {
                    if let Some(d) = diagnosis {
                        self.emitter.emit_stream(StreamEvent::Failed {
                            stream_id: id.to_string(),
                            title: d.title.clone(),
                            category: d.category.as_str().to_string(),
                        });
                    }
                }
                Err(e)
            }
        }
    }

    async fn start_preflight_and_spawn(
        &self,
        id: &str,
        source: &StreamSource,
        encoding: &super::types::EncodingConfig,
        format: super::types::StreamFormat,
    ) -> AircastResult<Arc<EncoderProcess>> {
        if !self.broker.is_running().await {
            return Err(AircastError::precondition(Diagnosis::broker_unavailable()));
        }

        if !self.encoder_exe.is_file() && which::which(&self.encoder_exe).is_err() {
            return Err(AircastError::Precondition {
                message: format!(
                    "Encoder binary not available: {}",
                    self.encoder_exe.display()
                ),
                diagnosis: None,
            });
        }

        let resolved;
        let input = match source {
            StreamSource::Device(device_id) => {
                resolved = self
                    .devices
                    .resolve_backend_name(device_id)
                    .ok_or_else(|| {
                        AircastError::external(Diagnosis::device_not_mapped(device_id))
                    })?;
                EncoderInput::Device {
                    backend: resolved.1,
                    backend_name: &resolved.0,
                }
            }
            StreamSource::File(path) => EncoderInput::File(path),
        };

        let target = self.broker.source_target();
        let context = DiagnosisContext {
            device_id: source.device_id().map(str::to_string),
            device_name: match &input {
                EncoderInput::Device { backend_name, .. } => Some((*backend_name).to_string()),
                EncoderInput::File(_) => None,
            },
            broker_port: Some(target.port),
            stream_id: Some(id.to_string()),
            backend: match &input {
                EncoderInput::Device { backend, .. } => Some(backend.as_str().to_string()),
                EncoderInput::File(_) => None,
            },
        };

        let startup_window = *self.startup_window.read();
        EncoderProcess::spawn(
            SpawnParams {
                stream_id: id,
                encoder_exe: &self.encoder_exe,
                input,
                encoding,
                preferred_format: format,
                target: &target,
                context,
                startup_window,
            },
            Arc::clone(&self.control),
            self.exit_tx.clone(),
        )
        .await
        .map_err(|diagnosis| AircastError::External {
            message: diagnosis.description.clone(),
            diagnosis: Some(diagnosis),
        })
    }

    /// Stops a stream. Idempotent: stopping a stopped stream succeeds.
    pub async fn stop_stream(&self, id: &str) -> AircastResult<StreamStats> {
        let encoder = {
            let mut streams = self.streams.write();
            let entry = streams
                .get_mut(id)
                .ok_or_else(|| AircastError::NotFound(format!("Unknown stream '{id}'")))?;
            entry.runtime.intentionally_stopped = true;
            entry.runtime.encoder.take()
        };

        if let Some(encoder) = encoder {
            encoder.terminate().await;
        }

        {
            let mut streams = self.streams.write();
            if let Some(entry) = streams.get_mut(id) {
                entry.runtime.status = Some(StreamStatus::Stopped);
                entry.runtime.started_at = None;
            }
        }
        log::info!("[Streams] '{}' stopped", id);
        self.emitter.emit_stream(StreamEvent::Stopped {
            stream_id: id.to_string(),
        });
        self.get_stream(id)
    }

    /// Stops then starts, re-running every pre-flight check.
    pub async fn restart_stream(self: &Arc<Self>, id: &str) -> AircastResult<StreamStats> {
        self.stop_stream(id).await?;
        self.start_stream(id).await
    }

    /// Stops every running stream, pacing the operations.
    pub async fn stop_all(&self) -> Vec<SweepOutcome> {
        let ids = self.ids_where(|e| e.status().holds_device());
        let mut outcomes = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(SWEEP_DELAY).await;
            }
            let result = self.stop_stream(&id).await;
            outcomes.push(Self::sweep_outcome(id, result.map(|_| ())));
        }
        outcomes
    }

    /// Starts every stopped stream, pacing the operations.
    pub async fn start_all_stopped(self: &Arc<Self>) -> Vec<SweepOutcome> {
        let ids = self.ids_where(|e| e.status() == StreamStatus::Stopped);
        let mut outcomes = Vec::with_capacity(ids.len());
        for (index, id) in ids.into_iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(SWEEP_DELAY).await;
            }
            let result = self.start_stream(&id).await;
            outcomes.push(Self::sweep_outcome(id, result.map(|_| ())));
        }
        outcomes
    }

    /// Ids of streams matching a predicate, in display order.
    fn ids_where(&self, predicate: impl Fn(&StreamEntry) -> bool) -> Vec<String> {
        let streams = self.streams.read();
        let mut matching: Vec<&StreamEntry> = streams.values().filter(|e| predicate(e)).collect();
        matching.sort_by_key(|e| e.persisted.position);
        matching.iter().map(|e| e.persisted.id.clone()).collect()
    }

    fn sweep_outcome(id: String, result: AircastResult<()>) -> SweepOutcome {
        match result {
            Ok(()) => SweepOutcome {
                id,
                ok: true,
                error: None,
            },
            Err(e) => SweepOutcome {
                id,
                ok: false,
                error: Some(e.to_string()),
            },
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Views
    // ─────────────────────────────────────────────────────────────────────

    /// Stats view for one stream.
    pub fn get_stream(&self, id: &str) -> AircastResult<StreamStats> {
        let streams = self.streams.read();
        streams
            .get(id)
            .map(|entry| self.stats_for(entry))
            .ok_or_else(|| AircastError::NotFound(format!("Unknown stream '{id}'")))
    }

    /// Stats for all streams, in display order.
    #[must_use]
    pub fn get_stats(&self) -> Vec<StreamStats> {
        let streams = self.streams.read();
        let mut stats: Vec<StreamStats> = streams.values().map(|e| self.stats_for(e)).collect();
        stats.sort_by_key(|s| s.position);
        stats
    }

    /// Public subset (listener page), in display order.
    #[must_use]
    pub fn public_status(&self) -> Vec<PublicStreamStatus> {
        let streams = self.streams.read();
        let mut statuses: Vec<PublicStreamStatus> = streams
            .values()
            .map(|e| PublicStreamStatus {
                id: e.persisted.id.clone(),
                name: e.persisted.name.clone(),
                status: e.status(),
                position: e.persisted.position,
            })
            .collect();
        statuses.sort_by_key(|s| s.position);
        statuses
    }

    /// Whether a stream id exists (used by the listener proxy).
    #[must_use]
    pub fn stream_exists(&self, id: &str) -> bool {
        self.streams.read().contains_key(id)
    }

    fn stats_for(&self, entry: &StreamEntry) -> StreamStats {
        StreamStats {
            id: entry.persisted.id.clone(),
            name: entry.persisted.name.clone(),
            status: entry.status(),
            device_id: entry.persisted.device_id.clone(),
            position: entry.persisted.position,
            uptime_secs: entry.runtime.started_at.map(|t| t.elapsed().as_secs()),
            last_error: entry.runtime.last_diagnosis.as_ref().map(Diagnosis::short_form),
            needs_restart: entry.runtime.needs_restart,
            listeners: self
                .listener_counts
                .get(&entry.persisted.id)
                .map(|c| *c)
                .unwrap_or(0),
        }
    }

    /// Rebuilds and saves the persisted document. Caller holds the lock.
    fn persist_locked(&self, streams: &HashMap<String, StreamEntry>) -> AircastResult<()> {
        let mut document = StreamsDocument::default();
        let mut ordered: Vec<&StreamEntry> = streams.values().collect();
        ordered.sort_by_key(|e| e.persisted.position);
        for entry in ordered {
            document.order.push(entry.persisted.id.clone());
            document
                .streams
                .insert(entry.persisted.id.clone(), entry.persisted.clone());
        }
        self.store.save(&document).map_err(|e| {
            AircastError::External {
                message: format!("Failed to persist streams: {e}"),
                diagnosis: None,
            }
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::diagnostics::DiagnosisCategory;
    use crate::events::NoopEventEmitter;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct FakeBroker {
        running: AtomicBool,
        port: u16,
    }

    impl FakeBroker {
        /// Each test broker gets its own port so concurrent tests' orphan
        /// scans (which match on the source URL) never cross wires.
        fn next_port() -> u16 {
            static NEXT: std::sync::atomic::AtomicU16 = std::sync::atomic::AtomicU16::new(18_000);
            NEXT.fetch_add(1, Ordering::SeqCst)
        }

        fn up() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(true),
                port: Self::next_port(),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                running: AtomicBool::new(false),
                port: Self::next_port(),
            })
        }
    }

    #[async_trait]
    impl BrokerGateway for FakeBroker {
        async fn is_running(&self) -> bool {
            self.running.load(Ordering::SeqCst)
        }

        fn source_target(&self) -> BrokerSourceTarget {
            BrokerSourceTarget {
                port: self.port,
                source_password: "pw".into(),
            }
        }
    }

    struct FakeDevices;

    impl DeviceResolver for FakeDevices {
        fn resolve_backend_name(&self, device_id: &str) -> Option<(String, DeviceBackend)> {
            match device_id {
                "dev-1" => Some(("Device One".into(), DeviceBackend::AlsaOrPulse)),
                "dev-2" => Some(("Device Two".into(), DeviceBackend::AlsaOrPulse)),
                _ => None,
            }
        }
    }

    fn fake_encoder(dir: &std::path::Path, body: &str) -> PathBuf {
        let path = dir.join("fake-ffmpeg.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn manager_with(
        dir: &std::path::Path,
        broker: Arc<dyn BrokerGateway>,
        encoder_body: &str,
    ) -> Arc<StreamManager> {
        let manager = StreamManager::new(
            Arc::new(StreamStore::new(dir)),
            broker,
            Arc::new(FakeDevices),
            crate::platform::native(),
            Arc::new(NoopEventEmitter),
            fake_encoder(dir, encoder_body),
            Arc::new(DashMap::new()),
        );
        manager.set_startup_window(Duration::from_millis(300));
        manager.initialize().unwrap();
        manager
    }

    fn device_spec(id: &str, name: &str, device: &str) -> CreateStreamSpec {
        CreateStreamSpec {
            id: id.into(),
            name: name.into(),
            device_id: Some(device.into()),
            input_file_path: None,
            bitrate_kbps: None,
            format: None,
            sample_rate: None,
            channels: None,
        }
    }

    #[tokio::test]
    async fn create_assigns_positions_and_starts_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");

        let a = manager
            .create_stream(device_spec("english", "English", "dev-1"))
            .unwrap();
        assert_eq!(a.position, 0);
        assert_eq!(a.status, StreamStatus::Stopped);

        let b = manager
            .create_stream(device_spec("music", "Music", "dev-2"))
            .unwrap();
        assert_eq!(b.position, 1);
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected_case_and_trim_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");

        manager
            .create_stream(device_spec("a", "Main", "dev-1"))
            .unwrap();
        let err = manager
            .create_stream(device_spec("b", "  main  ", "dev-2"))
            .unwrap_err();
        assert!(matches!(err, AircastError::Duplicate(_)));
    }

    #[tokio::test]
    async fn create_requires_exactly_one_source() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");

        let mut both = device_spec("a", "A", "dev-1");
        both.input_file_path = Some(PathBuf::from("x.wav"));
        assert!(matches!(
            manager.create_stream(both),
            Err(AircastError::Validation(_))
        ));

        let mut neither = device_spec("b", "B", "dev-1");
        neither.device_id = None;
        assert!(matches!(
            manager.create_stream(neither),
            Err(AircastError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn create_rejects_url_unsafe_ids_and_bad_bitrates() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");

        assert!(matches!(
            manager.create_stream(device_spec("Bad Id", "X", "dev-1")),
            Err(AircastError::Validation(_))
        ));

        let mut spec = device_spec("ok", "X", "dev-1");
        spec.bitrate_kbps = Some(1000);
        assert!(matches!(
            manager.create_stream(spec),
            Err(AircastError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn start_refuses_when_broker_is_down() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();

        let err = manager.start_stream("a").await.unwrap_err();
        assert_eq!(err.category(), "broker-unavailable");
        // Refusal rolls the reservation back to stopped, not error.
        assert_eq!(
            manager.get_stream("a").unwrap().status,
            StreamStatus::Stopped
        );
    }

    #[tokio::test]
    async fn start_runs_and_stop_kills_the_encoder() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::up(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();

        let stats = manager.start_stream("a").await.unwrap();
        assert_eq!(stats.status, StreamStatus::Running);

        let pid = {
            let streams = manager.streams.read();
            streams["a"].runtime.encoder.as_ref().unwrap().pid()
        };
        assert!(manager.control.is_process_alive(pid));

        let stats = manager.stop_stream("a").await.unwrap();
        assert_eq!(stats.status, StreamStatus::Stopped);
        assert!(!manager.control.is_process_alive(pid));
    }

    #[tokio::test]
    async fn device_conflict_names_the_holder() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::up(), "sleep 30");
        manager
            .create_stream(device_spec("s1", "First", "dev-1"))
            .unwrap();
        manager
            .create_stream(device_spec("s2", "Second", "dev-1"))
            .unwrap();

        manager.start_stream("s1").await.unwrap();
        let err = manager.start_stream("s2").await.unwrap_err();
        assert_eq!(err.category(), "device-conflict");
        let diagnosis = err.diagnosis().unwrap();
        assert!(diagnosis.title.contains("already in use by: s1"));

        manager.stop_stream("s1").await.unwrap();
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();

        let first = manager.stop_stream("a").await.unwrap();
        let second = manager.stop_stream("a").await.unwrap();
        assert_eq!(first.status, StreamStatus::Stopped);
        assert_eq!(second.status, StreamStatus::Stopped);
    }

    #[tokio::test]
    async fn unmapped_device_fails_with_device_not_mapped() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::up(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-unknown"))
            .unwrap();

        let err = manager.start_stream("a").await.unwrap_err();
        assert_eq!(err.category(), "device-not-mapped");
        assert_eq!(manager.get_stream("a").unwrap().status, StreamStatus::Error);
    }

    #[tokio::test]
    async fn unexpected_exit_transitions_to_error_with_diagnosis() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(
            dir.path(),
            FakeBroker::up(),
            "sleep 0.6\necho 'connection refused' >&2\nexit 1",
        );
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();

        manager.start_stream("a").await.unwrap();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let status = manager.get_stream("a").unwrap().status;
            if status == StreamStatus::Error {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "stream never reached error, status={status:?}"
            );
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        let stats = manager.get_stream("a").unwrap();
        let error = stats.last_error.unwrap();
        assert_eq!(error.category, DiagnosisCategory::Connection);
    }

    #[tokio::test]
    async fn persisted_streams_reload_stopped_in_order() {
        let dir = tempfile::tempdir().unwrap();
        {
            let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
            manager
                .create_stream(device_spec("x", "X", "dev-1"))
                .unwrap();
            manager
                .create_stream(device_spec("y", "Y", "dev-2"))
                .unwrap();
            manager
                .create_stream(device_spec("z", "Z", "dev-1"))
                .unwrap();
            manager
                .reorder(&["z".into(), "x".into(), "y".into()])
                .unwrap();
        }

        // Fresh manager over the same store simulates an orchestrator restart.
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        let stats = manager.get_stats();
        let ids: Vec<&str> = stats.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "x", "y"]);
        assert!(stats
            .iter()
            .all(|s| s.status == StreamStatus::Stopped && s.needs_restart));
    }

    #[tokio::test]
    async fn reorder_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("x", "X", "dev-1"))
            .unwrap();
        manager
            .create_stream(device_spec("y", "Y", "dev-2"))
            .unwrap();

        let order = vec!["y".to_string(), "x".to_string()];
        manager.reorder(&order).unwrap();
        let first = manager.store.raw_bytes().unwrap();
        manager.reorder(&order).unwrap();
        let second = manager.store.raw_bytes().unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn create_then_delete_restores_store_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("keep", "Keep", "dev-1"))
            .unwrap();
        let before = manager.store.raw_bytes().unwrap();

        manager
            .create_stream(device_spec("temp", "Temp", "dev-2"))
            .unwrap();
        manager.delete_stream("temp").await.unwrap();

        let after = manager.store.raw_bytes().unwrap();
        assert_eq!(before, after);
    }

    #[tokio::test]
    async fn update_rename_checks_uniqueness_excluding_self() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("a", "Alpha", "dev-1"))
            .unwrap();
        manager
            .create_stream(device_spec("b", "Beta", "dev-2"))
            .unwrap();

        // Renaming to its own name is fine.
        manager
            .update_stream(
                "a",
                UpdateStreamPatch {
                    name: Some("ALPHA".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        // Colliding with another stream is not.
        let err = manager
            .update_stream(
                "b",
                UpdateStreamPatch {
                    name: Some(" alpha ".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AircastError::Duplicate(_)));
    }

    #[tokio::test]
    async fn update_device_change_clears_error_state() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::up(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-unknown"))
            .unwrap();

        // Drive into error via the unmapped device.
        let _ = manager.start_stream("a").await;
        assert_eq!(manager.get_stream("a").unwrap().status, StreamStatus::Error);

        let stats = manager
            .update_stream(
                "a",
                UpdateStreamPatch {
                    device_id: Some("dev-1".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(stats.status, StreamStatus::Stopped);
        assert!(stats.last_error.is_none());
    }

    #[tokio::test]
    async fn deleted_stream_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::down(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();
        manager.delete_stream("a").await.unwrap();

        assert!(matches!(
            manager.start_stream("a").await,
            Err(AircastError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stop_all_reports_per_stream_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let manager = manager_with(dir.path(), FakeBroker::up(), "sleep 30");
        manager
            .create_stream(device_spec("a", "A", "dev-1"))
            .unwrap();
        manager
            .create_stream(device_spec("b", "B", "dev-2"))
            .unwrap();

        manager.start_stream("a").await.unwrap();
        manager.start_stream("b").await.unwrap();

        let outcomes = manager.stop_all().await;
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.ok));
        assert!(manager
            .get_stats()
            .iter()
            .all(|s| s.status == StreamStatus::Stopped));
    }
}
