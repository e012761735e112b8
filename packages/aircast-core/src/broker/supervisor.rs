//! Broker process lifecycle supervision.
//!
//! Responsibilities:
//! - Locate the broker installation and keep its paths cached
//! - Parse the broker XML and publish a read snapshot of its parameters
//! - Start/stop/restart the broker process with bounded escalation
//! - Watch the XML for edits and re-publish parameters without restarting
//! - Answer status queries with OS process liveness as the authority
//!
//! All lifecycle operations serialize through one async mutex; a restart
//! therefore always observes its own stop before starting.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::config::{
    apply_edits, generate_template, parse_broker_config, BrokerConfig, BrokerConfigEdits,
};
use super::detect::{detect_installation, BrokerInstallation, DetectOverrides};
use super::stats::{BrokerAdminClient, BrokerStats};
use super::watcher::ConfigWatcher;
use crate::config_store::DeviceConfigStore;
use crate::diagnostics::{classify, Diagnosis, DiagnosisContext};
use crate::encoder::{BrokerSourceTarget, StderrRing};
use crate::error::{AircastError, AircastResult};
use crate::events::{BrokerEvent, EventEmitter};
use crate::platform::ProcessControl;

/// How long `start()` waits for the admin endpoint before settling for
/// "starting".
const START_ASSERT_WINDOW: Duration = Duration::from_secs(8);

/// Poll cadence during start assertion and stop verification.
const LIFECYCLE_POLL: Duration = Duration::from_millis(500);

/// SIGTERM grace before escalating during stop.
const STOP_GRACE: Duration = Duration::from_secs(10);

/// Post-kill verification attempts (spaced by [`LIFECYCLE_POLL`]).
const STOP_VERIFY_RETRIES: u32 = 10;

/// Broker process state as exposed by `getStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BrokerState {
    Uninitialized,
    Stopped,
    Starting,
    Running,
}

/// Snapshot returned by [`BrokerSupervisor::get_status`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStatusReport {
    pub state: BrokerState,
    pub port: u16,
    pub hostname: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_listeners: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_sources: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<BrokerStats>,
}

/// Supervises the broker process and its configuration file.
pub struct BrokerSupervisor {
    admin: Arc<dyn BrokerAdminClient>,
    control: Arc<dyn ProcessControl>,
    store: Arc<DeviceConfigStore>,
    emitter: Arc<dyn EventEmitter>,
    overrides: DetectOverrides,

    /// Serializes start/stop/restart/configure.
    op_lock: Mutex<()>,

    config: RwLock<BrokerConfig>,
    installation: RwLock<Option<BrokerInstallation>>,
    /// Pid of the broker process we believe is alive (owned or adopted).
    pid: RwLock<Option<u32>>,
    started_at: RwLock<Option<Instant>>,
    manually_stopped: AtomicBool,
    initialized: AtomicBool,
    watcher: parking_lot::Mutex<Option<ConfigWatcher>>,
}

impl BrokerSupervisor {
    /// Creates an uninitialized supervisor.
    #[must_use]
    pub fn new(
        admin: Arc<dyn BrokerAdminClient>,
        control: Arc<dyn ProcessControl>,
        store: Arc<DeviceConfigStore>,
        emitter: Arc<dyn EventEmitter>,
        overrides: DetectOverrides,
    ) -> Self {
        Self {
            admin,
            control,
            store,
            emitter,
            overrides,
            op_lock: Mutex::new(()),
            config: RwLock::new(BrokerConfig::default()),
            installation: RwLock::new(None),
            pid: RwLock::new(None),
            started_at: RwLock::new(None),
            manually_stopped: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            watcher: parking_lot::Mutex::new(None),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Initialization
    // ─────────────────────────────────────────────────────────────────────

    /// Detects the installation, parses the XML, arms the config watcher
    /// and reconciles any already-running broker process. Idempotent.
    pub async fn initialize(self: &Arc<Self>) -> AircastResult<()> {
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }
        let _guard = self.op_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        let cached = self.store.load();
        let installation = detect_installation(&self.overrides, &cached)
            .map_err(|diagnosis| AircastError::External {
                message: "No broker installation found".to_string(),
                diagnosis: Some(diagnosis),
            })?;

        log::info!(
            "[Broker] Installation: exe={}, config={}",
            installation.exe_path.display(),
            installation.config_path.display()
        );

        if let Err(e) = self.store.update(|c| {
            c.broker_exe_path = Some(installation.exe_path.clone());
            c.broker_config_path = Some(installation.config_path.clone());
            c.source = installation.source;
        }) {
            log::warn!("[Broker] Failed to record installation paths: {}", e);
        }

        if installation.config_path.is_file() {
            self.reparse_config(&installation.config_path);
        }

        self.arm_watcher(self, &installation.config_path);
        *self.installation.write() = Some(installation);

        self.reconcile_existing().await;
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Re-parses the XML and publishes the new snapshot.
    fn reparse_config(&self, path: &std::path::Path) {
        let xml = match std::fs::read_to_string(path) {
            Ok(xml) => xml,
            Err(e) => {
                log::warn!("[Broker] Cannot read config {}: {}", path.display(), e);
                return;
            }
        };
        match parse_broker_config(&xml) {
            Ok(config) => {
                log::info!(
                    "[Broker] Parsed config: port={}, hostname={}",
                    config.port,
                    config.hostname
                );
                let access = config.access_log.clone().map(PathBuf::from);
                let error = config.error_log.clone().map(PathBuf::from);
                if let Err(e) = self
                    .store
                    .update(|c| c.sync_from_broker(config.port, access.clone(), error.clone()))
                {
                    log::warn!("[Broker] Failed to sync config cache: {}", e);
                }
                *self.config.write() = config;
            }
            Err(e) => log::warn!("[Broker] Config parse failed: {}", e),
        }
    }

    fn arm_watcher(&self, this: &Arc<Self>, config_path: &std::path::Path) {
        let weak = Arc::downgrade(this);
        let path = config_path.to_path_buf();
        match ConfigWatcher::spawn(config_path, move || {
            let Some(supervisor) = weak.upgrade() else {
                return;
            };
            supervisor.reparse_config(&path);
            let config = supervisor.config.read();
            supervisor.emitter.emit_broker(BrokerEvent::ConfigChanged {
                port: config.port,
                hostname: config.hostname.clone(),
            });
        }) {
            Ok(watcher) => *self.watcher.lock() = Some(watcher),
            Err(e) => log::warn!("[Broker] Config watcher unavailable: {}", e),
        }
    }

    /// Adopts a broker process that was already running when we started.
    async fn reconcile_existing(&self) {
        let (port, user, password) = {
            let config = self.config.read();
            (
                config.port,
                config.admin_user.clone(),
                config.admin_password.clone(),
            )
        };

        if let Some(pid) = self.scan_for_broker_pid() {
            log::info!("[Broker] Adopted running broker process (pid {})", pid);
            *self.pid.write() = Some(pid);
            return;
        }

        // Process scan came up empty but the admin port may still answer
        // (e.g. a service-managed broker under a different binary name).
        if self.admin.fetch_stats(port, &user, &password).await.is_ok() {
            log::info!(
                "[Broker] Admin endpoint on port {} is answering; broker managed externally",
                port
            );
        }
    }

    fn scan_for_broker_pid(&self) -> Option<u32> {
        // Match by the full executable path; a bare "icecast" needle would
        // also hit unrelated processes that merely mention the broker.
        let needle = {
            let installation = self.installation.read();
            installation
                .as_ref()
                .map(|i| i.exe_path.display().to_string())
        }?;

        let own_pid = std::process::id();
        self.control
            .find_processes_matching(&needle)
            .into_iter()
            .find(|&pid| pid != own_pid && self.control.is_process_alive(pid))
    }

    // ─────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ─────────────────────────────────────────────────────────────────────

    /// Starts the broker unless it is already running.
    ///
    /// A non-manual start is refused while the manually-stopped latch is
    /// set, so background reconciliation never overrides an operator stop.
    pub async fn start(self: &Arc<Self>, manual: bool) -> AircastResult<()> {
        let _guard = self.op_lock.lock().await;
        self.start_inner(manual).await
    }

    async fn start_inner(self: &Arc<Self>, manual: bool) -> AircastResult<()> {
        let installation = self.require_installation()?;

        if self.live_pid().is_some() {
            log::debug!("[Broker] Start requested but already running");
            return Ok(());
        }

        if !manual && self.manually_stopped.load(Ordering::SeqCst) {
            return Err(AircastError::Precondition {
                message: "The broker was stopped manually; start it explicitly to resume"
                    .to_string(),
                diagnosis: None,
            });
        }

        if !installation.config_path.is_file() {
            self.write_template_config(&installation)?;
        }
        self.reparse_config(&installation.config_path);

        let ring = Arc::new(StderrRing::new("broker"));
        let mut child = self.spawn_broker(&installation, &ring)?;
        let pid = child.id().ok_or_else(|| AircastError::External {
            message: "Broker exited immediately on spawn".to_string(),
            diagnosis: None,
        })?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(crate::encoder::stderr::pump_stderr(
                stderr,
                Arc::clone(&ring),
            ));
        }
        *self.pid.write() = Some(pid);

        // Exit watcher: reap, clear the pid, surface unexpected exits.
        {
            let this = Arc::downgrade(self);
            let ring = Arc::clone(&ring);
            tokio::spawn(async move {
                let status = child.wait().await;
                if let Some(supervisor) = this.upgrade() {
                    let was_tracked = supervisor.pid.write().take().is_some();
                    supervisor.started_at.write().take();
                    if was_tracked {
                        log::warn!(
                            "[Broker] Process exited: {:?}; stderr tail: {}",
                            status.ok(),
                            ring.contents()
                        );
                        supervisor.emitter.emit_broker(BrokerEvent::StateChanged {
                            state: "stopped".to_string(),
                        });
                    }
                }
            });
        }

        // Assert the broker comes up: admin answering, or at least the
        // process surviving the window ("starting").
        let (port, user, password) = {
            let config = self.config.read();
            (
                config.port,
                config.admin_user.clone(),
                config.admin_password.clone(),
            )
        };
        let deadline = tokio::time::Instant::now() + START_ASSERT_WINDOW;
        loop {
            if !self.control.is_process_alive(pid) {
                let stderr_tail = ring.contents();
                let diagnosis = classify(
                    &stderr_tail,
                    None,
                    &DiagnosisContext {
                        broker_port: Some(port),
                        ..Default::default()
                    },
                );
                log::error!("[Broker] Startup failed: {}", diagnosis.title);
                return Err(AircastError::External {
                    message: "Broker failed to start".to_string(),
                    diagnosis: Some(Box::new(diagnosis)),
                });
            }

            if self.admin.fetch_stats(port, &user, &password).await.is_ok() {
                break;
            }
            if tokio::time::Instant::now() >= deadline {
                log::warn!(
                    "[Broker] Admin endpoint silent after {:?}; treating as starting",
                    START_ASSERT_WINDOW
                );
                break;
            }
            tokio::time::sleep(LIFECYCLE_POLL).await;
        }

        *self.started_at.write() = Some(Instant::now());
        if manual {
            self.manually_stopped.store(false, Ordering::SeqCst);
        }
        self.emitter.emit_broker(BrokerEvent::StateChanged {
            state: "running".to_string(),
        });
        log::info!("[Broker] Started (pid {})", pid);
        Ok(())
    }

    fn spawn_broker(
        &self,
        installation: &BrokerInstallation,
        _ring: &Arc<StderrRing>,
    ) -> AircastResult<tokio::process::Child> {
        let exe = &installation.exe_path;
        let config = &installation.config_path;

        let is_batch = exe
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("bat") || ext.eq_ignore_ascii_case("cmd"));

        let mut command = if is_batch {
            // Windows batch wrappers need the shell.
            let mut c = Command::new("cmd");
            c.arg("/C").arg(exe).arg("-c").arg(config);
            c
        } else {
            let mut c = Command::new(exe);
            c.arg("-c").arg(config);
            c
        };

        if let Some(parent) = exe.parent() {
            command.current_dir(parent);
        }

        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| AircastError::External {
                message: format!("Failed to spawn broker: {e}"),
                diagnosis: None,
            })
    }

    fn write_template_config(&self, installation: &BrokerInstallation) -> AircastResult<()> {
        let mut config = self.config.read().clone();
        if config.source_password.is_empty() {
            config.source_password = uuid::Uuid::new_v4().simple().to_string();
        }
        if config.admin_password.is_empty() {
            config.admin_password = uuid::Uuid::new_v4().simple().to_string();
        }
        let xml = generate_template(&config);
        if let Some(parent) = installation.config_path.parent() {
            std::fs::create_dir_all(parent).map_err(AircastError::from)?;
        }
        std::fs::write(&installation.config_path, xml).map_err(AircastError::from)?;
        log::info!(
            "[Broker] Generated template config at {}",
            installation.config_path.display()
        );
        Ok(())
    }

    /// Stops the broker: SIGTERM, platform fallbacks, then a hard kill,
    /// verifying the process is actually gone.
    pub async fn stop(&self, manual: bool) -> AircastResult<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_inner(manual).await
    }

    async fn stop_inner(&self, manual: bool) -> AircastResult<()> {
        if manual {
            self.manually_stopped.store(true, Ordering::SeqCst);
        }

        let Some(pid) = self.live_pid() else {
            log::debug!("[Broker] Stop requested but not running");
            return Ok(());
        };

        log::info!("[Broker] Stopping (pid {})", pid);
        if let Err(e) = self.control.terminate(pid) {
            log::debug!("[Broker] Graceful terminate failed: {}", e);
        }

        let grace_deadline = tokio::time::Instant::now() + STOP_GRACE;
        while tokio::time::Instant::now() < grace_deadline {
            if !self.control.is_process_alive(pid) {
                self.finish_stop();
                return Ok(());
            }
            tokio::time::sleep(LIFECYCLE_POLL).await;
        }

        // Windows installs often run the broker as a service; ask the
        // service manager before the hard kill.
        if cfg!(windows) {
            let _ = std::process::Command::new("net")
                .args(["stop", "Icecast"])
                .status();
        }

        log::warn!("[Broker] Escalating to kill (pid {})", pid);
        if let Err(e) = self.control.kill_process_tree(pid) {
            log::warn!("[Broker] Kill failed: {}", e);
        }

        for _ in 0..STOP_VERIFY_RETRIES {
            if !self.control.is_process_alive(pid) {
                self.finish_stop();
                return Ok(());
            }
            tokio::time::sleep(LIFECYCLE_POLL).await;
        }

        Err(AircastError::External {
            message: format!("Broker process {pid} refused to die"),
            diagnosis: None,
        })
    }

    fn finish_stop(&self) {
        self.pid.write().take();
        self.started_at.write().take();
        self.emitter.emit_broker(BrokerEvent::StateChanged {
            state: "stopped".to_string(),
        });
        log::info!("[Broker] Stopped");
    }

    /// Stops (non-manual), waits for observable termination, then starts.
    pub async fn restart(self: &Arc<Self>, manual: bool) -> AircastResult<()> {
        let _guard = self.op_lock.lock().await;
        self.stop_inner(false).await?;
        self.start_inner(manual).await
    }

    /// Edits the broker XML in place and auto-restarts only when the broker
    /// is running and the operator hasn't stopped it manually.
    pub async fn configure(self: &Arc<Self>, edits: &BrokerConfigEdits) -> AircastResult<()> {
        if edits.is_empty() {
            return Err(AircastError::Validation(
                "No broker settings provided".to_string(),
            ));
        }
        let _guard = self.op_lock.lock().await;
        let installation = self.require_installation()?;

        let xml = std::fs::read_to_string(&installation.config_path).map_err(AircastError::from)?;
        let edited = apply_edits(&xml, edits);
        // Same atomic discipline as our own stores; a crash mid-write must
        // not leave the broker with half a config.
        let temp = installation.config_path.with_extension("xml.tmp");
        std::fs::write(&temp, &edited).map_err(AircastError::from)?;
        std::fs::rename(&temp, &installation.config_path).map_err(AircastError::from)?;

        self.reparse_config(&installation.config_path);

        let running = self.live_pid().is_some();
        if running && !self.manually_stopped.load(Ordering::SeqCst) {
            log::info!("[Broker] Config changed via configure(); restarting");
            self.stop_inner(false).await?;
            self.start_inner(false).await?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Status
    // ─────────────────────────────────────────────────────────────────────

    /// Reports current state. OS process liveness is authoritative: a dead
    /// process reports `stopped` no matter what HTTP said moments ago.
    pub async fn get_status(&self) -> BrokerStatusReport {
        let config = self.config.read().clone();
        let mut report = BrokerStatusReport {
            state: if self.initialized.load(Ordering::SeqCst) {
                BrokerState::Stopped
            } else {
                BrokerState::Uninitialized
            },
            port: config.port,
            hostname: config.hostname.clone(),
            max_listeners: config.max_listeners,
            max_sources: config.max_sources,
            pid: None,
            uptime_secs: None,
            stats: None,
        };

        let Some(pid) = self.live_pid() else {
            return report;
        };
        report.pid = Some(pid);
        report.uptime_secs = (*self.started_at.read()).map(|t| t.elapsed().as_secs());

        match self
            .admin
            .fetch_stats(config.port, &config.admin_user, &config.admin_password)
            .await
        {
            Ok(stats) => {
                report.state = BrokerState::Running;
                report.stats = Some(stats);
            }
            Err(e) => {
                log::debug!("[Broker] Admin probe failed while process alive: {}", e);
                report.state = BrokerState::Starting;
            }
        }
        report
    }

    /// Whether the broker is fully running (process + admin endpoint).
    pub async fn is_running(&self) -> bool {
        self.get_status().await.state == BrokerState::Running
    }

    /// Current source-connection parameters for encoders.
    #[must_use]
    pub fn source_target(&self) -> BrokerSourceTarget {
        let config = self.config.read();
        BrokerSourceTarget {
            port: config.port,
            source_password: config.source_password.clone(),
        }
    }

    /// Copy of the current parsed configuration.
    #[must_use]
    pub fn config_snapshot(&self) -> BrokerConfig {
        self.config.read().clone()
    }

    /// Whether `initialize()` has completed successfully.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// The detected installation, if initialized.
    #[must_use]
    pub fn installation(&self) -> Option<BrokerInstallation> {
        self.installation.read().clone()
    }

    fn require_installation(&self) -> AircastResult<BrokerInstallation> {
        self.installation.read().clone().ok_or_else(|| {
            AircastError::External {
                message: "Broker is not initialized".to_string(),
                diagnosis: Some(Box::new(Diagnosis::installation_not_found(&[]))),
            }
        })
    }

    /// Returns the tracked pid when the process is actually alive; clears
    /// stale pids as a side effect (the race guard from the status
    /// contract).
    fn live_pid(&self) -> Option<u32> {
        let pid = (*self.pid.read())?;
        if self.control.is_process_alive(pid) {
            Some(pid)
        } else {
            self.pid.write().take();
            self.started_at.write().take();
            None
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::broker::stats::AdminError;
    use crate::events::NoopEventEmitter;
    use crate::platform::testing::FakeProcessControl;
    use async_trait::async_trait;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Admin client whose answer is flipped by tests.
    struct FakeAdmin {
        reachable: std::sync::atomic::AtomicBool,
    }

    impl FakeAdmin {
        fn up() -> Arc<Self> {
            Arc::new(Self {
                reachable: std::sync::atomic::AtomicBool::new(true),
            })
        }

        fn down() -> Arc<Self> {
            Arc::new(Self {
                reachable: std::sync::atomic::AtomicBool::new(false),
            })
        }
    }

    #[async_trait]
    impl BrokerAdminClient for FakeAdmin {
        async fn fetch_stats(
            &self,
            _port: u16,
            _user: &str,
            _password: &str,
        ) -> Result<BrokerStats, AdminError> {
            if self.reachable.load(Ordering::SeqCst) {
                Ok(BrokerStats {
                    server_id: Some("Fake".into()),
                    listeners: Some(0),
                    sources: Some(0),
                    server_start: None,
                })
            } else {
                Err(AdminError::Unreachable("down".into()))
            }
        }
    }

    fn fake_broker_exe(dir: &std::path::Path) -> std::path::PathBuf {
        let path = dir.join("icecast");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\nsleep 60").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn supervisor_with(
        dir: &std::path::Path,
        admin: Arc<dyn BrokerAdminClient>,
    ) -> Arc<BrokerSupervisor> {
        let exe = fake_broker_exe(dir);
        let config_path = dir.join("icecast.xml");
        std::fs::write(
            &config_path,
            r#"<icecast>
    <authentication>
        <source-password>pw</source-password>
        <admin-user>admin</admin-user>
        <admin-password>apw</admin-password>
    </authentication>
    <hostname>localhost</hostname>
    <listen-socket><port>8000</port></listen-socket>
</icecast>"#,
        )
        .unwrap();

        Arc::new(BrokerSupervisor::new(
            admin,
            crate::platform::native(),
            Arc::new(DeviceConfigStore::new(dir)),
            Arc::new(NoopEventEmitter),
            DetectOverrides {
                exe_path: Some(exe),
                config_path: Some(config_path),
            },
        ))
    }

    #[tokio::test]
    async fn initialize_parses_config_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::down());

        supervisor.initialize().await.unwrap();
        supervisor.initialize().await.unwrap();

        let config = supervisor.config_snapshot();
        assert_eq!(config.port, 8000);
        assert_eq!(config.source_password, "pw");
        assert!(supervisor.is_initialized());
    }

    #[tokio::test]
    async fn start_reaches_running_when_admin_answers() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::up());
        supervisor.initialize().await.unwrap();

        supervisor.start(true).await.unwrap();
        let status = supervisor.get_status().await;
        assert_eq!(status.state, BrokerState::Running);
        assert!(status.pid.is_some());

        supervisor.stop(true).await.unwrap();
        let status = supervisor.get_status().await;
        assert_eq!(status.state, BrokerState::Stopped);
    }

    #[tokio::test]
    async fn manual_stop_blocks_automatic_start() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::up());
        supervisor.initialize().await.unwrap();

        supervisor.start(true).await.unwrap();
        supervisor.stop(true).await.unwrap();

        let err = supervisor.start(false).await.unwrap_err();
        assert!(matches!(err, AircastError::Precondition { .. }));

        // A manual start clears the latch.
        supervisor.start(true).await.unwrap();
        supervisor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn start_is_a_noop_when_already_running() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::up());
        supervisor.initialize().await.unwrap();

        supervisor.start(true).await.unwrap();
        let first_pid = supervisor.get_status().await.pid;
        supervisor.start(true).await.unwrap();
        assert_eq!(supervisor.get_status().await.pid, first_pid);

        supervisor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn status_reports_starting_when_admin_silent() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::down());
        supervisor.initialize().await.unwrap();

        // Track our own (alive) pid so liveness passes without going
        // through start() and its 8s assertion window.
        *supervisor.pid.write() = Some(std::process::id());
        let status = supervisor.get_status().await;
        assert_eq!(status.state, BrokerState::Starting);
    }

    #[tokio::test]
    async fn dead_pid_reports_stopped_regardless_of_cache() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::up());
        supervisor.initialize().await.unwrap();

        // A stale pid from a process that no longer exists.
        let control = FakeProcessControl::with_alive(&[]);
        assert!(!control.is_process_alive(99_999));
        *supervisor.pid.write() = Some(4_194_000);
        let status = supervisor.get_status().await;
        assert_eq!(status.state, BrokerState::Stopped);
        assert!(supervisor.pid.read().is_none());
    }

    #[tokio::test]
    async fn missing_config_generates_a_template() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_broker_exe(dir.path());
        let config_path = dir.path().join("fresh/icecast.xml");

        let supervisor = Arc::new(BrokerSupervisor::new(
            FakeAdmin::up() as Arc<dyn BrokerAdminClient>,
            crate::platform::native(),
            Arc::new(DeviceConfigStore::new(dir.path())),
            Arc::new(NoopEventEmitter),
            DetectOverrides {
                exe_path: Some(exe),
                config_path: Some(config_path.clone()),
            },
        ));
        supervisor.initialize().await.unwrap();
        supervisor.start(true).await.unwrap();

        assert!(config_path.is_file());
        let config = supervisor.config_snapshot();
        assert!(!config.source_password.is_empty());

        supervisor.stop(true).await.unwrap();
    }

    #[tokio::test]
    async fn source_target_tracks_parsed_port() {
        let dir = tempfile::tempdir().unwrap();
        let supervisor = supervisor_with(dir.path(), FakeAdmin::down());
        supervisor.initialize().await.unwrap();

        let target = supervisor.source_target();
        assert_eq!(target.port, 8000);
        assert_eq!(target.source_password, "pw");
    }
}
