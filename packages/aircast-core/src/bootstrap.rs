//! Application bootstrap and dependency wiring.
//!
//! This module contains the composition root - the single place where all
//! services are instantiated and wired together. This pattern provides:
//!
//! - **Clarity**: All dependency relationships are visible in one place
//! - **Testability**: Easy to swap implementations for testing
//! - **Maintainability**: Service creation logic is isolated from usage

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerSupervisor, DetectOverrides, HttpBrokerAdminClient};
use crate::config_store::DeviceConfigStore;
use crate::context::{LanIpDetector, NetworkContext};
use crate::devices::DeviceService;
use crate::error::AircastResult;
use crate::events::BroadcastEventBridge;
use crate::platform;
use crate::services::HealthProbe;
use crate::streams::{StreamManager, StreamStore};

/// Capacity of the event broadcast channel.
const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Connect timeout for the shared HTTP client. No global request timeout:
/// the listener proxy streams bodies indefinitely; bounded waits are set
/// per request where they apply.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Inputs to the composition root, resolved by the binary from CLI, config
/// file and environment.
#[derive(Debug, Clone, Default)]
pub struct BootstrapConfig {
    /// Directory for persisted state (`streams.json`, `device-config.json`).
    pub data_dir: PathBuf,
    /// `BROKER_EXE_PATH` override.
    pub broker_exe_override: Option<PathBuf>,
    /// `BROKER_CONFIG_PATH` override.
    pub broker_config_override: Option<PathBuf>,
    /// Encoder executable override; PATH lookup of `ffmpeg` otherwise.
    pub encoder_exe: Option<PathBuf>,
    /// Fixed LAN address to advertise; auto-detected otherwise.
    pub advertise_ip: Option<IpAddr>,
    /// `TOKEN_SIGNING_SECRET`, when configured.
    pub token_signing_secret: Option<String>,
}

/// The bearer-token signing secret for the external auth layer.
///
/// Held in memory only; never persisted (same discipline as the broker
/// passwords).
pub struct TokenSecret {
    value: String,
    generated: bool,
}

impl TokenSecret {
    /// Uses the configured secret, or generates a process-lifetime random
    /// one with a warning.
    #[must_use]
    pub fn resolve(configured: Option<String>) -> Self {
        match configured {
            Some(value) if !value.is_empty() => Self {
                value,
                generated: false,
            },
            _ => {
                log::warn!(
                    "TOKEN_SIGNING_SECRET is not set; using a process-lifetime random secret. \
                     Admin sessions will not survive a restart."
                );
                Self {
                    value: uuid::Uuid::new_v4().simple().to_string(),
                    generated: true,
                }
            }
        }
    }

    /// The secret material.
    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Whether the secret was generated rather than configured.
    #[must_use]
    pub fn is_generated(&self) -> bool {
        self.generated
    }
}

/// Container for all bootstrapped services.
pub struct BootstrappedServices {
    /// Stream lifecycle manager.
    pub streams: Arc<StreamManager>,
    /// Broker supervisor.
    pub broker: Arc<BrokerSupervisor>,
    /// Device discovery service.
    pub devices: Arc<DeviceService>,
    /// Periodic health probe.
    pub health: Arc<HealthProbe>,
    /// Event bridge for SSE delivery.
    pub event_bridge: Arc<BroadcastEventBridge>,
    /// Network configuration (port, LAN IP).
    pub network: NetworkContext,
    /// Active listener connections per mount.
    pub listener_counts: Arc<DashMap<String, usize>>,
    /// Bearer-token signing secret for the external auth layer.
    pub token_secret: TokenSecret,
    /// Cancellation token for graceful shutdown.
    pub cancel_token: CancellationToken,
    /// Shared HTTP client for connection pooling.
    http_client: Client,
}

impl BootstrappedServices {
    /// Returns the shared HTTP client.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }

    /// Starts background tasks (health probe loop).
    pub fn start_background_tasks(&self) {
        self.health.start(self.cancel_token.clone());
    }

    /// Initiates graceful shutdown.
    ///
    /// Encoders are terminated with the usual escalation; the broker is an
    /// external service and deliberately outlives the orchestrator.
    pub async fn shutdown(&self) {
        log::info!("[Bootstrap] Beginning graceful shutdown...");
        self.cancel_token.cancel();

        let outcomes = self.streams.stop_all().await;
        log::info!("[Bootstrap] Stopped {} stream(s)", outcomes.len());

        log::info!("[Bootstrap] Shutdown complete");
    }
}

/// Creates the shared HTTP client for broker admin calls and the listener
/// proxy upstream. A shared client enables connection pooling.
fn create_http_client() -> Client {
    Client::builder()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .build()
        .expect("Failed to create HTTP client")
}

/// Bootstraps all application services with their dependencies.
///
/// The wiring order matters - services are created in dependency order:
///
/// 1. Shared infrastructure (HTTP client, event bridge, cancellation token)
/// 2. Network context (LAN IP detection)
/// 3. Persistence stores
/// 4. Broker supervisor (initialized here; a missing installation is
///    logged and degrades broker operations instead of aborting startup)
/// 5. Device service (encoder binary resolution)
/// 6. Stream manager (loads persisted streams, reaps orphan encoders)
/// 7. Health probe
///
/// # Errors
///
/// Returns a `Fatal` error when persisted state is unreadable.
pub async fn bootstrap_services(
    config: &BootstrapConfig,
) -> AircastResult<BootstrappedServices> {
    let http_client = create_http_client();
    let event_bridge = Arc::new(BroadcastEventBridge::new(EVENT_CHANNEL_CAPACITY));
    let cancel_token = CancellationToken::new();
    let control = platform::native();

    let network = match config.advertise_ip {
        Some(ip) => NetworkContext::explicit(0, ip),
        None => NetworkContext::auto_detect(0, LanIpDetector::arc()),
    };

    let device_config_store = Arc::new(DeviceConfigStore::new(&config.data_dir));
    let stream_store = Arc::new(StreamStore::new(&config.data_dir));

    let broker = Arc::new(BrokerSupervisor::new(
        Arc::new(HttpBrokerAdminClient::new(http_client.clone())),
        Arc::clone(&control),
        device_config_store,
        event_bridge.clone(),
        DetectOverrides {
            exe_path: config.broker_exe_override.clone(),
            config_path: config.broker_config_override.clone(),
        },
    ));
    if let Err(e) = broker.initialize().await {
        // Stream starts will refuse until the broker is installed; the
        // admin surface stays up to help the operator fix it.
        log::error!("[Bootstrap] Broker initialization failed: {}", e);
    }

    let encoder_exe = resolve_encoder_exe(config.encoder_exe.clone());
    log::info!("[Bootstrap] Encoder binary: {}", encoder_exe.display());

    let devices = Arc::new(DeviceService::new(encoder_exe.clone()));
    let listener_counts: Arc<DashMap<String, usize>> = Arc::new(DashMap::new());

    let streams = StreamManager::new(
        stream_store,
        Arc::clone(&broker) as Arc<dyn crate::streams::BrokerGateway>,
        Arc::clone(&devices) as Arc<dyn crate::streams::DeviceResolver>,
        Arc::clone(&control),
        event_bridge.clone(),
        encoder_exe,
        Arc::clone(&listener_counts),
    );
    streams.initialize()?;

    let health = Arc::new(HealthProbe::new(
        Arc::clone(&broker),
        event_bridge.clone(),
    ));

    let token_secret = TokenSecret::resolve(config.token_signing_secret.clone());

    Ok(BootstrappedServices {
        streams,
        broker,
        devices,
        health,
        event_bridge,
        network,
        listener_counts,
        token_secret,
        cancel_token,
        http_client,
    })
}

/// Resolves the encoder executable: explicit override, then PATH.
fn resolve_encoder_exe(override_path: Option<PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path;
    }
    which::which("ffmpeg").unwrap_or_else(|_| PathBuf::from("ffmpeg"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_secret_is_kept() {
        let secret = TokenSecret::resolve(Some("s3cret".into()));
        assert_eq!(secret.value(), "s3cret");
        assert!(!secret.is_generated());
    }

    #[test]
    fn missing_secret_generates_random() {
        let a = TokenSecret::resolve(None);
        let b = TokenSecret::resolve(None);
        assert!(a.is_generated());
        assert!(!a.value().is_empty());
        assert_ne!(a.value(), b.value());
    }

    #[test]
    fn empty_secret_counts_as_missing() {
        let secret = TokenSecret::resolve(Some(String::new()));
        assert!(secret.is_generated());
    }

    #[tokio::test]
    async fn bootstrap_without_broker_still_serves() {
        let dir = tempfile::tempdir().unwrap();
        let services = bootstrap_services(&BootstrapConfig {
            data_dir: dir.path().to_path_buf(),
            broker_exe_override: Some(PathBuf::from("/definitely/not/here")),
            ..Default::default()
        })
        .await;

        // Even with no broker installed, the orchestrator bootstraps so
        // the admin UI can guide installation. (On hosts with a real
        // broker install, detection may succeed via standard paths.)
        assert!(services.is_ok());
        let services = services.unwrap();
        assert!(services.streams.get_stats().is_empty());
    }
}
