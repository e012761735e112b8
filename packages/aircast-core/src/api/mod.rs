//! HTTP API layer.
//!
//! Thin handlers that delegate to services, the admin guard, the listener
//! proxy, and server startup. All business logic lives in the services.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::bootstrap::BootstrappedServices;
use crate::broker::BrokerSupervisor;
use crate::context::NetworkContext;
use crate::devices::DeviceService;
use crate::events::BroadcastEventBridge;
use crate::mdns_advertise::MdnsAdvertiser;
use crate::services::HealthProbe;
use crate::streams::StreamManager;

pub mod guard;
pub mod http;
pub mod proxy;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
#[derive(Clone)]
pub struct AppState {
    /// Stream lifecycle manager.
    pub streams: Arc<StreamManager>,
    /// Broker supervisor.
    pub broker: Arc<BrokerSupervisor>,
    /// Device discovery service.
    pub devices: Arc<DeviceService>,
    /// Periodic health probe.
    pub health: Arc<HealthProbe>,
    /// Event bridge for the SSE endpoint.
    pub events: Arc<BroadcastEventBridge>,
    /// Network configuration (port, LAN IP).
    pub network: NetworkContext,
    /// Shared HTTP client (listener proxy upstream).
    pub http_client: reqwest::Client,
    /// Active listener connections per mount.
    pub listener_counts: Arc<DashMap<String, usize>>,
    /// This machine's own interface addresses (for the admin guard).
    pub local_ips: Arc<HashSet<IpAddr>>,
    /// mDNS advertiser; kept alive for its Drop to unregister on shutdown.
    #[allow(dead_code)]
    mdns_advertiser: Arc<RwLock<Option<MdnsAdvertiser>>>,
}

impl AppState {
    /// Builds the state from the bootstrapped service container.
    #[must_use]
    pub fn new(services: &BootstrappedServices) -> Self {
        Self {
            streams: Arc::clone(&services.streams),
            broker: Arc::clone(&services.broker),
            devices: Arc::clone(&services.devices),
            health: Arc::clone(&services.health),
            events: Arc::clone(&services.event_bridge),
            network: services.network.clone(),
            http_client: services.http_client().clone(),
            listener_counts: Arc::clone(&services.listener_counts),
            local_ips: Arc::new(own_interface_ips()),
            mdns_advertiser: Arc::new(RwLock::new(None)),
        }
    }
}

/// Collects this machine's interface addresses for the same-host redirect
/// rule in the admin guard.
fn own_interface_ips() -> HashSet<IpAddr> {
    let mut ips: HashSet<IpAddr> = HashSet::new();
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            for (_, ip) in interfaces {
                ips.insert(ip);
            }
        }
        Err(e) => log::warn!("[Server] Could not list interfaces: {}", e),
    }
    ips
}

/// Starts the HTTP server on the given port.
///
/// Binds all interfaces (the listener surface is LAN-facing; the guard
/// fences the admin routes), publishes the bound port, and arms mDNS
/// advertisement best-effort.
pub async fn start_server(state: AppState, port: u16) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let bound = listener.local_addr()?.port();
    state.network.set_port(bound);

    if let Ok(ip) = state.network.get_lan_ip().parse::<IpAddr>() {
        match MdnsAdvertiser::new(ip, bound) {
            Ok(advertiser) => *state.mdns_advertiser.write() = Some(advertiser),
            Err(e) => log::debug!("[Server] mDNS advertisement unavailable: {}", e),
        }
    }

    log::info!("Server listening on http://0.0.0.0:{}", bound);
    let app = http::create_router(state);

    // ConnectInfo is required: the admin guard decides by client address.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;
    Ok(())
}
