//! mDNS advertisement of the listener surface.
//!
//! This is best-effort - failure is logged but doesn't prevent the service
//! from running. Browsers cannot use DNS-SD, so this primarily benefits
//! native LAN clients that want to find the listener page.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use mdns_sd::{ServiceDaemon, ServiceInfo};

/// Service type for listener-surface discovery.
const SERVICE_TYPE: &str = "_aircast-listen._tcp.local.";

/// Advertises the listener HTTP surface via mDNS/DNS-SD.
///
/// When created, registers the service with the local mDNS responder.
/// The service is automatically unregistered when dropped.
pub struct MdnsAdvertiser {
    daemon: ServiceDaemon,
    service_fullname: String,
    /// Tracks whether shutdown has been called to prevent double unregister.
    shutdown_called: AtomicBool,
}

impl MdnsAdvertiser {
    /// Creates and registers an mDNS service advertisement.
    ///
    /// # Arguments
    /// * `advertise_ip` - The IP address to advertise (LAN-reachable)
    /// * `port` - The orchestrator HTTP port
    pub fn new(advertise_ip: IpAddr, port: u16) -> Result<Self, mdns_sd::Error> {
        let daemon = ServiceDaemon::new()?;

        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let instance_name = format!("Aircast {}", hostname);

        // Sanitize hostname for DNS (lowercase, no spaces)
        let dns_hostname = hostname
            .to_lowercase()
            .replace(' ', "-")
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect::<String>();

        let mut txt = HashMap::new();
        txt.insert("listen_path".to_string(), "/streams".to_string());
        txt.insert("status_path".to_string(), "/api/streams/status".to_string());
        txt.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());

        let service = ServiceInfo::new(
            SERVICE_TYPE,
            &instance_name,
            &format!("{}.local.", dns_hostname),
            advertise_ip,
            port,
            Some(txt),
        )?;

        let fullname = service.get_fullname().to_string();
        daemon.register(service)?;

        log::info!(
            "[mDNS] Advertising '{}' at {}:{}",
            instance_name,
            advertise_ip,
            port
        );

        Ok(Self {
            daemon,
            service_fullname: fullname,
            shutdown_called: AtomicBool::new(false),
        })
    }

    /// Unregisters the service from mDNS.
    ///
    /// Called automatically on drop. Safe to call multiple times.
    pub fn shutdown(&self) {
        if self.shutdown_called.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Err(e) = self.daemon.unregister(&self.service_fullname) {
            log::warn!("[mDNS] Failed to unregister service: {}", e);
        }
    }
}

impl Drop for MdnsAdvertiser {
    fn drop(&mut self) {
        self.shutdown();
    }
}
