//! Network configuration context for the orchestrator.
//!
//! Bundles the HTTP port and the LAN-facing IP used to build listener
//! URLs. Listener links must carry an address other devices can reach, so
//! detection prefers a private LAN IPv4 over loopback.

use std::net::IpAddr;
use std::sync::Arc;

use parking_lot::RwLock;

/// Network configuration shared across services.
#[derive(Clone)]
pub struct NetworkContext {
    /// Orchestrator HTTP port (set when the server binds).
    port: Arc<RwLock<u16>>,
    /// IP address LAN listeners can reach us at.
    lan_ip: Arc<RwLock<String>>,
    ip_detector: Option<Arc<dyn IpDetector>>,
}

impl NetworkContext {
    /// Creates a context with a fixed advertise address.
    #[must_use]
    pub fn explicit(port: u16, advertise_ip: IpAddr) -> Self {
        Self {
            port: Arc::new(RwLock::new(port)),
            lan_ip: Arc::new(RwLock::new(advertise_ip.to_string())),
            ip_detector: None,
        }
    }

    /// Creates a context that detects the LAN IP, falling back to loopback
    /// when the machine has no usable interface.
    #[must_use]
    pub fn auto_detect(port: u16, ip_detector: Arc<dyn IpDetector>) -> Self {
        let lan_ip = ip_detector
            .detect()
            .unwrap_or_else(|e| {
                log::warn!("[Network] LAN IP detection failed ({e}); using loopback");
                "127.0.0.1".to_string()
            });
        Self {
            port: Arc::new(RwLock::new(port)),
            lan_ip: Arc::new(RwLock::new(lan_ip)),
            ip_detector: Some(ip_detector),
        }
    }

    /// Re-runs detection (e.g. after a network change) and updates the
    /// published address.
    pub fn refresh_ip(&self) {
        if let Some(ref detector) = self.ip_detector {
            if let Ok(ip) = detector.detect() {
                *self.lan_ip.write() = ip;
            }
        }
    }

    /// Returns the current port value.
    #[must_use]
    pub fn get_port(&self) -> u16 {
        *self.port.read()
    }

    /// Sets the port once the listener has bound.
    pub fn set_port(&self, port: u16) {
        *self.port.write() = port;
    }

    /// Returns the LAN-facing IP.
    #[must_use]
    pub fn get_lan_ip(&self) -> String {
        self.lan_ip.read().clone()
    }

    /// Base URL of the listener surface, e.g. `http://192.168.1.20:3001`.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.get_lan_ip(), self.get_port())
    }

    /// Listener URL for a stream.
    #[must_use]
    pub fn listen_url(&self, stream_id: &str) -> String {
        format!("{}/listen/{}", self.base_url(), stream_id)
    }
}

/// Trait for detecting the LAN IP address.
pub trait IpDetector: Send + Sync {
    /// Detects the address LAN clients can reach us at.
    fn detect(&self) -> Result<String, String>;
}

/// Default detector: prefers a private IPv4 over anything else.
#[derive(Debug, Clone, Default)]
pub struct LanIpDetector;

impl LanIpDetector {
    /// Creates a new detector.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Creates a new detector wrapped in an Arc.
    #[must_use]
    pub fn arc() -> Arc<dyn IpDetector> {
        Arc::new(Self::new())
    }
}

impl IpDetector for LanIpDetector {
    fn detect(&self) -> Result<String, String> {
        // The primary route's IP is usually right.
        if let Ok(ip) = local_ip_address::local_ip() {
            if is_private_ipv4(&ip) {
                return Ok(ip.to_string());
            }
        }

        // Otherwise walk the interfaces for the first private IPv4.
        let interfaces =
            local_ip_address::list_afinet_netifas().map_err(|e| e.to_string())?;
        interfaces
            .iter()
            .map(|(_, ip)| ip)
            .find(|ip| is_private_ipv4(ip))
            .map(IpAddr::to_string)
            .ok_or_else(|| "no private IPv4 interface found".to_string())
    }
}

/// Whether an address is a private (RFC 1918) IPv4 address.
fn is_private_ipv4(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private(),
        IpAddr::V6(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    struct FixedDetector(Option<String>);

    impl IpDetector for FixedDetector {
        fn detect(&self) -> Result<String, String> {
            self.0.clone().ok_or_else(|| "no interface".to_string())
        }
    }

    #[test]
    fn explicit_context_uses_provided_address() {
        let ctx = NetworkContext::explicit(3001, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        assert_eq!(ctx.get_lan_ip(), "192.168.1.20");
        assert_eq!(ctx.base_url(), "http://192.168.1.20:3001");
    }

    #[test]
    fn auto_detect_falls_back_to_loopback() {
        let ctx = NetworkContext::auto_detect(3001, Arc::new(FixedDetector(None)));
        assert_eq!(ctx.get_lan_ip(), "127.0.0.1");
    }

    #[test]
    fn listen_url_includes_stream_id() {
        let ctx = NetworkContext::explicit(3001, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)));
        assert_eq!(ctx.listen_url("english"), "http://10.0.0.5:3001/listen/english");
    }

    #[test]
    fn private_ipv4_detection() {
        assert!(is_private_ipv4(&"192.168.1.1".parse().unwrap()));
        assert!(is_private_ipv4(&"10.1.2.3".parse().unwrap()));
        assert!(is_private_ipv4(&"172.16.0.1".parse().unwrap()));
        assert!(!is_private_ipv4(&"8.8.8.8".parse().unwrap()));
        assert!(!is_private_ipv4(&"127.0.0.1".parse().unwrap()));
        assert!(!is_private_ipv4(&"::1".parse().unwrap()));
    }

    #[test]
    fn set_port_updates_urls() {
        let ctx = NetworkContext::explicit(0, IpAddr::V4(Ipv4Addr::new(192, 168, 1, 20)));
        ctx.set_port(3001);
        assert_eq!(ctx.get_port(), 3001);
        assert!(ctx.base_url().ends_with(":3001"));
    }
}
