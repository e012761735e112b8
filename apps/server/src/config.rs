//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides.
//! Every environment variable the orchestrator recognizes is applied here,
//! in one place.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Port for the orchestrator HTTP server.
    /// Override: `PORT`
    pub port: u16,

    /// Directory for persisted state (streams, device-config cache).
    pub data_dir: PathBuf,

    /// IP address to advertise in listener URLs. Auto-detected (preferring
    /// a private LAN IPv4) when unset.
    pub advertise_ip: Option<IpAddr>,

    /// Broker executable override.
    /// Override: `BROKER_EXE_PATH`
    pub broker_exe_path: Option<PathBuf>,

    /// Broker XML config override.
    /// Override: `BROKER_CONFIG_PATH`
    pub broker_config_path: Option<PathBuf>,

    /// Encoder executable override (PATH lookup of `ffmpeg` otherwise).
    pub encoder_exe_path: Option<PathBuf>,

    /// Admin username for bearer-token issuance by the dashboard layer.
    /// Override: `ADMIN_USERNAME`
    pub admin_username: Option<String>,

    /// Admin password for bearer-token issuance by the dashboard layer.
    /// Override: `ADMIN_PASSWORD`
    pub admin_password: Option<String>,

    /// Token signing secret. When unset, a process-lifetime random secret
    /// is generated (with a warning).
    /// Override: `TOKEN_SIGNING_SECRET`
    pub token_signing_secret: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3001,
            data_dir: PathBuf::from("data"),
            advertise_ip: None,
            broker_exe_path: None,
            broker_config_path: None,
            encoder_exe_path: None,
            admin_username: None,
            admin_password: None,
            token_signing_secret: None,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment
    /// overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Applies environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("PORT") {
            if let Ok(port) = val.parse() {
                self.port = port;
            }
        }
        if let Ok(val) = std::env::var("BROKER_EXE_PATH") {
            if !val.is_empty() {
                self.broker_exe_path = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("BROKER_CONFIG_PATH") {
            if !val.is_empty() {
                self.broker_config_path = Some(PathBuf::from(val));
            }
        }
        if let Ok(val) = std::env::var("ADMIN_USERNAME") {
            if !val.is_empty() {
                self.admin_username = Some(val);
            }
        }
        if let Ok(val) = std::env::var("ADMIN_PASSWORD") {
            if !val.is_empty() {
                self.admin_password = Some(val);
            }
        }
        if let Ok(val) = std::env::var("TOKEN_SIGNING_SECRET") {
            if !val.is_empty() {
                self.token_signing_secret = Some(val);
            }
        }
        // LOG_LEVEL is handled by clap via #[arg(env = ...)] in main.rs
    }

    /// Converts to the core's bootstrap configuration.
    pub fn to_bootstrap_config(&self) -> aircast_core::BootstrapConfig {
        aircast_core::BootstrapConfig {
            data_dir: self.data_dir.clone(),
            broker_exe_override: self.broker_exe_path.clone(),
            broker_config_override: self.broker_config_path.clone(),
            encoder_exe: self.encoder_exe_path.clone(),
            advertise_ip: self.advertise_ip,
            token_signing_secret: self.token_signing_secret.clone(),
        }
    }
}
