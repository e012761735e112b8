//! Aircast Server - the LAN audio broadcasting controller daemon.
//!
//! Supervises one encoder process per stream, feeds an Icecast-compatible
//! broker, and serves the admin API (loopback-only) plus the LAN-facing
//! listener surface.
//!
//! Exit codes: 0 graceful shutdown; 1 fatal initialization; 2 the HTTP
//! server died at runtime.

mod config;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use aircast_core::{bootstrap_services, start_server, AppState};
use tokio::signal;

use crate::config::ServerConfig;

/// Aircast Server - LAN multi-channel audio broadcasting controller.
#[derive(Parser, Debug)]
#[command(name = "aircast-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// HTTP port (overrides config file).
    #[arg(short = 'p', long, env = "PORT")]
    port: Option<u16>,

    /// Data directory for persistent state (overrides config file).
    #[arg(short = 'd', long)]
    data_dir: Option<PathBuf>,

    /// Advertise IP address for listener URLs (overrides config file).
    #[arg(short = 'a', long)]
    advertise_ip: Option<std::net::IpAddr>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Aircast Server v{}", env!("CARGO_PKG_VERSION"));

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            log::error!("Fatal initialization error: {e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> Result<ExitCode> {
    // Load configuration and apply CLI overrides.
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(data_dir) = args.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(ip) = args.advertise_ip {
        config.advertise_ip = Some(ip);
    }

    log::info!(
        "Configuration: port={}, data_dir={}",
        config.port,
        config.data_dir.display()
    );

    let services = bootstrap_services(&config.to_bootstrap_config())
        .await
        .context("Failed to bootstrap services")?;
    log::info!("Services bootstrapped successfully");

    services.start_background_tasks();

    let app_state = AppState::new(&services);
    let port = config.port;
    let mut server_handle = tokio::spawn(async move {
        start_server(app_state, port).await
    });

    // Run until a shutdown signal or the server dies underneath us.
    let exit_code = tokio::select! {
        _ = shutdown_signal() => {
            log::info!("Shutdown signal received, cleaning up...");
            services.shutdown().await;
            server_handle.abort();
            ExitCode::SUCCESS
        }
        result = &mut server_handle => {
            match result {
                Ok(Err(e)) => log::error!("HTTP server failed: {e}"),
                Err(e) => log::error!("HTTP server task panicked: {e}"),
                Ok(Ok(())) => log::error!("HTTP server exited unexpectedly"),
            }
            services.shutdown().await;
            ExitCode::from(2)
        }
    };

    log::info!("Shutdown complete");
    Ok(exit_code)
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
