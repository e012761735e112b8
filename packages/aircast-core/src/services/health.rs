//! Periodic broker health reconciliation.
//!
//! Every 30 seconds the probe compares the OS process table with the
//! broker's admin HTTP endpoint (via the supervisor's status query, where
//! process liveness is authoritative) and publishes a structured report.
//! Probe failures never propagate; the loop logs and continues.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::broker::{BrokerState, BrokerSupervisor};
use crate::events::{EventEmitter, HealthEvent};
use crate::utils::now_millis;

/// Cadence of the background probe.
pub const HEALTH_INTERVAL: Duration = Duration::from_secs(30);

/// Outcome of one named check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    Warn,
    Fail,
}

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthLevel {
    Healthy,
    Degraded,
    Unhealthy,
}

/// One named check with its evidence.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl HealthCheck {
    fn ok(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Ok,
            message: message.into(),
            details: None,
        }
    }

    fn warn(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Warn,
            message: message.into(),
            details: None,
        }
    }

    fn fail(message: impl Into<String>) -> Self {
        Self {
            status: CheckStatus::Fail,
            message: message.into(),
            details: None,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Full report from one probe cycle.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub overall: HealthLevel,
    pub installation: HealthCheck,
    pub process: HealthCheck,
    pub network: HealthCheck,
    pub configuration: HealthCheck,
    pub checked_at: u64,
}

/// Periodic health probe over the broker supervisor.
pub struct HealthProbe {
    broker: Arc<BrokerSupervisor>,
    emitter: Arc<dyn EventEmitter>,
    latest: RwLock<Option<HealthReport>>,
}

impl HealthProbe {
    /// Creates a probe; call [`HealthProbe::start`] to begin the loop.
    #[must_use]
    pub fn new(broker: Arc<BrokerSupervisor>, emitter: Arc<dyn EventEmitter>) -> Self {
        Self {
            broker,
            emitter,
            latest: RwLock::new(None),
        }
    }

    /// Spawns the 30-second probe loop; stops on cancellation.
    pub fn start(self: &Arc<Self>, cancel: CancellationToken) {
        let probe = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(HEALTH_INTERVAL);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        log::info!("[Health] Probe loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = probe.run_check().await;
                        let overall = report.overall;
                        *probe.latest.write() = Some(report);
                        probe.emitter.emit_health(HealthEvent::Checked {
                            overall: format!("{overall:?}").to_lowercase(),
                        });
                    }
                }
            }
        });
    }

    /// Runs one probe cycle now.
    pub async fn run_check(&self) -> HealthReport {
        let installation = self.check_installation();
        let configuration = self.check_configuration();

        let status = self.broker.get_status().await;
        let process = match status.state {
            BrokerState::Running => HealthCheck::ok("Broker process is running")
                .with_details(json!({ "pid": status.pid, "uptimeSecs": status.uptime_secs })),
            BrokerState::Starting => HealthCheck::warn("Broker process is starting"),
            BrokerState::Stopped => HealthCheck::warn("Broker process is not running"),
            BrokerState::Uninitialized => HealthCheck::fail("Broker is not initialized"),
        };

        // The admin HTTP endpoint is the network evidence; stats are only
        // present when the supervisor reached it.
        let network = match (status.state, &status.stats) {
            (BrokerState::Running, Some(stats)) => HealthCheck::ok("Admin endpoint reachable")
                .with_details(json!({
                    "port": status.port,
                    "listeners": stats.listeners,
                    "sources": stats.sources,
                })),
            (BrokerState::Starting, _) => {
                HealthCheck::warn("Process alive but admin endpoint not answering yet")
            }
            _ => HealthCheck::warn("Admin endpoint not reachable (broker stopped)"),
        };

        let checks = [&installation, &process, &network, &configuration];
        let overall = if checks.iter().any(|c| c.status == CheckStatus::Fail) {
            HealthLevel::Unhealthy
        } else if checks.iter().any(|c| c.status == CheckStatus::Warn) {
            HealthLevel::Degraded
        } else {
            HealthLevel::Healthy
        };

        HealthReport {
            overall,
            installation,
            process,
            network,
            configuration,
            checked_at: now_millis(),
        }
    }

    fn check_installation(&self) -> HealthCheck {
        match self.broker.installation() {
            Some(installation) if installation.exe_path.is_file() => {
                HealthCheck::ok("Broker installation present").with_details(json!({
                    "exePath": installation.exe_path,
                    "configPath": installation.config_path,
                }))
            }
            Some(installation) => HealthCheck::fail(format!(
                "Broker executable vanished: {}",
                installation.exe_path.display()
            )),
            None => HealthCheck::fail("No broker installation detected"),
        }
    }

    fn check_configuration(&self) -> HealthCheck {
        let Some(installation) = self.broker.installation() else {
            return HealthCheck::fail("No broker configuration (not initialized)");
        };
        if !installation.config_path.is_file() {
            return HealthCheck::warn(format!(
                "Broker config missing (a template will be generated on start): {}",
                installation.config_path.display()
            ));
        }
        let config = self.broker.config_snapshot();
        if config.source_password.is_empty() {
            return HealthCheck::warn("Broker config has no source password");
        }
        HealthCheck::ok("Broker configuration parsed").with_details(json!({
            "port": config.port,
            "hostname": config.hostname,
        }))
    }

    /// Most recent background report, if the loop has run.
    #[must_use]
    pub fn latest(&self) -> Option<HealthReport> {
        self.latest.read().clone()
    }
}
