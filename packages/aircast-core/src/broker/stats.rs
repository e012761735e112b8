//! Broker admin HTTP client and stats XML parsing.
//!
//! The broker exposes aggregate statistics at `/admin/stats.xml` behind
//! basic auth. The supervisor and health probe consume it through the
//! [`BrokerAdminClient`] trait so tests can substitute canned responses.

use std::time::Duration;

use async_trait::async_trait;
use quick_xml::events::Event;
use quick_xml::reader::Reader;
use reqwest::Client;
use serde::Serialize;
use thiserror::Error;

/// Timeout for one admin HTTP round trip.
const ADMIN_HTTP_TIMEOUT: Duration = Duration::from_secs(4);

/// Aggregate broker statistics from `/admin/stats.xml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerStats {
    /// Broker software identification.
    pub server_id: Option<String>,
    /// Broker start time (ISO-8601) as reported by the broker.
    pub server_start: Option<String>,
    /// Currently connected listeners across all mounts.
    pub listeners: Option<u32>,
    /// Currently connected sources.
    pub sources: Option<u32>,
}

/// Errors from the admin endpoint.
#[derive(Debug, Error)]
pub enum AdminError {
    /// TCP/HTTP failure - the broker is down or not yet listening.
    #[error("Admin endpoint unreachable: {0}")]
    Unreachable(String),

    /// The broker answered with a non-success status.
    #[error("Admin endpoint returned HTTP {0}")]
    HttpStatus(u16),

    /// The stats XML didn't parse.
    #[error("Failed to parse stats XML: {0}")]
    Parse(String),
}

/// Seam for talking to the broker's admin HTTP interface.
#[async_trait]
pub trait BrokerAdminClient: Send + Sync {
    /// Fetches and parses `/admin/stats.xml`.
    async fn fetch_stats(
        &self,
        port: u16,
        admin_user: &str,
        admin_password: &str,
    ) -> Result<BrokerStats, AdminError>;
}

/// Production implementation over a shared reqwest client.
pub struct HttpBrokerAdminClient {
    client: Client,
}

impl HttpBrokerAdminClient {
    /// Wraps the bootstrap-shared HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BrokerAdminClient for HttpBrokerAdminClient {
    async fn fetch_stats(
        &self,
        port: u16,
        admin_user: &str,
        admin_password: &str,
    ) -> Result<BrokerStats, AdminError> {
        let url = format!("http://127.0.0.1:{port}/admin/stats.xml");
        let response = self
            .client
            .get(&url)
            .basic_auth(admin_user, Some(admin_password))
            .timeout(ADMIN_HTTP_TIMEOUT)
            .send()
            .await
            .map_err(|e| AdminError::Unreachable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdminError::HttpStatus(response.status().as_u16()));
        }

        let body = response
            .text()
            .await
            .map_err(|e| AdminError::Unreachable(e.to_string()))?;
        parse_stats_xml(&body)
    }
}

/// Parses the top-level fields of an icestats document.
///
/// Per-mount `<source>` blocks repeat `<listeners>` inside; only depth-2
/// elements directly under `<icestats>` are aggregate values.
pub fn parse_stats_xml(xml: &str) -> Result<BrokerStats, AdminError> {
    let mut stats = BrokerStats::default();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                if path.len() != 2 || path[0] != "icestats" {
                    buf.clear();
                    continue;
                }
                let text = String::from_utf8_lossy(e.as_ref()).trim().to_string();
                if text.is_empty() {
                    buf.clear();
                    continue;
                }
                match path[1].as_str() {
                    "server_id" => stats.server_id = Some(text),
                    "server_start_iso8601" => stats.server_start = Some(text),
                    "listeners" => stats.listeners = text.parse().ok(),
                    "sources" => stats.sources = text.parse().ok(),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(AdminError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STATS: &str = r#"<?xml version="1.0"?>
<icestats>
    <admin>admin@localhost</admin>
    <server_id>Icecast 2.4.4</server_id>
    <server_start_iso8601>2026-07-30T10:00:00+0000</server_start_iso8601>
    <listeners>7</listeners>
    <sources>2</sources>
    <source mount="/english">
        <listeners>5</listeners>
        <server_name>English</server_name>
    </source>
    <source mount="/music">
        <listeners>2</listeners>
    </source>
</icestats>"#;

    #[test]
    fn parses_aggregate_fields() {
        let stats = parse_stats_xml(STATS).unwrap();
        assert_eq!(stats.server_id.as_deref(), Some("Icecast 2.4.4"));
        assert_eq!(stats.listeners, Some(7));
        assert_eq!(stats.sources, Some(2));
    }

    #[test]
    fn per_mount_listeners_do_not_clobber_aggregate() {
        let stats = parse_stats_xml(STATS).unwrap();
        // The /english mount has 5 listeners; the aggregate is 7 and must win.
        assert_eq!(stats.listeners, Some(7));
    }

    #[test]
    fn empty_document_parses_to_defaults() {
        let stats = parse_stats_xml("<icestats></icestats>").unwrap();
        assert_eq!(stats, BrokerStats::default());
    }

    #[test]
    fn malformed_xml_is_a_parse_error() {
        assert!(matches!(
            parse_stats_xml("<icestats><listeners>"),
            Err(AdminError::Parse(_))
        ));
    }
}
