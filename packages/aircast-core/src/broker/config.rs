//! Broker XML configuration: parsing, targeted edits, template generation.
//!
//! The broker's XML file is the source of truth for port, hostname,
//! passwords and limits. We parse it with a streaming reader and edit it
//! with targeted text replacement so every element we don't recognize
//! survives byte-for-byte. Passwords are only ever held in memory.

use quick_xml::events::Event;
use quick_xml::reader::Reader;
use thiserror::Error;

/// Default broker port when the XML doesn't declare one.
pub const DEFAULT_BROKER_PORT: u16 = 8000;

/// Parsed broker runtime parameters.
///
/// Deliberately not `Serialize`: passwords must never leave the process
/// through a generic serializer. API surfaces build their own redacted
/// views.
#[derive(Clone, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Listen port of the first `<listen-socket>`.
    pub port: u16,
    /// Public hostname the broker reports in its directory listings.
    pub hostname: String,
    /// Password for source (encoder) connections.
    pub source_password: String,
    /// Admin HTTP username.
    pub admin_user: String,
    /// Admin HTTP password.
    pub admin_password: String,
    /// `<limits><clients>` cap, when declared.
    pub max_listeners: Option<u32>,
    /// `<limits><sources>` cap, when declared.
    pub max_sources: Option<u32>,
    /// Access log filename, when declared.
    pub access_log: Option<String>,
    /// Error log filename, when declared.
    pub error_log: Option<String>,
    /// Log directory, when declared.
    pub log_dir: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_BROKER_PORT,
            hostname: "localhost".to_string(),
            source_password: String::new(),
            admin_user: "admin".to_string(),
            admin_password: String::new(),
            max_listeners: None,
            max_sources: None,
            access_log: None,
            error_log: None,
            log_dir: None,
        }
    }
}

impl std::fmt::Debug for BrokerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Passwords are redacted even from debug logs.
        f.debug_struct("BrokerConfig")
            .field("port", &self.port)
            .field("hostname", &self.hostname)
            .field("source_password", &"<redacted>")
            .field("admin_user", &self.admin_user)
            .field("admin_password", &"<redacted>")
            .field("max_listeners", &self.max_listeners)
            .field("max_sources", &self.max_sources)
            .finish()
    }
}

/// Errors produced while reading the broker XML.
#[derive(Debug, Error)]
pub enum BrokerConfigError {
    /// The file could not be read.
    #[error("Failed to read broker config: {0}")]
    Io(#[from] std::io::Error),

    /// The XML is malformed.
    #[error("Failed to parse broker config XML: {0}")]
    Parse(String),
}

/// Parses the recognized fields out of a broker XML document.
///
/// Unknown elements are ignored (and preserved by [`apply_edits`]). The
/// first `<listen-socket>` wins; additional sockets (shoutcast compat
/// ports) are not ours to manage.
pub fn parse_broker_config(xml: &str) -> Result<BrokerConfig, BrokerConfigError> {
    let mut config = BrokerConfig::default();
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut path: Vec<String> = Vec::new();
    let mut port_seen = false;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                path.push(String::from_utf8_lossy(e.name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(ref e)) => {
                let raw = String::from_utf8_lossy(e.as_ref()).into_owned();
                let text = html_escape::decode_html_entities(raw.trim()).into_owned();
                if text.is_empty() {
                    buf.clear();
                    continue;
                }
                match path_suffix(&path) {
                    ("icecast", "hostname") => config.hostname = text,
                    ("listen-socket", "port") if !port_seen => {
                        if let Ok(port) = text.parse() {
                            config.port = port;
                            port_seen = true;
                        }
                    }
                    ("authentication", "source-password") => config.source_password = text,
                    ("authentication", "admin-password") => config.admin_password = text,
                    ("authentication", "admin-user") => config.admin_user = text,
                    ("limits", "clients") => config.max_listeners = text.parse().ok(),
                    ("limits", "sources") => config.max_sources = text.parse().ok(),
                    ("logging", "accesslog") => config.access_log = Some(text),
                    ("logging", "errorlog") => config.error_log = Some(text),
                    ("paths", "logdir") => config.log_dir = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(BrokerConfigError::Parse(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    Ok(config)
}

/// Returns (parent, leaf) of the element path, or empty strs when shallow.
fn path_suffix(path: &[String]) -> (&str, &str) {
    match path {
        [.., parent, leaf] => (parent.as_str(), leaf.as_str()),
        _ => ("", ""),
    }
}

/// Values to change in the broker XML. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokerConfigEdits {
    pub port: Option<u16>,
    pub hostname: Option<String>,
    pub source_password: Option<String>,
    pub admin_password: Option<String>,
    pub max_listeners: Option<u32>,
    pub max_sources: Option<u32>,
}

impl BrokerConfigEdits {
    /// Returns whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.port.is_none()
            && self.hostname.is_none()
            && self.source_password.is_none()
            && self.admin_password.is_none()
            && self.max_listeners.is_none()
            && self.max_sources.is_none()
    }
}

/// Applies edits to the XML text in place, preserving everything else.
///
/// Each edit replaces the content of the first matching `<tag>…</tag>`
/// span, which for the fields we manage is the one the broker reads.
/// Element values are entity-escaped on the way in.
#[must_use]
pub fn apply_edits(xml: &str, edits: &BrokerConfigEdits) -> String {
    let mut out = xml.to_string();
    if let Some(port) = edits.port {
        out = replace_element_text(&out, "port", &port.to_string());
    }
    if let Some(ref hostname) = edits.hostname {
        out = replace_element_text(&out, "hostname", hostname);
    }
    if let Some(ref password) = edits.source_password {
        out = replace_element_text(&out, "source-password", password);
    }
    if let Some(ref password) = edits.admin_password {
        out = replace_element_text(&out, "admin-password", password);
    }
    if let Some(max) = edits.max_listeners {
        out = replace_element_text(&out, "clients", &max.to_string());
    }
    if let Some(max) = edits.max_sources {
        out = replace_element_text(&out, "sources", &max.to_string());
    }
    out
}

fn replace_element_text(xml: &str, tag: &str, value: &str) -> String {
    let open = format!("<{tag}>");
    let close = format!("</{tag}>");
    let Some(start) = xml.find(&open) else {
        return xml.to_string();
    };
    let content_start = start + open.len();
    let Some(rel_end) = xml[content_start..].find(&close) else {
        return xml.to_string();
    };
    let escaped = html_escape::encode_text(value);
    format!(
        "{}{}{}",
        &xml[..content_start],
        escaped,
        &xml[content_start + rel_end..]
    )
}

/// Renders a minimal working broker configuration.
///
/// Used when `start()` finds no config file at the expected path.
#[must_use]
pub fn generate_template(config: &BrokerConfig) -> String {
    let source_password = html_escape::encode_text(&config.source_password);
    let admin_password = html_escape::encode_text(&config.admin_password);
    let hostname = html_escape::encode_text(&config.hostname);
    format!(
        r#"<icecast>
    <location>LAN</location>
    <admin>admin@localhost</admin>
    <limits>
        <clients>{clients}</clients>
        <sources>{sources}</sources>
        <queue-size>524288</queue-size>
        <client-timeout>30</client-timeout>
        <header-timeout>15</header-timeout>
        <source-timeout>10</source-timeout>
    </limits>
    <authentication>
        <source-password>{source_password}</source-password>
        <admin-user>{admin_user}</admin-user>
        <admin-password>{admin_password}</admin-password>
    </authentication>
    <hostname>{hostname}</hostname>
    <listen-socket>
        <port>{port}</port>
    </listen-socket>
    <fileserve>1</fileserve>
    <logging>
        <accesslog>access.log</accesslog>
        <errorlog>error.log</errorlog>
        <loglevel>3</loglevel>
    </logging>
</icecast>
"#,
        clients = config.max_listeners.unwrap_or(100),
        sources = config.max_sources.unwrap_or(16),
        admin_user = config.admin_user,
        port = config.port,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<icecast>
    <limits>
        <clients>100</clients>
        <sources>8</sources>
    </limits>
    <authentication>
        <source-password>s&amp;cret</source-password>
        <admin-user>admin</admin-user>
        <admin-password>adm1n</admin-password>
    </authentication>
    <hostname>broadcast.lan</hostname>
    <listen-socket>
        <port>8000</port>
    </listen-socket>
    <listen-socket>
        <port>8001</port>
        <shoutcast-compat>1</shoutcast-compat>
    </listen-socket>
    <logging>
        <accesslog>access.log</accesslog>
        <errorlog>error.log</errorlog>
    </logging>
    <custom-extension>kept</custom-extension>
</icecast>"#;

    #[test]
    fn parses_recognized_fields() {
        let config = parse_broker_config(SAMPLE).unwrap();
        assert_eq!(config.port, 8000);
        assert_eq!(config.hostname, "broadcast.lan");
        assert_eq!(config.source_password, "s&cret");
        assert_eq!(config.admin_user, "admin");
        assert_eq!(config.admin_password, "adm1n");
        assert_eq!(config.max_listeners, Some(100));
        assert_eq!(config.max_sources, Some(8));
        assert_eq!(config.access_log.as_deref(), Some("access.log"));
    }

    #[test]
    fn first_listen_socket_wins() {
        let config = parse_broker_config(SAMPLE).unwrap();
        assert_eq!(config.port, 8000);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let config = parse_broker_config("<icecast></icecast>").unwrap();
        assert_eq!(config.port, DEFAULT_BROKER_PORT);
        assert_eq!(config.hostname, "localhost");
        assert_eq!(config.max_listeners, None);
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_broker_config("<icecast><port>").is_err());
    }

    #[test]
    fn edits_change_only_their_targets() {
        let edits = BrokerConfigEdits {
            port: Some(8200),
            ..Default::default()
        };
        let out = apply_edits(SAMPLE, &edits);
        let config = parse_broker_config(&out).unwrap();
        assert_eq!(config.port, 8200);
        assert_eq!(config.hostname, "broadcast.lan");
        assert!(out.contains("<custom-extension>kept</custom-extension>"));
        // The shoutcast socket's port is untouched.
        assert!(out.contains("<port>8001</port>"));
    }

    #[test]
    fn password_edits_are_entity_escaped() {
        let edits = BrokerConfigEdits {
            source_password: Some("a<b&c".to_string()),
            ..Default::default()
        };
        let out = apply_edits(SAMPLE, &edits);
        let config = parse_broker_config(&out).unwrap();
        assert_eq!(config.source_password, "a<b&c");
    }

    #[test]
    fn parse_write_parse_round_trip_is_stable() {
        let first = parse_broker_config(SAMPLE).unwrap();
        let edits = BrokerConfigEdits {
            port: Some(first.port),
            hostname: Some(first.hostname.clone()),
            source_password: Some(first.source_password.clone()),
            admin_password: Some(first.admin_password.clone()),
            max_listeners: first.max_listeners,
            max_sources: first.max_sources,
        };
        let rewritten = apply_edits(SAMPLE, &edits);
        let second = parse_broker_config(&rewritten).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn template_parses_back_to_its_inputs() {
        let config = BrokerConfig {
            port: 8111,
            hostname: "caster.lan".into(),
            source_password: "hack&me".into(),
            admin_password: "adm".into(),
            max_listeners: Some(50),
            max_sources: Some(4),
            ..Default::default()
        };
        let xml = generate_template(&config);
        let parsed = parse_broker_config(&xml).unwrap();
        assert_eq!(parsed.port, 8111);
        assert_eq!(parsed.hostname, "caster.lan");
        assert_eq!(parsed.source_password, "hack&me");
        assert_eq!(parsed.max_listeners, Some(50));
        assert_eq!(parsed.max_sources, Some(4));
    }

    #[test]
    fn debug_never_prints_passwords() {
        let config = parse_broker_config(SAMPLE).unwrap();
        let debug = format!("{config:?}");
        assert!(!debug.contains("s&cret"));
        assert!(!debug.contains("adm1n"));
        assert!(debug.contains("<redacted>"));
    }
}
