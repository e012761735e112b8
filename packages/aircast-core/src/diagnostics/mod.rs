//! Failure diagnosis for encoder and broker problems.
//!
//! Translates `(stderr, exit code, context)` into exactly one [`Diagnosis`]:
//! a structured, presentation-ready description with ordered causes and
//! solutions. Classification is deterministic - identical inputs produce
//! byte-identical output - so diagnoses can be compared and cached.
//!
//! The stderr match table lives in [`patterns`] as ordered data; exit-code
//! classification runs first because a known crash code is more reliable
//! than whatever made it into stderr before the process died.

mod patterns;

pub use patterns::{match_stderr, PATTERN_TABLE};

use serde::Serialize;

/// Severity of a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// The stream cannot run until the underlying problem is fixed.
    Critical,
    /// Recoverable by user action (stop another stream, free the device).
    Warning,
    /// Informational; nothing is wrong.
    Info,
}

impl Severity {
    /// Title glyph for this severity.
    #[must_use]
    pub fn glyph(self) -> &'static str {
        match self {
            Self::Critical => "✖",
            Self::Warning => "⚠",
            Self::Info => "ℹ",
        }
    }
}

/// Closed set of diagnosis categories.
///
/// The classifier only produces the categories in [`PATTERN_TABLE`] plus
/// `WindowsCrash`, `Connection` (exit-code path) and `Generic`. The
/// remaining variants are constructed directly by the supervisors for
/// operational refusals (device conflict, broker down, missing install).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DiagnosisCategory {
    WindowsCrash,
    DeviceNotFound,
    DeviceBusy,
    VirtualAudio,
    BackendEnumeration,
    CodecMissing,
    FormatUnsupported,
    Auth,
    MountInUse,
    SourceLimit,
    PortConflict,
    Connection,
    Resource,
    Timeout,
    Generic,
    // Operational categories (never produced by the stderr table).
    Installation,
    DeviceConflict,
    BrokerUnavailable,
    DeviceNotMapped,
}

impl DiagnosisCategory {
    /// Returns the kebab-case wire name of the category.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::WindowsCrash => "windows-crash",
            Self::DeviceNotFound => "device-not-found",
            Self::DeviceBusy => "device-busy",
            Self::VirtualAudio => "virtual-audio",
            Self::BackendEnumeration => "backend-enumeration",
            Self::CodecMissing => "codec-missing",
            Self::FormatUnsupported => "format-unsupported",
            Self::Auth => "auth",
            Self::MountInUse => "mount-in-use",
            Self::SourceLimit => "source-limit",
            Self::PortConflict => "port-conflict",
            Self::Connection => "connection",
            Self::Resource => "resource",
            Self::Timeout => "timeout",
            Self::Generic => "generic",
            Self::Installation => "installation",
            Self::DeviceConflict => "device-conflict",
            Self::BrokerUnavailable => "broker-unavailable",
            Self::DeviceNotMapped => "device-not-mapped",
        }
    }
}

/// Context threaded into a diagnosis so solutions can name the actual
/// device, stream and port involved.
#[derive(Debug, Clone, Default)]
pub struct DiagnosisContext {
    /// Logical device id of the stream's source, if any.
    pub device_id: Option<String>,
    /// Backend device name, if resolved.
    pub device_name: Option<String>,
    /// Broker port the encoder targeted.
    pub broker_port: Option<u16>,
    /// Stream (mount) id.
    pub stream_id: Option<String>,
    /// Capture backend in use (e.g. "dshow", "pulse").
    pub backend: Option<String>,
}

/// A structured, presentation-ready failure description. Immutable.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    /// Closed-set category.
    pub category: DiagnosisCategory,
    /// Short, glyph-prefixed headline.
    pub title: String,
    /// One-paragraph description of what happened.
    pub description: String,
    /// Likely causes, most likely first.
    pub causes: Vec<String>,
    /// Suggested fixes, most effective first.
    pub solutions: Vec<String>,
    /// Raw evidence: exit code, stderr excerpt, context fields.
    pub technical_details: String,
    /// Severity of the failure.
    pub severity: Severity,
}

/// Short form of a diagnosis, sized for a toast notification.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosisSummary {
    pub category: DiagnosisCategory,
    pub severity: Severity,
    pub title: String,
    pub causes: Vec<String>,
    pub solutions: Vec<String>,
}

impl Diagnosis {
    fn new(
        category: DiagnosisCategory,
        severity: Severity,
        title: &str,
        description: impl Into<String>,
    ) -> Self {
        Self {
            category,
            title: format!("{} {}", severity.glyph(), title),
            description: description.into(),
            causes: Vec::new(),
            solutions: Vec::new(),
            technical_details: String::new(),
            severity,
        }
    }

    fn causes<I: IntoIterator<Item = S>, S: Into<String>>(mut self, causes: I) -> Self {
        self.causes = causes.into_iter().map(Into::into).collect();
        self
    }

    fn solutions<I: IntoIterator<Item = S>, S: Into<String>>(mut self, solutions: I) -> Self {
        self.solutions = solutions.into_iter().map(Into::into).collect();
        self
    }

    fn details(mut self, details: String) -> Self {
        self.technical_details = details;
        self
    }

    /// Returns the toast-sized form: top 2 causes, top 3 solutions.
    #[must_use]
    pub fn short_form(&self) -> DiagnosisSummary {
        DiagnosisSummary {
            category: self.category,
            severity: self.severity,
            title: self.title.clone(),
            causes: self.causes.iter().take(2).cloned().collect(),
            solutions: self.solutions.iter().take(3).cloned().collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exit Code Handling
// ─────────────────────────────────────────────────────────────────────────────

/// Normalizes a raw exit code to signed 32-bit.
///
/// Windows reports process exit codes as unsigned 32-bit values; POSIX
/// tooling reports them signed. Values above `i32::MAX` are reinterpreted
/// as two's-complement so `4294967291` becomes `-5`.
#[must_use]
pub fn normalize_exit_code(raw: i64) -> i32 {
    if raw > i64::from(i32::MAX) {
        (raw - (1i64 << 32)) as i32
    } else {
        raw as i32
    }
}

/// Windows crash codes that classify on their own, regardless of stderr.
/// Stored in normalized (signed) form.
const WINDOWS_CRASH_CODES: &[i32] = &[
    0xA7F0_0008u32 as i32, // observed encoder heap-corruption crash
    0xC000_0005u32 as i32, // STATUS_ACCESS_VIOLATION
    0xC000_0374u32 as i32, // STATUS_HEAP_CORRUPTION
    0xC000_0409u32 as i32, // STATUS_STACK_BUFFER_OVERRUN
];

/// Exit code reported when the source connection is refused or access is
/// denied before any stderr output (`-5`, i.e. unsigned 4294967291).
const EXIT_ACCESS_DENIED_OR_CONNECTION_REFUSED: i32 = -5;

// ─────────────────────────────────────────────────────────────────────────────
// Classifier
// ─────────────────────────────────────────────────────────────────────────────

/// Classifies a failure into exactly one [`Diagnosis`].
///
/// Algorithm (the order is contractual):
/// 1. A known fatal Windows exit code wins outright.
/// 2. Exit code −5 classifies as `connection`.
/// 3. The stderr pattern table is tested top to bottom; first match wins.
/// 4. Otherwise `generic` (severity `info` for exit 0, `warning` otherwise).
#[must_use]
pub fn classify(stderr: &str, exit_code: Option<i64>, ctx: &DiagnosisContext) -> Diagnosis {
    let normalized = exit_code.map(normalize_exit_code);
    let details = technical_details(stderr, exit_code, normalized, ctx);

    if let Some(code) = normalized {
        if WINDOWS_CRASH_CODES.contains(&code) {
            return windows_crash(ctx).details(details);
        }
        if code == EXIT_ACCESS_DENIED_OR_CONNECTION_REFUSED {
            return connection(ctx).details(details);
        }
    }

    let stderr_lower = stderr.to_lowercase();
    let diagnosis = match match_stderr(&stderr_lower) {
        Some(DiagnosisCategory::DeviceNotFound) => device_not_found(ctx),
        Some(DiagnosisCategory::DeviceBusy) => device_busy(ctx),
        Some(DiagnosisCategory::VirtualAudio) => virtual_audio(ctx),
        Some(DiagnosisCategory::BackendEnumeration) => backend_enumeration(ctx),
        Some(DiagnosisCategory::CodecMissing) => codec_missing(ctx),
        Some(DiagnosisCategory::FormatUnsupported) => format_unsupported(ctx),
        Some(DiagnosisCategory::Auth) => auth(ctx),
        Some(DiagnosisCategory::MountInUse) => mount_in_use(ctx),
        Some(DiagnosisCategory::SourceLimit) => source_limit(ctx),
        Some(DiagnosisCategory::PortConflict) => port_conflict(ctx),
        Some(DiagnosisCategory::Connection) => connection(ctx),
        Some(DiagnosisCategory::Resource) => resource(ctx),
        Some(DiagnosisCategory::Timeout) => timeout(ctx),
        _ => generic(normalized),
    };
    diagnosis.details(details)
}

fn technical_details(
    stderr: &str,
    raw_exit: Option<i64>,
    normalized: Option<i32>,
    ctx: &DiagnosisContext,
) -> String {
    let mut out = String::new();
    match (raw_exit, normalized) {
        (Some(raw), Some(norm)) if raw != i64::from(norm) => {
            out.push_str(&format!("exit code: {norm} (raw {raw})\n"));
        }
        (Some(_), Some(norm)) => out.push_str(&format!("exit code: {norm}\n")),
        _ => out.push_str("exit code: unknown\n"),
    }
    if let Some(ref id) = ctx.stream_id {
        out.push_str(&format!("stream: {id}\n"));
    }
    if let Some(ref id) = ctx.device_id {
        out.push_str(&format!("device: {id}"));
        if let Some(ref name) = ctx.device_name {
            out.push_str(&format!(" ({name})"));
        }
        out.push('\n');
    }
    if let Some(ref backend) = ctx.backend {
        out.push_str(&format!("backend: {backend}\n"));
    }
    if let Some(port) = ctx.broker_port {
        out.push_str(&format!("broker port: {port}\n"));
    }
    if stderr.is_empty() {
        out.push_str("stderr: (empty)");
    } else {
        out.push_str("stderr:\n");
        out.push_str(stderr);
    }
    out
}

fn device_label(ctx: &DiagnosisContext) -> String {
    ctx.device_name
        .clone()
        .or_else(|| ctx.device_id.clone())
        .unwrap_or_else(|| "the selected device".to_string())
}

// ─────────────────────────────────────────────────────────────────────────────
// Category Producers
// ─────────────────────────────────────────────────────────────────────────────

fn windows_crash(ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::WindowsCrash,
        Severity::Critical,
        "Encoder crashed",
        format!(
            "The encoder process for {} was terminated by Windows with a \
             crash exit code before it could report an error.",
            ctx.stream_id.as_deref().unwrap_or("the stream")
        ),
    )
    .causes([
        "Corrupted encoder installation",
        "Faulty or outdated audio driver",
        "Incompatible virtual-audio software hooked into the capture chain",
    ])
    .solutions([
        "Reinstall the encoder (download a fresh build and replace the executable)",
        "Update the audio device driver, then reboot",
        "Temporarily disable virtual-audio software and retry",
        "Check Windows Event Viewer for the matching application error",
    ])
}

fn device_not_found(ctx: &DiagnosisContext) -> Diagnosis {
    let label = device_label(ctx);
    Diagnosis::new(
        DiagnosisCategory::DeviceNotFound,
        Severity::Critical,
        "Audio device not found",
        format!("The capture backend could not locate \"{label}\"."),
    )
    .causes([
        format!("\"{label}\" was unplugged or disabled"),
        "The device was renamed by a driver update".to_string(),
        "The cached device list is stale".to_string(),
    ])
    .solutions([
        "Refresh the device list and reselect the device",
        "Check the device is plugged in and enabled in the OS sound settings",
        "Re-create the stream with the current device name",
    ])
}

fn device_busy(ctx: &DiagnosisContext) -> Diagnosis {
    let label = device_label(ctx);
    Diagnosis::new(
        DiagnosisCategory::DeviceBusy,
        Severity::Warning,
        "Audio device is busy",
        format!("\"{label}\" is exclusively held by another process."),
    )
    .causes([
        "Another application has opened the device in exclusive mode",
        "A previous encoder for this device did not fully exit",
    ])
    .solutions([
        "Close other applications using the device (DAW, conferencing app)",
        "Disable exclusive mode in the device's advanced sound settings",
        "Retry after a few seconds",
    ])
}

fn virtual_audio(ctx: &DiagnosisContext) -> Diagnosis {
    let label = device_label(ctx);
    Diagnosis::new(
        DiagnosisCategory::VirtualAudio,
        Severity::Warning,
        "Virtual audio driver problem",
        format!(
            "A virtual-audio driver (VB-Audio / VoiceMeeter) is involved in \
             capturing \"{label}\" and reported an error."
        ),
    )
    .causes([
        "The virtual-audio engine is not running",
        "The virtual cable's sample rate does not match the capture settings",
    ])
    .solutions([
        "Restart the virtual-audio engine (VoiceMeeter: Menu → Restart Audio Engine)",
        "Align the cable's sample rate with the stream's sample rate",
        "Reinstall the virtual-audio driver",
    ])
}

fn backend_enumeration(ctx: &DiagnosisContext) -> Diagnosis {
    let backend = ctx.backend.as_deref().unwrap_or("the capture backend");
    Diagnosis::new(
        DiagnosisCategory::BackendEnumeration,
        Severity::Critical,
        "Device discovery failed",
        format!("{backend} failed while enumerating audio devices."),
    )
    .causes([
        "The audio subsystem is in a bad state",
        "A virtual-audio driver is registered but broken",
        "No capture devices exist on this machine",
    ])
    .solutions([
        "Restart the OS audio service (Windows: 'Windows Audio'; Linux: pulseaudio/pipewire)",
        "Uninstall or repair recently added virtual-audio drivers",
        "Verify at least one enabled recording device exists in the OS sound settings",
    ])
}

fn codec_missing(_ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::CodecMissing,
        Severity::Critical,
        "Encoder codec missing",
        "The encoder build lacks the codec library required for this format.",
    )
    .causes([
        "The installed encoder was built without MP3/AAC/OGG support",
        "A stripped-down encoder build shadowed the full one on PATH",
    ])
    .solutions([
        "Install a full encoder build that includes libmp3lame, AAC and libvorbis",
        "Check which encoder binary is first on PATH",
    ])
}

fn format_unsupported(_ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::FormatUnsupported,
        Severity::Warning,
        "Output format not supported",
        "The requested output format or sample configuration was rejected.",
    )
    .causes([
        "Sample rate or channel count outside what the codec accepts",
        "Container/codec mismatch for the selected format",
    ])
    .solutions([
        "Use 44100 Hz / 2 channels (the defaults)",
        "Switch the stream to MP3 format",
    ])
}

fn auth(ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::Auth,
        Severity::Critical,
        "Broker rejected credentials",
        format!(
            "The broker on port {} refused the source password.",
            ctx.broker_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "?".to_string())
        ),
    )
    .causes([
        "The broker XML was edited and the source password changed",
        "The broker was restarted with a different configuration file",
    ])
    .solutions([
        "Restart the broadcast controller so it re-reads the broker configuration",
        "Verify <source-password> in the broker XML",
    ])
}

fn mount_in_use(ctx: &DiagnosisContext) -> Diagnosis {
    let mount = ctx.stream_id.as_deref().unwrap_or("the mount");
    Diagnosis::new(
        DiagnosisCategory::MountInUse,
        Severity::Warning,
        "Mount already in use",
        format!("The broker already has a source connected at /{mount}."),
    )
    .causes([
        "An orphaned encoder from a previous run is still connected",
        "Another tool is feeding the same mount",
    ])
    .solutions([
        "Stop and start the stream again (the broker drops the mount on disconnect)",
        "Restart the broker to clear stale sources",
    ])
}

fn source_limit(_ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::SourceLimit,
        Severity::Warning,
        "Broker source limit reached",
        "The broker refused a new source because its source cap is reached.",
    )
    .causes([
        "More streams running than <sources> allows in the broker XML",
        "Orphaned source connections holding slots",
    ])
    .solutions([
        "Raise the broker's source limit via the broker configuration",
        "Stop unused streams",
        "Restart the broker to clear stale sources",
    ])
}

fn port_conflict(ctx: &DiagnosisContext) -> Diagnosis {
    let port = ctx
        .broker_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "the configured port".to_string());
    Diagnosis::new(
        DiagnosisCategory::PortConflict,
        Severity::Critical,
        "Port already in use",
        format!("Another process is bound to port {port}."),
    )
    .causes([
        "A second broker instance is already running",
        "An unrelated service occupies the port",
    ])
    .solutions([
        format!("Find the conflicting process (e.g. `lsof -i :{port}` / `netstat -ano`)"),
        "Change the broker port via the broker configuration and restart".to_string(),
    ])
}

fn connection(ctx: &DiagnosisContext) -> Diagnosis {
    let port = ctx
        .broker_port
        .map(|p| p.to_string())
        .unwrap_or_else(|| "?".to_string());
    Diagnosis::new(
        DiagnosisCategory::Connection,
        Severity::Critical,
        "Cannot reach the broker",
        format!("The encoder could not connect to the broker on localhost:{port}."),
    )
    .causes([
        "The broker is not running",
        "The broker is still starting up",
        "A firewall is blocking loopback connections",
    ])
    .solutions([
        "Start the broker, then start the stream",
        "Check the broker status panel for errors",
        "Allow the broker through the firewall",
    ])
}

fn resource(_ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::Resource,
        Severity::Critical,
        "Out of memory",
        "The encoder failed to allocate memory.",
    )
    .causes([
        "The machine is out of RAM",
        "Too many concurrent streams for this hardware",
    ])
    .solutions([
        "Close other applications and retry",
        "Reduce the number of concurrent streams",
    ])
}

fn timeout(_ctx: &DiagnosisContext) -> Diagnosis {
    Diagnosis::new(
        DiagnosisCategory::Timeout,
        Severity::Warning,
        "Operation timed out",
        "The encoder hit an I/O or startup timeout.",
    )
    .causes([
        "The capture device stopped delivering samples",
        "The broker accepted the connection but stalled",
    ])
    .solutions(["Restart the stream", "Restart the broker if it recurs"])
}

fn generic(exit_code: Option<i32>) -> Diagnosis {
    let severity = match exit_code {
        Some(0) => Severity::Info,
        _ => Severity::Warning,
    };
    let description = match exit_code {
        Some(0) => "The encoder exited normally.".to_string(),
        Some(code) => format!("The encoder exited with code {code} and no recognizable error."),
        None => "The encoder exited without a code and no recognizable error.".to_string(),
    };
    Diagnosis::new(
        DiagnosisCategory::Generic,
        severity,
        "Stream stopped unexpectedly",
        description,
    )
    .causes(["Unrecognized encoder failure"])
    .solutions([
        "Restart the stream",
        "Inspect the technical details for the raw encoder output",
    ])
}

// ─────────────────────────────────────────────────────────────────────────────
// Operational Constructors
// ─────────────────────────────────────────────────────────────────────────────

impl Diagnosis {
    /// Broker installation could not be located by any detection strategy.
    #[must_use]
    pub fn installation_not_found(searched: &[String]) -> Self {
        Diagnosis::new(
            DiagnosisCategory::Installation,
            Severity::Critical,
            "Broker not installed",
            "No broker installation was found on this machine.",
        )
        .causes([
            "The broker has never been installed",
            "The broker is installed in a non-standard location",
        ])
        .solutions([
            "Install an Icecast-compatible broker",
            "Set BROKER_EXE_PATH to the broker executable",
            "Set BROKER_CONFIG_PATH to the broker XML",
        ])
        .details(format!("searched:\n{}", searched.join("\n")))
    }

    /// The stream's device is already captured by another running stream.
    #[must_use]
    pub fn device_conflict(device_id: &str, holder: &str) -> Self {
        Diagnosis::new(
            DiagnosisCategory::DeviceConflict,
            Severity::Warning,
            &format!("Device already in use by: {holder}"),
            format!("This device is already in use by: {holder}"),
        )
        .causes([format!(
            "Stream \"{holder}\" is currently capturing {device_id}"
        )])
        .solutions([
            format!("Stop \"{holder}\" first, then start this stream"),
            "Assign a different capture device to this stream".to_string(),
        ])
        .details(format!("device: {device_id}\nheld by: {holder}"))
    }

    /// The broker is not running, so streams cannot start.
    #[must_use]
    pub fn broker_unavailable() -> Self {
        Diagnosis::new(
            DiagnosisCategory::BrokerUnavailable,
            Severity::Critical,
            "Broker is not running",
            "Streams deliver audio through the broker, which is currently stopped.",
        )
        .causes([
            "The broker was stopped manually",
            "The broker crashed or failed to start",
        ])
        .solutions([
            "Start the broker from the broker panel",
            "Check the broker error log for startup failures",
        ])
    }

    /// No backend device name is known for the requested device id.
    #[must_use]
    pub fn device_not_mapped(device_id: &str) -> Self {
        Diagnosis::new(
            DiagnosisCategory::DeviceNotMapped,
            Severity::Critical,
            "Unknown capture device",
            format!("No backend device name is known for \"{device_id}\"."),
        )
        .causes([
            "The device list has not been refreshed since the device appeared",
            "The stream references a device from another machine",
        ])
        .solutions([
            "Refresh the device list",
            "Edit the stream and select an available device",
        ])
        .details(format!("device: {device_id}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> DiagnosisContext {
        DiagnosisContext {
            device_id: Some("hd-pro-webcam-c910".into()),
            device_name: Some("Microphone (HD Pro Webcam C910)".into()),
            broker_port: Some(8000),
            stream_id: Some("english".into()),
            backend: Some("dshow".into()),
        }
    }

    #[test]
    fn unsigned_crash_code_normalizes_and_classifies() {
        // 0xA7F00008 arrives as unsigned 2812791304.
        let d = classify("", Some(2_812_791_304), &ctx());
        assert_eq!(d.category, DiagnosisCategory::WindowsCrash);
        assert_eq!(d.severity, Severity::Critical);
        assert!(d.solutions.iter().any(|s| s.contains("Reinstall")));
        assert!(d.solutions.iter().any(|s| s.contains("driver")));
    }

    #[test]
    fn unsigned_minus_five_classifies_as_connection() {
        // 4294967291 == -5 in two's complement.
        assert_eq!(normalize_exit_code(4_294_967_291), -5);
        let d = classify("", Some(4_294_967_291), &ctx());
        assert_eq!(d.category, DiagnosisCategory::Connection);
        assert_eq!(d.severity, Severity::Critical);
    }

    #[test]
    fn small_exit_codes_pass_through_normalization() {
        assert_eq!(normalize_exit_code(0), 0);
        assert_eq!(normalize_exit_code(1), 1);
        assert_eq!(normalize_exit_code(-9), -9);
    }

    #[test]
    fn empty_stderr_exit_zero_is_generic_info() {
        let d = classify("", Some(0), &ctx());
        assert_eq!(d.category, DiagnosisCategory::Generic);
        assert_eq!(d.severity, Severity::Info);
    }

    #[test]
    fn empty_stderr_unknown_exit_is_generic_warning() {
        let d = classify("", Some(17), &ctx());
        assert_eq!(d.category, DiagnosisCategory::Generic);
        assert_eq!(d.severity, Severity::Warning);
    }

    #[test]
    fn stderr_matching_is_case_insensitive() {
        let d = classify("Could NOT find Audio Only Device", Some(1), &ctx());
        assert_eq!(d.category, DiagnosisCategory::DeviceNotFound);
    }

    #[test]
    fn crash_code_wins_over_stderr() {
        let d = classify("connection refused", Some(2_812_791_304), &ctx());
        assert_eq!(d.category, DiagnosisCategory::WindowsCrash);
    }

    #[test]
    fn classification_is_deterministic() {
        let a = classify("mountpoint in use", Some(1), &ctx());
        let b = classify("mountpoint in use", Some(1), &ctx());
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }

    #[test]
    fn context_is_embedded_in_technical_details() {
        let d = classify("connection refused", Some(1), &ctx());
        assert!(d.technical_details.contains("stream: english"));
        assert!(d.technical_details.contains("broker port: 8000"));
        assert!(d.technical_details.contains("connection refused"));
    }

    #[test]
    fn short_form_caps_causes_and_solutions() {
        let d = classify("address already in use", Some(1), &ctx());
        let s = d.short_form();
        assert!(s.causes.len() <= 2);
        assert!(s.solutions.len() <= 3);
        assert_eq!(s.category, DiagnosisCategory::PortConflict);
    }

    #[test]
    fn duplicate_free_titles_carry_severity_glyph() {
        let d = Diagnosis::broker_unavailable();
        assert!(d.title.starts_with("✖ "));
        let d = Diagnosis::device_conflict("dev-1", "s1");
        assert!(d.title.starts_with("⚠ "));
        assert!(d.title.contains("already in use by: s1"));
    }
}
