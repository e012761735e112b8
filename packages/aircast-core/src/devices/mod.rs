//! Audio capture device discovery and name mapping.
//!
//! Responsibilities:
//! - Enumerate OS audio input devices through the encoder binary's listing
//!   invocations (plus an OS fallback on Windows)
//! - Cache results with a TTL so repeated admin polls don't spawn processes
//! - Maintain the stable `device id -> backend name` mapping that encoder
//!   argument construction depends on

pub mod parse;

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::process::Command;

use crate::diagnostics::Diagnosis;
use crate::error::{AircastError, AircastResult};

/// Minimum time between two real enumerations.
const DEVICE_CACHE_TTL: Duration = Duration::from_secs(30);

/// Timeout for one listing invocation.
const ENUMERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Whether a device records or plays audio. Only inputs are streamable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Input,
    Output,
}

/// Capture backend that owns the device name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceBackend {
    Directshow,
    Avfoundation,
    AlsaOrPulse,
    Wasapi,
}

impl DeviceBackend {
    /// Short name used in encoder flags and diagnosis context.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Directshow => "dshow",
            Self::Avfoundation => "avfoundation",
            Self::AlsaOrPulse => "pulse",
            Self::Wasapi => "wasapi",
        }
    }
}

/// How a device record was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeviceSource {
    FfmpegEnumerated,
    OsWmi,
    Fallback,
}

/// A discovered audio endpoint. Ephemeral - re-created on every refresh.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Stable URL-safe slug derived from the backend name.
    pub id: String,
    /// Exact string the capture backend requires.
    pub backend_name: String,
    pub kind: DeviceKind,
    pub backend: DeviceBackend,
    pub source: DeviceSource,
}

/// Result of an enumeration: the device list plus an optional diagnosis
/// (set when enumeration came back empty so the UI can explain why).
#[derive(Debug, Clone)]
pub struct EnumerationOutcome {
    pub devices: Vec<Device>,
    pub diagnosis: Option<Diagnosis>,
}

struct DeviceCache {
    devices: Vec<Device>,
    fetched_at: Instant,
}

/// Discovers capture devices and maps logical ids to backend names.
pub struct DeviceService {
    /// Path to the encoder binary used for listing invocations.
    encoder_exe: PathBuf,
    cache: Mutex<Option<DeviceCache>>,
    /// `id -> (backend_name, backend)`; survives cache expiry so running
    /// streams keep resolving even while a refresh is in flight.
    mapping: Mutex<HashMap<String, (String, DeviceBackend)>>,
}

impl DeviceService {
    /// Creates a service that lists devices through `encoder_exe`.
    #[must_use]
    pub fn new(encoder_exe: PathBuf) -> Self {
        Self {
            encoder_exe,
            cache: Mutex::new(None),
            mapping: Mutex::new(HashMap::new()),
        }
    }

    /// Enumerates input devices, honoring the cache unless `refresh` is set.
    ///
    /// Zero devices is reported as an outcome with a `backend-enumeration`
    /// diagnosis and an empty list - never a fabricated fallback set.
    pub async fn enumerate(&self, refresh: bool) -> AircastResult<EnumerationOutcome> {
        if !refresh {
            let cache = self.cache.lock();
            if let Some(ref cached) = *cache {
                if cached.fetched_at.elapsed() < DEVICE_CACHE_TTL {
                    return Ok(EnumerationOutcome {
                        devices: cached.devices.clone(),
                        diagnosis: None,
                    });
                }
            }
        }

        let devices = self.enumerate_uncached().await?;

        let diagnosis = if devices.is_empty() {
            log::warn!("[Devices] Enumeration returned zero devices");
            Some(Diagnosis::classify_empty_enumeration())
        } else {
            log::info!("[Devices] Enumerated {} input device(s)", devices.len());
            None
        };

        {
            let mut mapping = self.mapping.lock();
            for device in &devices {
                mapping.insert(
                    device.id.clone(),
                    (device.backend_name.clone(), device.backend),
                );
            }
        }
        *self.cache.lock() = Some(DeviceCache {
            devices: devices.clone(),
            fetched_at: Instant::now(),
        });

        Ok(EnumerationOutcome { devices, diagnosis })
    }

    /// Drops the cached device list; the next enumerate hits the OS.
    pub fn clear_cache(&self) {
        *self.cache.lock() = None;
    }

    /// Resolves a logical device id to the backend name the encoder needs.
    ///
    /// Lookup order: the mapping table, then pass-through for inputs that
    /// already look like a parenthesized backend name (`X (Y)`), then a
    /// title-cased DirectShow-style guess for plain slugs on Windows.
    /// Returns `None` when no confident resolution exists; callers surface
    /// that as a `device-not-mapped` diagnosis.
    #[must_use]
    pub fn resolve_backend_name(&self, device_id: &str) -> Option<(String, DeviceBackend)> {
        if let Some(found) = self.mapping.lock().get(device_id) {
            return Some(found.clone());
        }

        // Caller handed us a raw backend name instead of a slug.
        if device_id.contains('(') && device_id.ends_with(')') {
            return Some((device_id.to_string(), default_backend()));
        }

        // DirectShow names are predictable enough to guess from a slug;
        // other backends use opaque identifiers, so no guess is safe.
        if cfg!(windows) {
            let title_cased = device_id
                .split(['-', '_'])
                .filter(|part| !part.is_empty())
                .map(|part| {
                    let mut chars = part.chars();
                    match chars.next() {
                        Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    }
                })
                .collect::<Vec<_>>()
                .join(" ");
            return Some((
                format!("Microphone ({title_cased})"),
                DeviceBackend::Directshow,
            ));
        }

        None
    }

    async fn enumerate_uncached(&self) -> AircastResult<Vec<Device>> {
        let mut devices: Vec<Device> = Vec::new();
        for invocation in listing_invocations() {
            match self.run_listing(&invocation).await {
                Ok(parsed) => devices.extend(parsed),
                Err(e) => {
                    log::warn!(
                        "[Devices] {} listing failed: {}",
                        invocation.backend.as_str(),
                        e
                    );
                }
            }
        }

        // Merge duplicates across backends by (name, kind, id).
        let mut seen = std::collections::HashSet::new();
        devices.retain(|d| seen.insert((d.backend_name.clone(), d.kind, d.id.clone())));
        Ok(devices)
    }

    async fn run_listing(&self, invocation: &ListingInvocation) -> AircastResult<Vec<Device>> {
        let program = match invocation.program {
            ListingProgram::Encoder => self.encoder_exe.clone(),
            ListingProgram::Other(name) => PathBuf::from(name),
        };

        let output = tokio::time::timeout(
            ENUMERATION_TIMEOUT,
            Command::new(&program)
                .args(&invocation.args)
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| AircastError::Transient("device enumeration timed out".into()))?
        .map_err(|e| AircastError::External {
            message: format!("failed to run {}: {e}", program.display()),
            diagnosis: None,
        })?;

        // Listing invocations exit non-zero by design (the dummy input is
        // never opened); the records are in the text regardless.
        let mut text = String::from_utf8_lossy(&output.stderr).into_owned();
        text.push('\n');
        text.push_str(&String::from_utf8_lossy(&output.stdout));

        Ok((invocation.parser)(&text))
    }
}

enum ListingProgram {
    /// The encoder binary itself.
    Encoder,
    /// A named OS tool (fallback paths only).
    Other(&'static str),
}

struct ListingInvocation {
    program: ListingProgram,
    args: Vec<String>,
    backend: DeviceBackend,
    parser: fn(&str) -> Vec<Device>,
}

/// Default capture backend for the current platform.
fn default_backend() -> DeviceBackend {
    if cfg!(windows) {
        DeviceBackend::Directshow
    } else if cfg!(target_os = "macos") {
        DeviceBackend::Avfoundation
    } else {
        DeviceBackend::AlsaOrPulse
    }
}

/// Platform dispatch for listing invocations, in priority order.
fn listing_invocations() -> Vec<ListingInvocation> {
    if cfg!(windows) {
        vec![
            ListingInvocation {
                program: ListingProgram::Encoder,
                args: str_args(&[
                    "-hide_banner",
                    "-list_devices",
                    "true",
                    "-f",
                    "dshow",
                    "-i",
                    "dummy",
                ]),
                backend: DeviceBackend::Directshow,
                parser: parse::parse_dshow_devices,
            },
            // OS fallback: WMI sound devices via PowerShell. Catches
            // endpoints when the DirectShow subsystem itself is broken.
            ListingInvocation {
                program: ListingProgram::Other("powershell"),
                args: str_args(&[
                    "-NoProfile",
                    "-NonInteractive",
                    "-Command",
                    "Get-CimInstance Win32_SoundDevice | ForEach-Object { $_.Name }",
                ]),
                backend: DeviceBackend::Wasapi,
                parser: parse::parse_wmi_devices,
            },
        ]
    } else if cfg!(target_os = "macos") {
        vec![ListingInvocation {
            program: ListingProgram::Encoder,
            args: str_args(&[
                "-hide_banner",
                "-f",
                "avfoundation",
                "-list_devices",
                "true",
                "-i",
                "",
            ]),
            backend: DeviceBackend::Avfoundation,
            parser: parse::parse_avfoundation_devices,
        }]
    } else {
        vec![ListingInvocation {
            program: ListingProgram::Encoder,
            args: str_args(&["-hide_banner", "-sources", "pulse"]),
            backend: DeviceBackend::AlsaOrPulse,
            parser: parse::parse_pulse_sources,
        }]
    }
}

fn str_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

impl Diagnosis {
    /// Diagnosis for an enumeration that found nothing.
    #[must_use]
    pub fn classify_empty_enumeration() -> Self {
        crate::diagnostics::classify(
            "could not enumerate audio only devices",
            None,
            &crate::diagnostics::DiagnosisContext {
                backend: Some(default_backend().as_str().to_string()),
                ..Default::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> DeviceService {
        DeviceService::new(PathBuf::from("ffmpeg"))
    }

    fn seed_mapping(service: &DeviceService) {
        service.mapping.lock().insert(
            "hd-pro-webcam-c910".to_string(),
            (
                "Microphone (HD Pro Webcam C910)".to_string(),
                DeviceBackend::Directshow,
            ),
        );
    }

    #[test]
    fn mapping_table_lookup_wins() {
        let service = service();
        seed_mapping(&service);
        let (name, backend) = service.resolve_backend_name("hd-pro-webcam-c910").unwrap();
        assert_eq!(name, "Microphone (HD Pro Webcam C910)");
        assert_eq!(backend, DeviceBackend::Directshow);
    }

    #[test]
    fn parenthesized_input_passes_through() {
        let service = service();
        let (name, _) = service
            .resolve_backend_name("Line In (US-4x4 HR)")
            .unwrap();
        assert_eq!(name, "Line In (US-4x4 HR)");
    }

    #[cfg(not(windows))]
    #[test]
    fn unknown_slug_is_unmapped_off_windows() {
        let service = service();
        assert!(service.resolve_backend_name("never-seen").is_none());
    }

    #[cfg(windows)]
    #[test]
    fn unknown_slug_gets_directshow_guess_on_windows() {
        let service = service();
        let (name, backend) = service.resolve_backend_name("usb-mic").unwrap();
        assert_eq!(name, "Microphone (Usb Mic)");
        assert_eq!(backend, DeviceBackend::Directshow);
    }

    #[test]
    fn clear_cache_forgets_devices_but_not_mapping() {
        let service = service();
        seed_mapping(&service);
        *service.cache.lock() = Some(DeviceCache {
            devices: vec![],
            fetched_at: Instant::now(),
        });

        service.clear_cache();
        assert!(service.cache.lock().is_none());
        assert!(service.resolve_backend_name("hd-pro-webcam-c910").is_some());
    }

    #[test]
    fn empty_enumeration_diagnosis_is_backend_enumeration() {
        let d = Diagnosis::classify_empty_enumeration();
        assert_eq!(
            d.category,
            crate::diagnostics::DiagnosisCategory::BackendEnumeration
        );
    }
}
