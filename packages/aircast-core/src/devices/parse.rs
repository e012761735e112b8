//! Parsers for the encoder's device-listing output.
//!
//! The encoder prints device records as human-oriented text on stderr (or
//! stdout for `-sources`). Each backend has its own shape; the parsers here
//! turn them into [`Device`] records. Names are kept verbatim - including
//! quotes and parentheses - because the encoder argument layer is
//! responsible for quoting, not us.

use super::{Device, DeviceBackend, DeviceKind, DeviceSource};
use crate::utils::slugify_device_name;

/// Parses DirectShow listing output.
///
/// ```text
/// [dshow @ 000001] DirectShow video devices
/// [dshow @ 000001]  "HD Pro Webcam C910"
/// [dshow @ 000001] DirectShow audio devices
/// [dshow @ 000001]  "Microphone (HD Pro Webcam C910)"
/// [dshow @ 000001]     Alternative name "@device_cm_{...}"
/// ```
///
/// Only the audio section is kept; alternative-name lines are skipped
/// because the primary name is what the capture flag accepts.
pub fn parse_dshow_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    let mut in_audio_section = false;

    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("directshow audio devices") {
            in_audio_section = true;
            continue;
        }
        if lower.contains("directshow video devices") {
            in_audio_section = false;
            continue;
        }
        if !in_audio_section || lower.contains("alternative name") {
            continue;
        }
        if let Some(name) = extract_quoted(line) {
            devices.push(Device {
                id: slugify_device_name(&name),
                backend_name: name,
                kind: DeviceKind::Input,
                backend: DeviceBackend::Directshow,
                source: DeviceSource::FfmpegEnumerated,
            });
        }
    }
    devices
}

/// Parses AVFoundation listing output.
///
/// ```text
/// [AVFoundation indev @ 0x7f] AVFoundation video devices:
/// [AVFoundation indev @ 0x7f] [0] FaceTime HD Camera
/// [AVFoundation indev @ 0x7f] AVFoundation audio devices:
/// [AVFoundation indev @ 0x7f] [0] MacBook Pro Microphone
/// ```
pub fn parse_avfoundation_devices(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();
    let mut in_audio_section = false;

    for line in output.lines() {
        let lower = line.to_lowercase();
        if lower.contains("avfoundation audio devices") {
            in_audio_section = true;
            continue;
        }
        if lower.contains("avfoundation video devices") {
            in_audio_section = false;
            continue;
        }
        if !in_audio_section {
            continue;
        }
        // Entries look like `[...] [0] Device Name`; take the text after the
        // last bracketed index.
        let Some(idx_close) = line.rfind("] ") else {
            continue;
        };
        let Some(idx_open) = line[..idx_close].rfind('[') else {
            continue;
        };
        if !line[idx_open + 1..idx_close].chars().all(|c| c.is_ascii_digit()) {
            continue;
        }
        let name = line[idx_close + 2..].trim().to_string();
        if name.is_empty() {
            continue;
        }
        devices.push(Device {
            id: slugify_device_name(&name),
            backend_name: name,
            kind: DeviceKind::Input,
            backend: DeviceBackend::Avfoundation,
            source: DeviceSource::FfmpegEnumerated,
        });
    }
    devices
}

/// Parses PulseAudio source listing output (`-sources pulse`).
///
/// ```text
/// Auto-detected sources for pulse:
///   alsa_input.pci-0000_00_1f.3.analog-stereo [Built-in Audio Analog Stereo]
/// * alsa_output.pci-0000_00_1f.3.analog-stereo.monitor [Monitor of Built-in Audio]
/// ```
///
/// The bracketed description names the device for humans; the leading token
/// is what the capture flag needs. Monitor sources capture an output's
/// playback and are listed as inputs like every other source.
pub fn parse_pulse_sources(output: &str) -> Vec<Device> {
    let mut devices = Vec::new();

    for line in output.lines() {
        let line = line.trim_start_matches('*').trim();
        if line.is_empty()
            || line.to_lowercase().starts_with("auto-detected")
            || line.to_lowercase().starts_with("cannot")
        {
            continue;
        }
        let (name, description) = match line.find(" [") {
            Some(pos) => {
                let desc = line[pos + 2..].trim_end_matches(']').trim();
                (line[..pos].trim(), desc)
            }
            None => (line, ""),
        };
        if name.is_empty() || name.contains(' ') {
            continue;
        }
        let id_basis = if description.is_empty() { name } else { description };
        devices.push(Device {
            id: slugify_device_name(id_basis),
            backend_name: name.to_string(),
            kind: DeviceKind::Input,
            backend: DeviceBackend::AlsaOrPulse,
            source: DeviceSource::FfmpegEnumerated,
        });
    }
    devices
}

/// Parses WMI sound-device names (one per line) from the OS fallback query.
pub fn parse_wmi_devices(output: &str) -> Vec<Device> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.eq_ignore_ascii_case("name"))
        .map(|name| Device {
            id: slugify_device_name(name),
            backend_name: name.to_string(),
            kind: DeviceKind::Input,
            backend: DeviceBackend::Wasapi,
            source: DeviceSource::OsWmi,
        })
        .collect()
}

/// Extracts the first double-quoted span from a line.
fn extract_quoted(line: &str) -> Option<String> {
    let start = line.find('"')?;
    let end = line[start + 1..].find('"')? + start + 1;
    Some(line[start + 1..end].to_string())
}
