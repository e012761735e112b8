//! Encoder invocation argument construction.
//!
//! Builds the full argument vector for one encoder run: capture input,
//! codec settings, and the broker source-protocol output URL. The broker
//! port always comes from the caller's parsed broker configuration - it is
//! deliberately impossible to construct a target without one.

use std::path::Path;

use crate::devices::DeviceBackend;
use crate::streams::types::{EncodingConfig, StreamFormat};

/// Broker connection parameters for the source side.
///
/// The host is always loopback: encoders run on the same machine as the
/// broker, and the listener-facing hostname never applies to the source leg.
#[derive(Clone)]
pub struct BrokerSourceTarget {
    /// Port parsed from the broker XML.
    pub port: u16,
    /// Source password parsed from the broker XML.
    pub source_password: String,
}

impl BrokerSourceTarget {
    /// Source-protocol URL for a mount.
    #[must_use]
    pub fn source_url(&self, mount: &str) -> String {
        format!(
            "icecast://source:{}@localhost:{}/{}",
            self.source_password, self.port, mount
        )
    }

    /// Needle identifying this orchestrator's encoders in a process list,
    /// without exposing the password.
    #[must_use]
    pub fn orphan_needle(&self) -> String {
        format!("@localhost:{}/", self.port)
    }
}

/// Resolved capture input for one encoder run.
pub enum EncoderInput<'a> {
    /// Capture from a device using its backend-specific name.
    Device {
        backend: DeviceBackend,
        backend_name: &'a str,
    },
    /// Read a file at native rate.
    File(&'a Path),
}

/// Builds the argument vector for one encoder invocation.
///
/// Device names are passed through verbatim; per-backend quoting is the
/// encoder's own responsibility once the argument reaches it unsplit.
#[must_use]
pub fn build_encoder_args(
    mount: &str,
    input: &EncoderInput<'_>,
    encoding: &EncodingConfig,
    format: StreamFormat,
    target: &BrokerSourceTarget,
) -> Vec<String> {
    let mut args: Vec<String> = vec!["-hide_banner".into(), "-nostdin".into()];

    match input {
        EncoderInput::Device {
            backend,
            backend_name,
        } => match backend {
            DeviceBackend::Directshow | DeviceBackend::Wasapi => {
                // WMI-discovered endpoints are captured through DirectShow;
                // WASAPI has no capture demuxer of its own here.
                args.extend(["-f".into(), "dshow".into()]);
                args.extend(["-i".into(), format!("audio={backend_name}")]);
            }
            DeviceBackend::Avfoundation => {
                args.extend(["-f".into(), "avfoundation".into()]);
                args.extend(["-i".into(), format!(":{backend_name}")]);
            }
            DeviceBackend::AlsaOrPulse => {
                args.extend(["-f".into(), "pulse".into()]);
                args.extend(["-i".into(), (*backend_name).to_string()]);
            }
        },
        EncoderInput::File(path) => {
            // -re reads at native rate; without it a file would be encoded
            // and pushed faster than real time.
            args.push("-re".into());
            args.extend(["-i".into(), path.to_string_lossy().into_owned()]);
        }
    }

    args.extend([
        "-vn".into(),
        "-c:a".into(),
        format.codec().into(),
        "-b:a".into(),
        format!("{}k", encoding.bitrate_kbps),
        "-ar".into(),
        encoding.sample_rate.to_string(),
        "-ac".into(),
        encoding.channels.to_string(),
        "-f".into(),
        format.container().into(),
        "-content_type".into(),
        format.content_type().into(),
        target.source_url(mount),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn target() -> BrokerSourceTarget {
        BrokerSourceTarget {
            port: 8000,
            source_password: "hackme".into(),
        }
    }

    #[test]
    fn device_capture_uses_backend_flag() {
        let input = EncoderInput::Device {
            backend: DeviceBackend::Directshow,
            backend_name: "Microphone (HD Pro Webcam C910)",
        };
        let args = build_encoder_args(
            "english",
            &input,
            &EncodingConfig::default(),
            StreamFormat::Mp3,
            &target(),
        );
        let dshow_pos = args.iter().position(|a| a == "dshow").unwrap();
        assert_eq!(args[dshow_pos - 1], "-f");
        assert!(args.contains(&"audio=Microphone (HD Pro Webcam C910)".to_string()));
    }

    #[test]
    fn file_input_reads_at_native_rate() {
        let path = PathBuf::from("/music/loop.wav");
        let input = EncoderInput::File(&path);
        let args = build_encoder_args(
            "music",
            &input,
            &EncodingConfig::default(),
            StreamFormat::Mp3,
            &target(),
        );
        assert!(args.contains(&"-re".to_string()));
        assert!(args.contains(&"/music/loop.wav".to_string()));
    }

    #[test]
    fn output_targets_localhost_with_parsed_port() {
        let args = build_encoder_args(
            "english",
            &EncoderInput::File(Path::new("a.wav")),
            &EncodingConfig::default(),
            StreamFormat::Mp3,
            &BrokerSourceTarget {
                port: 8200,
                source_password: "pw".into(),
            },
        );
        let url = args.last().unwrap();
        assert_eq!(url, "icecast://source:pw@localhost:8200/english");
    }

    #[test]
    fn format_selects_codec_and_container() {
        let args = build_encoder_args(
            "x",
            &EncoderInput::File(Path::new("a.wav")),
            &EncodingConfig::default(),
            StreamFormat::Ogg,
            &target(),
        );
        assert!(args.contains(&"libvorbis".to_string()));
        assert!(args.contains(&"ogg".to_string()));
        assert!(args.contains(&"application/ogg".to_string()));
    }

    #[test]
    fn encoding_values_are_applied() {
        let encoding = EncodingConfig {
            bitrate_kbps: 128,
            sample_rate: 48_000,
            channels: 1,
        };
        let args = build_encoder_args(
            "x",
            &EncoderInput::File(Path::new("a.wav")),
            &encoding,
            StreamFormat::Mp3,
            &target(),
        );
        assert!(args.contains(&"128k".to_string()));
        assert!(args.contains(&"48000".to_string()));
        assert!(args.contains(&"1".to_string()));
    }

    #[test]
    fn quoted_device_names_pass_through_verbatim() {
        let input = EncoderInput::Device {
            backend: DeviceBackend::AlsaOrPulse,
            backend_name: "alsa_input.usb-\"odd\"-name",
        };
        let args = build_encoder_args(
            "x",
            &input,
            &EncodingConfig::default(),
            StreamFormat::Mp3,
            &target(),
        );
        assert!(args.contains(&"alsa_input.usb-\"odd\"-name".to_string()));
    }

    #[test]
    fn orphan_needle_omits_the_password() {
        let t = target();
        assert_eq!(t.orphan_needle(), "@localhost:8000/");
        assert!(!t.orphan_needle().contains("hackme"));
    }
}
