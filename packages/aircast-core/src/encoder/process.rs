//! Encoder subprocess supervision.
//!
//! One [`EncoderProcess`] owns exactly one encoder subprocess for one
//! stream. Spawning runs the format cascade (MP3 → AAC → OGG on
//! unknown-encoder errors), watches the startup window for fatal stderr,
//! and - once the process survives the window - hands it to an exit
//! watcher that reports the final outcome to the stream manager.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::process::Command;
use tokio::sync::mpsc;

use super::args::{build_encoder_args, BrokerSourceTarget, EncoderInput};
use super::stderr::{pump_stderr, StderrRing};
use crate::diagnostics::{classify, match_stderr, Diagnosis, DiagnosisContext};
use crate::platform::ProcessControl;
use crate::streams::types::{EncodingConfig, StreamFormat};

/// How long a spawn has to prove itself before it counts as running.
pub const STARTUP_WINDOW: Duration = Duration::from_secs(5);

/// Poll cadence inside the startup window.
const STARTUP_POLL: Duration = Duration::from_millis(150);

/// Grace period between SIGTERM and SIGKILL.
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Hard ceiling for the whole termination sequence.
const TERMINATE_TOTAL: Duration = Duration::from_secs(10);

/// Poll cadence while waiting for termination.
const TERMINATE_POLL: Duration = Duration::from_millis(250);

/// Cascade trigger in encoder stderr.
const UNKNOWN_ENCODER: &str = "unknown encoder";

/// Final outcome of an encoder process, delivered to the stream manager.
#[derive(Debug)]
pub struct EncoderExit {
    /// Stream the encoder belonged to.
    pub stream_id: String,
    /// Pid of the exited process, for staleness checks after restarts.
    pub pid: u32,
    /// Raw exit code (unnormalized; may be an unsigned Windows value).
    pub exit_code: Option<i64>,
    /// Ring contents at exit time.
    pub stderr_tail: String,
    /// Whether the exit was requested via [`EncoderProcess::terminate`].
    pub intentional: bool,
}

/// Everything needed to spawn one encoder.
pub struct SpawnParams<'a> {
    pub stream_id: &'a str,
    pub encoder_exe: &'a Path,
    pub input: EncoderInput<'a>,
    pub encoding: &'a EncodingConfig,
    pub preferred_format: StreamFormat,
    pub target: &'a BrokerSourceTarget,
    pub context: DiagnosisContext,
    /// Startup window override; production callers use [`STARTUP_WINDOW`].
    pub startup_window: Duration,
}

/// A live encoder subprocess that survived its startup window.
pub struct EncoderProcess {
    pid: u32,
    format: StreamFormat,
    stderr: Arc<StderrRing>,
    intentional: Arc<AtomicBool>,
    control: Arc<dyn ProcessControl>,
}

impl std::fmt::Debug for EncoderProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncoderProcess")
            .field("pid", &self.pid)
            .field("format", &self.format)
            .finish()
    }
}

enum AttemptOutcome {
    /// Process survived the startup window.
    Up(Arc<EncoderProcess>),
    /// Encoder lacks this codec; try the next format.
    UnknownEncoder,
    /// Unrecoverable failure.
    Fatal(Box<Diagnosis>),
}

impl EncoderProcess {
    /// Spawns an encoder for a stream, running the format cascade.
    ///
    /// Returns once the process has survived the startup window without a
    /// fatal stderr pattern, or with the diagnosis of the failure. The
    /// cascade only applies here - a codec failure after `running` is a
    /// plain failure, not a retry.
    pub async fn spawn(
        params: SpawnParams<'_>,
        control: Arc<dyn ProcessControl>,
        exit_tx: mpsc::UnboundedSender<EncoderExit>,
    ) -> Result<Arc<EncoderProcess>, Box<Diagnosis>> {
        let mut format = params.preferred_format;
        loop {
            let attempt = Self::spawn_once(&params, format, Arc::clone(&control), &exit_tx).await;
            match attempt {
                AttemptOutcome::Up(process) => {
                    log::info!(
                        "[Encoder:{}] Running (pid {}, format {:?})",
                        params.stream_id,
                        process.pid,
                        format
                    );
                    return Ok(process);
                }
                AttemptOutcome::UnknownEncoder => match format.next_fallback() {
                    Some(next) => {
                        log::warn!(
                            "[Encoder:{}] Codec for {:?} unavailable, falling back to {:?}",
                            params.stream_id,
                            format,
                            next
                        );
                        format = next;
                    }
                    None => {
                        return Err(Box::new(classify(
                            UNKNOWN_ENCODER,
                            None,
                            &params.context,
                        )));
                    }
                },
                AttemptOutcome::Fatal(diagnosis) => return Err(diagnosis),
            }
        }
    }

    async fn spawn_once(
        params: &SpawnParams<'_>,
        format: StreamFormat,
        control: Arc<dyn ProcessControl>,
        exit_tx: &mpsc::UnboundedSender<EncoderExit>,
    ) -> AttemptOutcome {
        let args = build_encoder_args(
            params.stream_id,
            &params.input,
            params.encoding,
            format,
            params.target,
        );

        let mut child = match Command::new(params.encoder_exe)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                log::error!(
                    "[Encoder:{}] Failed to spawn {}: {}",
                    params.stream_id,
                    params.encoder_exe.display(),
                    e
                );
                return AttemptOutcome::Fatal(Box::new(classify(
                    &format!("failed to spawn encoder: {e}"),
                    None,
                    &params.context,
                )));
            }
        };

        let Some(pid) = child.id() else {
            return AttemptOutcome::Fatal(Box::new(classify(
                "encoder exited before reporting a pid",
                None,
                &params.context,
            )));
        };

        let ring = Arc::new(StderrRing::new(params.stream_id));
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(pump_stderr(stderr, Arc::clone(&ring)));
        }

        // Startup window: the process must stay up with clean stderr.
        let deadline = tokio::time::Instant::now() + params.startup_window;
        loop {
            if let Ok(Some(status)) = child.try_wait() {
                let code = status.code().map(i64::from);
                if ring.contains(UNKNOWN_ENCODER) {
                    return AttemptOutcome::UnknownEncoder;
                }
                return AttemptOutcome::Fatal(Box::new(classify(
                    &ring.contents(),
                    code,
                    &params.context,
                )));
            }

            if ring.contains(UNKNOWN_ENCODER) {
                let _ = child.kill().await;
                return AttemptOutcome::UnknownEncoder;
            }

            let stderr_lower = ring.contents().to_lowercase();
            if match_stderr(&stderr_lower).is_some() {
                let _ = child.kill().await;
                let _ = child.wait().await;
                return AttemptOutcome::Fatal(Box::new(classify(
                    &ring.contents(),
                    None,
                    &params.context,
                )));
            }

            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(STARTUP_POLL).await;
        }

        let intentional = Arc::new(AtomicBool::new(false));
        let process = Arc::new(EncoderProcess {
            pid,
            format,
            stderr: Arc::clone(&ring),
            intentional: Arc::clone(&intentional),
            control,
        });

        // Exit watcher owns the child from here; it reaps the process and
        // reports the outcome exactly once.
        let stream_id = params.stream_id.to_string();
        let tx = exit_tx.clone();
        tokio::spawn(async move {
            let exit_code = match child.wait().await {
                Ok(status) => status.code().map(i64::from),
                Err(e) => {
                    log::warn!("[Encoder:{}] Wait failed: {}", stream_id, e);
                    None
                }
            };
            let _ = tx.send(EncoderExit {
                stream_id,
                pid,
                exit_code,
                stderr_tail: ring.contents(),
                intentional: intentional.load(Ordering::SeqCst),
            });
        });

        AttemptOutcome::Up(process)
    }

    /// OS pid of the subprocess.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Format that actually started (after any cascade).
    #[must_use]
    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Current ring contents.
    #[must_use]
    pub fn stderr_tail(&self) -> String {
        self.stderr.contents()
    }

    /// Whether the subprocess is still alive.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.control.is_process_alive(self.pid)
    }

    /// Terminates the subprocess: SIGTERM, then SIGKILL after the grace
    /// period. Completes within [`TERMINATE_TOTAL`].
    pub async fn terminate(&self) {
        self.intentional.store(true, Ordering::SeqCst);

        if !self.is_alive() {
            return;
        }

        log::info!("[Encoder] Terminating pid {}", self.pid);
        if let Err(e) = self.control.terminate(self.pid) {
            log::debug!("[Encoder] SIGTERM failed for pid {}: {}", self.pid, e);
        }

        let start = tokio::time::Instant::now();
        while start.elapsed() < TERMINATE_GRACE {
            if !self.is_alive() {
                return;
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }

        log::warn!(
            "[Encoder] Pid {} survived SIGTERM, escalating to kill",
            self.pid
        );
        if let Err(e) = self.control.kill_process_tree(self.pid) {
            log::warn!("[Encoder] Kill failed for pid {}: {}", self.pid, e);
        }

        while start.elapsed() < TERMINATE_TOTAL {
            if !self.is_alive() {
                return;
            }
            tokio::time::sleep(TERMINATE_POLL).await;
        }
        log::error!("[Encoder] Pid {} did not die within the kill window", self.pid);
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::platform;
    use std::io::Write;
    use std::os::unix::fs::PermissionsExt;

    /// Writes an executable shell script standing in for the encoder.
    fn fake_encoder(dir: &std::path::Path, body: &str) -> std::path::PathBuf {
        let path = dir.join("fake-encoder.sh");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "#!/bin/sh\n{body}").unwrap();
        let mut perms = file.metadata().unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn params<'a>(
        exe: &'a std::path::Path,
        target: &'a BrokerSourceTarget,
        encoding: &'a EncodingConfig,
    ) -> SpawnParams<'a> {
        SpawnParams {
            stream_id: "test-stream",
            encoder_exe: exe,
            input: EncoderInput::File(std::path::Path::new("/dev/zero")),
            encoding,
            preferred_format: StreamFormat::Mp3,
            target,
            context: DiagnosisContext::default(),
            startup_window: Duration::from_millis(400),
        }
    }

    fn target() -> BrokerSourceTarget {
        BrokerSourceTarget {
            port: 8000,
            source_password: "pw".into(),
        }
    }

    #[tokio::test]
    async fn surviving_the_window_counts_as_running() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_encoder(dir.path(), "sleep 30");
        let (tx, _rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let process = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .expect("long-lived process should pass the window");
        assert!(process.is_alive());
        process.terminate().await;
        assert!(!process.is_alive());
    }

    #[tokio::test]
    async fn early_exit_with_fatal_stderr_fails() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_encoder(
            dir.path(),
            "echo 'Connection refused' >&2\nexit 1",
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let err = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .expect_err("fatal stderr should fail the spawn");
        assert_eq!(
            err.category,
            crate::diagnostics::DiagnosisCategory::Connection
        );
    }

    #[tokio::test]
    async fn unknown_encoder_cascades_to_next_format() {
        let dir = tempfile::tempdir().unwrap();
        // Fail with unknown-encoder for libmp3lame, succeed otherwise.
        let exe = fake_encoder(
            dir.path(),
            r#"for arg in "$@"; do
  if [ "$arg" = "libmp3lame" ]; then
    echo "Unknown encoder 'libmp3lame'" >&2
    exit 1
  fi
done
sleep 30"#,
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let process = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .expect("cascade should land on AAC");
        assert_eq!(process.format(), StreamFormat::Aac);
        process.terminate().await;
    }

    #[tokio::test]
    async fn exhausted_cascade_reports_codec_missing() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_encoder(
            dir.path(),
            "echo \"Unknown encoder\" >&2\nexit 1",
        );
        let (tx, _rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let err = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .expect_err("all formats should be exhausted");
        assert_eq!(
            err.category,
            crate::diagnostics::DiagnosisCategory::CodecMissing
        );
    }

    #[tokio::test]
    async fn unintentional_exit_reports_through_the_channel() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_encoder(dir.path(), "sleep 1\nexit 3");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let _process = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .expect("process outlives the window");

        let exit = rx.recv().await.expect("exit must be reported");
        assert_eq!(exit.stream_id, "test-stream");
        assert_eq!(exit.exit_code, Some(3));
        assert!(!exit.intentional);
    }

    #[tokio::test]
    async fn terminate_marks_exit_intentional() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_encoder(dir.path(), "sleep 30");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let encoding = EncodingConfig::default();
        let t = target();

        let process = EncoderProcess::spawn(params(&exe, &t, &encoding), platform::native(), tx)
            .await
            .unwrap();
        process.terminate().await;

        let exit = rx.recv().await.expect("exit must be reported");
        assert!(exit.intentional);
    }
}
