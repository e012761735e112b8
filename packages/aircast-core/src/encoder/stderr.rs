//! Bounded stderr capture for supervised subprocesses.
//!
//! Every supervised process (broker, encoders) gets a [`StderrRing`]: a
//! bounded text buffer fed by a reader task. The ring keeps the newest
//! bytes, emits rate-limited log lines, and answers pattern probes for the
//! startup window.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::ChildStderr;

/// Maximum characters retained.
pub const STDERR_RING_CAPACITY: usize = 2000;

/// Minimum interval between structured log lines per ring.
const LOG_INTERVAL: Duration = Duration::from_millis(200);

/// Bounded ring buffer over a subprocess's stderr.
pub struct StderrRing {
    /// Tag used in log lines (stream id or "broker").
    tag: String,
    buf: Mutex<VecDeque<char>>,
    last_log: Mutex<Option<Instant>>,
}

impl StderrRing {
    /// Creates an empty ring with a log tag.
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            buf: Mutex::new(VecDeque::with_capacity(STDERR_RING_CAPACITY)),
            last_log: Mutex::new(None),
        }
    }

    /// Appends a line, discarding the oldest characters beyond capacity.
    pub fn push_line(&self, line: &str) {
        {
            let mut buf = self.buf.lock();
            for c in line.chars().chain(std::iter::once('\n')) {
                if buf.len() == STDERR_RING_CAPACITY {
                    buf.pop_front();
                }
                buf.push_back(c);
            }
        }

        // Rate-limit log output; stderr floods otherwise drown the log.
        let mut last = self.last_log.lock();
        let now = Instant::now();
        if last.map_or(true, |t| now.duration_since(t) >= LOG_INTERVAL) {
            log::debug!("[Encoder:{}] {}", self.tag, line);
            *last = Some(now);
        }
    }

    /// Returns the current contents.
    #[must_use]
    pub fn contents(&self) -> String {
        self.buf.lock().iter().collect()
    }

    /// Returns whether the (lowercased) contents contain `needle`.
    #[must_use]
    pub fn contains(&self, needle: &str) -> bool {
        self.contents().to_lowercase().contains(needle)
    }
}

/// Reads a child's stderr into a ring until EOF.
///
/// Runs as a background task owned by the process supervisor; ends when
/// the subprocess closes its stderr (i.e. exits).
pub async fn pump_stderr(stderr: ChildStderr, ring: std::sync::Arc<StderrRing>) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => ring.push_line(&line),
            Ok(None) => break,
            Err(e) => {
                log::debug!("[Encoder:{}] stderr read error: {}", ring.tag, e);
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_bytes_under_capacity() {
        let ring = StderrRing::new("test");
        ring.push_line("hello");
        assert_eq!(ring.contents(), "hello\n");
    }

    #[test]
    fn discards_oldest_beyond_capacity() {
        let ring = StderrRing::new("test");
        let long = "x".repeat(STDERR_RING_CAPACITY);
        ring.push_line(&long);
        ring.push_line("tail-marker");

        let contents = ring.contents();
        assert!(contents.len() <= STDERR_RING_CAPACITY);
        assert!(contents.ends_with("tail-marker\n"));
        assert!(contents.starts_with('x'));
    }

    #[test]
    fn contains_is_case_insensitive() {
        let ring = StderrRing::new("test");
        ring.push_line("Unknown Encoder 'libmp3lame'");
        assert!(ring.contains("unknown encoder"));
        assert!(!ring.contains("mountpoint"));
    }

    #[test]
    fn multibyte_lines_do_not_split_chars() {
        let ring = StderrRing::new("test");
        ring.push_line(&"é".repeat(STDERR_RING_CAPACITY + 10));
        // Ring is char-based, so contents remain valid UTF-8 of the
        // capacity length.
        assert_eq!(ring.contents().chars().count(), STDERR_RING_CAPACITY);
    }
}
