//! General utilities shared across the application.

use std::time::{SystemTime, UNIX_EPOCH};

// ─────────────────────────────────────────────────────────────────────────────
// Time Utilities
// ─────────────────────────────────────────────────────────────────────────────

/// Returns the current Unix timestamp in milliseconds.
///
/// Returns 0 if the system clock is before the Unix epoch (shouldn't happen in practice).
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Returns the current wall-clock time formatted as an ISO-8601 UTC string.
///
/// Built from the Unix timestamp without pulling in a calendar crate; the
/// civil-date conversion is the standard days-from-epoch algorithm.
#[must_use]
pub fn now_iso8601() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);

    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hh, mm, ss) = (rem / 3600, (rem % 3600) / 60, rem % 60);

    // Civil-from-days (Howard Hinnant's algorithm), valid for the Unix era.
    let z = days as i64 + 719_468;
    let era = z / 146_097;
    let doe = z - era * 146_097;
    let yoe = (doe - doe / 1460 + doe / 36_524 - doe / 146_096) / 365;
    let y = yoe + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = doy - (153 * mp + 2) / 5 + 1;
    let m = if mp < 10 { mp + 3 } else { mp - 9 };
    let y = if m <= 2 { y + 1 } else { y };

    format!("{y:04}-{m:02}-{d:02}T{hh:02}:{mm:02}:{ss:02}Z")
}

// ─────────────────────────────────────────────────────────────────────────────
// Identifier Validation
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum length of a stream identifier.
pub const STREAM_ID_MAX_LEN: usize = 64;

/// Error returned when a stream identifier is not usable as a broker mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamIdError {
    /// The identifier is empty.
    Empty,
    /// The identifier exceeds [`STREAM_ID_MAX_LEN`] characters.
    TooLong(usize),
    /// The identifier contains a character outside `[a-z0-9_-]`.
    InvalidChar(char),
}

impl StreamIdError {
    /// Returns a human-readable description of the error.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Empty => "Stream id must not be empty".to_string(),
            Self::TooLong(len) => format!(
                "Stream id is {len} characters; the maximum is {STREAM_ID_MAX_LEN}"
            ),
            Self::InvalidChar(c) => format!(
                "Stream id contains '{c}'; only lowercase letters, digits, '-' and '_' are allowed"
            ),
        }
    }
}

impl std::fmt::Display for StreamIdError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for StreamIdError {}

/// Validates that a stream id is usable as a broker mount name.
///
/// Mount names travel in URL paths on both the source and listener side, so
/// the accepted alphabet is restricted to lowercase ASCII, digits, `-` and `_`.
pub fn validate_stream_id(id: &str) -> Result<(), StreamIdError> {
    if id.is_empty() {
        return Err(StreamIdError::Empty);
    }
    if id.len() > STREAM_ID_MAX_LEN {
        return Err(StreamIdError::TooLong(id.len()));
    }
    if let Some(c) = id
        .chars()
        .find(|c| !(c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '-' || *c == '_'))
    {
        return Err(StreamIdError::InvalidChar(c));
    }
    Ok(())
}

/// Normalizes a display name for uniqueness comparison: trimmed, lowercased.
#[must_use]
pub fn normalize_name(name: &str) -> String {
    name.trim().to_lowercase()
}

/// Derives a stable URL-safe slug from a backend device name.
///
/// `"Microphone (HD Pro Webcam C910)"` becomes `"hd-pro-webcam-c910"` when the
/// name is parenthesized, otherwise the whole name is slugged. Consecutive
/// non-alphanumeric runs collapse to a single `-`.
#[must_use]
pub fn slugify_device_name(name: &str) -> String {
    // Prefer the parenthesized hardware name when present; the prefix
    // ("Microphone", "Line In") is the backend's framing, not identity.
    let core = match (name.find('('), name.rfind(')')) {
        (Some(open), Some(close)) if close > open + 1 => &name[open + 1..close],
        _ => name,
    };

    let mut slug = String::with_capacity(core.len());
    let mut last_dash = true;
    for c in core.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}
