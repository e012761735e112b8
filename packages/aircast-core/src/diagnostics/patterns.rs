//! Ordered stderr pattern table for the failure classifier.
//!
//! The table is data, not code: each row pairs a [`DiagnosisCategory`] with
//! the lowercase substrings that select it. Rows are tested top to bottom
//! and the first match wins, so more specific rows must precede more
//! general ones. Reordering rows changes the classifier contract.

use super::DiagnosisCategory;

/// One row of the classifier table.
pub struct PatternRow {
    /// Category produced when any needle matches.
    pub category: DiagnosisCategory,
    /// Lowercase substrings searched in the (lowercased) stderr.
    pub needles: &'static [&'static str],
}

/// The ordered match table.
///
/// Precedence is part of the public contract: device-level failures beat
/// broker-level failures, which beat generic transport failures. A scored
/// matcher could later replace first-match without changing the I/O shape,
/// as long as it preserves this ordering for single-category inputs.
pub const PATTERN_TABLE: &[PatternRow] = &[
    PatternRow {
        category: DiagnosisCategory::DeviceNotFound,
        needles: &[
            "could not find audio only device",
            "could not find audio device",
            "audio device not found",
            "no such audio device",
            "error opening input device",
            "device not found",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::DeviceBusy,
        needles: &[
            "device or resource busy",
            "resource busy",
            "device is being used",
            "exclusive mode",
            "access is denied by another application",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::VirtualAudio,
        needles: &["vb-audio", "vb-cable", "voicemeeter", "virtual audio"],
    },
    PatternRow {
        category: DiagnosisCategory::BackendEnumeration,
        needles: &[
            "could not enumerate audio only devices",
            "could not enumerate",
            "directshow error",
            "error during enumeration",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::CodecMissing,
        needles: &[
            "unknown encoder",
            "encoder not found",
            "codec not currently supported",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::FormatUnsupported,
        needles: &[
            "unsupported format",
            "invalid sample format",
            "sample format is not supported",
            "could not write header",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::Auth,
        needles: &[
            "401 unauthorized",
            "authentication failed",
            "invalid password",
            "401",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::MountInUse,
        needles: &["mountpoint in use", "mount in use", "mountpoint occupied"],
    },
    PatternRow {
        category: DiagnosisCategory::SourceLimit,
        needles: &["too many sources", "source limit reached", "maximum sources"],
    },
    PatternRow {
        category: DiagnosisCategory::PortConflict,
        needles: &[
            "address already in use",
            "could not bind",
            "bind failed",
            "eaddrinuse",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::Connection,
        needles: &[
            "connection refused",
            "connection reset",
            "network is unreachable",
            "no route to host",
            "failed to connect",
            "end of file",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::Resource,
        needles: &[
            "out of memory",
            "cannot allocate memory",
            "memory allocation",
        ],
    },
    PatternRow {
        category: DiagnosisCategory::Timeout,
        needles: &["timed out", "timeout"],
    },
];

/// Returns the first category whose needles match the lowercased stderr.
pub fn match_stderr(stderr_lower: &str) -> Option<DiagnosisCategory> {
    if stderr_lower.is_empty() {
        return None;
    }
    PATTERN_TABLE
        .iter()
        .find(|row| row.needles.iter().any(|n| stderr_lower.contains(n)))
        .map(|row| row.category)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_match_wins_over_later_rows() {
        // Contains both a device-busy and a connection needle; the
        // device-busy row is earlier in the table.
        let stderr = "device or resource busy; also connection refused";
        assert_eq!(match_stderr(stderr), Some(DiagnosisCategory::DeviceBusy));
    }

    #[test]
    fn empty_stderr_matches_nothing() {
        assert_eq!(match_stderr(""), None);
    }

    #[test]
    fn timeout_is_last_resort_before_generic() {
        assert_eq!(
            match_stderr("i/o operation timed out"),
            Some(DiagnosisCategory::Timeout)
        );
    }

    #[test]
    fn auth_beats_mount_in_use() {
        let stderr = "401 unauthorized: mountpoint in use";
        assert_eq!(match_stderr(stderr), Some(DiagnosisCategory::Auth));
    }
}
