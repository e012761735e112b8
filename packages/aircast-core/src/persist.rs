//! Atomic JSON persistence helpers.
//!
//! All persisted documents go through [`write_json_atomic`]: serialize,
//! write to a sibling temp file, then rename over the target. Readers never
//! observe a partially written document. Owning stores serialize their own
//! writers; these helpers are lock-free on purpose.

use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Writes a value as pretty JSON via temp-file-then-rename.
///
/// Creates the parent directory if it doesn't exist. The temp file lives in
/// the same directory as the target so the rename stays on one filesystem.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let contents = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

    let mut temp_path = path.as_os_str().to_owned();
    temp_path.push(".tmp");
    let temp_path = std::path::PathBuf::from(temp_path);

    std::fs::write(&temp_path, contents)?;
    std::fs::rename(&temp_path, path)
}

/// Reads and deserializes a JSON document.
///
/// Returns `Ok(None)` when the file does not exist; a present-but-invalid
/// file is an error so corruption never silently resets state.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}
