//! Shared helpers: canonical JSON emission and file IO.

use serde::Serialize;
use std::{
    fs::{File, OpenOptions},
    io::Write,
    path::Path,
};

/// Render a value as canonical JSON: keys sorted, two-space indent.
///
/// Export CIDs are derived from these bytes, so the emission must be
/// byte-stable across runs. `serde_json` maps are ordered, which gives the
/// sorted keys; the pretty printer supplies the fixed indent.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(value)
}

/// Canonical JSON as UTF-8 bytes.
pub fn canonical_json_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    canonical_json(value).map(String::into_bytes)
}

/// Decode bytes as UTF-8 text, replacing invalid sequences.
pub fn lossy_text(content: &[u8]) -> String {
    String::from_utf8_lossy(content).into_owned()
}

/// Grab a read-only reference to a file
pub fn get_read(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new().read(true).open(path)
}

/// Grab a write-only reference to a file
pub fn get_write(path: &Path) -> Result<File, std::io::Error> {
    OpenOptions::new()
        .create(true)
        .append(false)
        .truncate(true)
        .write(true)
        .open(path)
}

/// Write a file atomically: temp file in the same directory, then rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), std::io::Error> {
    let directory = path.parent().unwrap_or_else(|| Path::new("."));
    let temp_path = directory.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "write".to_string())
    ));
    let mut file = get_write(&temp_path)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}

/// Format a byte count as a human-readable string.
pub fn format_size(num_bytes: u64) -> String {
    const UNITS: [&str; 5] = ["bytes", "KB", "MB", "GB", "TB"];
    let mut size = num_bytes as f64;
    for unit in UNITS {
        if size < 1024.0 || unit == "TB" {
            if unit == "bytes" {
                return format!("{} bytes", size as u64);
            }
            return format!("{size:.1} {unit}");
        }
        size /= 1024.0;
    }
    format!("{num_bytes} bytes")
}
