//! Boot-time loading of the `cids/` directory mirror.
//!
//! Every non-hidden file must be named exactly by the CID generated from
//! its contents. Any violation is a consistency failure and terminates
//! startup; an empty or absent-but-allowed directory is not an error.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::{CidStore, StoreError};
use crate::cid::{describe_invalid_cid, is_normalized_cid, Cid};

fn candidate_files(directory: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut files: Vec<PathBuf> = Vec::new();
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            // Hidden files (such as .gitignore) are not CID fixtures.
            continue;
        }
        if !entry.file_type()?.is_file() {
            continue;
        }
        files.push(entry.path());
    }
    files.sort();
    Ok(files)
}

/// Ensure the store contains a row for every file in its mirror directory.
///
/// Returns the number of files examined. With `allow_missing`, an absent
/// directory is treated as empty.
pub fn load_cids_from_directory(
    store: &CidStore,
    user_id: &str,
    allow_missing: bool,
) -> Result<usize, StoreError> {
    let Some(directory) = store.directory().map(Path::to_path_buf) else {
        return Ok(0);
    };

    if !directory.exists() {
        if allow_missing {
            info!(directory = %directory.display(), "CID directory does not exist, skipping load");
            return Ok(0);
        }
        return Err(StoreError::missing_directory(directory));
    }
    if !directory.is_dir() {
        return Err(StoreError::not_a_directory(directory));
    }

    let files = candidate_files(&directory)?;
    if files.is_empty() {
        debug!(directory = %directory.display(), "CID directory is empty, skipping load");
        return Ok(0);
    }

    for file_path in &files {
        let filename = file_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        if !is_normalized_cid(&filename) {
            return Err(StoreError::invalid_filename(
                filename.clone(),
                describe_invalid_cid(&filename),
            ));
        }

        let file_bytes = std::fs::read(file_path)?;
        let generated = Cid::generate(&file_bytes);
        if filename != generated.as_str() {
            return Err(StoreError::filename_mismatch(
                file_path.clone(),
                filename,
                generated.as_str().to_string(),
            ));
        }

        if store.insert_verified(&generated, file_bytes, user_id)? {
            debug!(cid = %generated, "loaded CID from {}", file_path.display());
        } else {
            debug!(cid = %generated, "CID already present; skipping");
        }
    }

    Ok(files.len())
}
