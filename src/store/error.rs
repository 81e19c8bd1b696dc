use colored::Colorize;
use std::{fmt::Display, path::PathBuf};

use crate::cid::CidError;

#[derive(Debug)]
pub struct StoreError {
    kind: StoreErrorKind,
}

impl StoreError {
    pub fn not_found(cid: String) -> Self {
        Self {
            kind: StoreErrorKind::NotFound(cid),
        }
    }

    pub fn conflict(cid: String) -> Self {
        Self {
            kind: StoreErrorKind::Conflict(cid),
        }
    }

    pub fn invalid_filename(filename: String, diagnostic: String) -> Self {
        Self {
            kind: StoreErrorKind::InvalidFilename {
                filename,
                diagnostic,
            },
        }
    }

    pub fn filename_mismatch(path: PathBuf, expected: String, actual: String) -> Self {
        Self {
            kind: StoreErrorKind::FilenameMismatch {
                path,
                expected,
                actual,
            },
        }
    }

    pub fn missing_directory(path: PathBuf) -> Self {
        Self {
            kind: StoreErrorKind::MissingDirectory(path),
        }
    }

    pub fn not_a_directory(path: PathBuf) -> Self {
        Self {
            kind: StoreErrorKind::NotADirectory(path),
        }
    }

    pub fn io(err: std::io::Error) -> Self {
        Self {
            kind: StoreErrorKind::Io(err),
        }
    }

    pub fn cid(err: CidError) -> Self {
        Self {
            kind: StoreErrorKind::Cid(err),
        }
    }

    /// Consistency failures are fatal at boot and map to exit code 2.
    pub fn is_consistency_failure(&self) -> bool {
        matches!(
            self.kind,
            StoreErrorKind::Conflict(_)
                | StoreErrorKind::InvalidFilename { .. }
                | StoreErrorKind::FilenameMismatch { .. }
                | StoreErrorKind::MissingDirectory(_)
                | StoreErrorKind::NotADirectory(_)
        )
    }
}

#[derive(Debug)]
pub enum StoreErrorKind {
    /// No record exists for the requested CID
    NotFound(String),
    /// A record exists for this CID with different bytes
    Conflict(String),
    /// A mirror file is not named by a structurally valid CID
    InvalidFilename { filename: String, diagnostic: String },
    /// A mirror file's name does not equal the CID of its contents
    FilenameMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },
    /// The mirror directory does not exist
    MissingDirectory(PathBuf),
    /// The configured mirror path is not a directory
    NotADirectory(PathBuf),
    /// Error performing IO operations
    Io(std::io::Error),
    /// Structural CID error
    Cid(CidError),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match &self.kind {
            StoreErrorKind::NotFound(cid) => format!("CID not found: {cid}"),
            StoreErrorKind::Conflict(cid) => format!(
                "CID {cid} already exists in the store with different content"
            ),
            StoreErrorKind::InvalidFilename {
                filename,
                diagnostic,
            } => format!(
                "CID filename {filename:?} is not a valid normalized CID.\n{diagnostic}"
            ),
            StoreErrorKind::FilenameMismatch {
                path,
                expected,
                actual,
            } => format!(
                "CID filename mismatch for {}: filename {expected} does not match generated CID {actual}",
                path.display()
            ),
            StoreErrorKind::MissingDirectory(path) => {
                format!("No CID directory: {}", path.display())
            }
            StoreErrorKind::NotADirectory(path) => {
                format!("CID directory {} is not a directory", path.display())
            }
            StoreErrorKind::Io(err) => format!("{} {err}", "IO ERROR:".underline()),
            StoreErrorKind::Cid(err) => format!("{} {err}", "CID ERROR:".underline()),
        };

        f.write_str(&string)
    }
}

impl std::error::Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::io(value)
    }
}

impl From<CidError> for StoreError {
    fn from(value: CidError) -> Self {
        Self::cid(value)
    }
}
