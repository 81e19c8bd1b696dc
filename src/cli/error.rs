use colored::Colorize;
use std::{fmt::Display, path::PathBuf};

use crate::{
    cid::CidError, export::ExportError, import::BootError, persistence::PersistenceError,
    store::StoreError,
};

/// Errors surfaced by the command-line interface.
#[derive(Debug)]
pub struct CliError {
    kind: CliErrorKind,
}

impl CliError {
    pub fn store(err: StoreError) -> Self {
        Self {
            kind: CliErrorKind::Store(err),
        }
    }

    pub fn persistence(err: PersistenceError) -> Self {
        Self {
            kind: CliErrorKind::Persistence(err),
        }
    }

    pub fn boot(err: BootError) -> Self {
        Self {
            kind: CliErrorKind::Boot(err),
        }
    }

    pub fn export(err: ExportError) -> Self {
        Self {
            kind: CliErrorKind::Export(err),
        }
    }

    pub fn cid(err: CidError) -> Self {
        Self {
            kind: CliErrorKind::Cid(err),
        }
    }

    pub fn cid_not_found(cid: String) -> Self {
        Self {
            kind: CliErrorKind::CidNotFound(cid),
        }
    }

    pub fn missing_file(path: PathBuf) -> Self {
        Self {
            kind: CliErrorKind::MissingFile(path),
        }
    }

    pub fn missing_session_secret() -> Self {
        Self {
            kind: CliErrorKind::MissingSessionSecret,
        }
    }

    pub fn invalid_arguments(message: String) -> Self {
        Self {
            kind: CliErrorKind::InvalidArguments(message),
        }
    }

    pub fn io(err: std::io::Error) -> Self {
        Self {
            kind: CliErrorKind::Io(err),
        }
    }

    /// Process exit code: 2 for store consistency failures, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match &self.kind {
            CliErrorKind::Store(err) if err.is_consistency_failure() => 2,
            _ => 1,
        }
    }
}

#[derive(Debug)]
pub enum CliErrorKind {
    /// CID store failure, possibly a fatal mirror inconsistency
    Store(StoreError),
    /// Workspace tables could not be read or written
    Persistence(PersistenceError),
    /// Boot-CID import failure
    Boot(BootError),
    /// Export assembly failure
    Export(ExportError),
    /// Structurally invalid CID argument
    Cid(CidError),
    /// No content for the requested CID
    CidNotFound(String),
    /// Input file does not exist
    MissingFile(PathBuf),
    /// SESSION_SECRET is required to start the HTTP service
    MissingSessionSecret,
    /// Bad command-line arguments
    InvalidArguments(String),
    /// Error performing IO operations
    Io(std::io::Error),
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match &self.kind {
            CliErrorKind::Store(err) => err.to_string(),
            CliErrorKind::Persistence(err) => err.to_string(),
            CliErrorKind::Boot(err) => err.to_string(),
            CliErrorKind::Export(err) => err.to_string(),
            CliErrorKind::Cid(err) => format!("Invalid CID format: {err}"),
            CliErrorKind::CidNotFound(cid) => format!("CID not found: {cid}"),
            CliErrorKind::MissingFile(path) => {
                format!("missing file at path: {}", path.display())
            }
            CliErrorKind::MissingSessionSecret => {
                format!("{} SESSION_SECRET must be set", "CONFIG:".underline())
            }
            CliErrorKind::InvalidArguments(message) => message.clone(),
            CliErrorKind::Io(err) => format!("{} {err}", "IO ERROR:".underline()),
        };
        f.write_str(&string)
    }
}

impl std::error::Error for CliError {}

impl From<StoreError> for CliError {
    fn from(value: StoreError) -> Self {
        Self::store(value)
    }
}

impl From<PersistenceError> for CliError {
    fn from(value: PersistenceError) -> Self {
        Self::persistence(value)
    }
}

impl From<BootError> for CliError {
    fn from(value: BootError) -> Self {
        Self::boot(value)
    }
}

impl From<ExportError> for CliError {
    fn from(value: ExportError) -> Self {
        Self::export(value)
    }
}

impl From<CidError> for CliError {
    fn from(value: CidError) -> Self {
        Self::cid(value)
    }
}

impl From<std::io::Error> for CliError {
    fn from(value: std::io::Error) -> Self {
        Self::io(value)
    }
}
