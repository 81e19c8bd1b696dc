use colored::Colorize;
use std::fmt::Display;

use crate::{persistence::PersistenceError, store::StoreError};

#[derive(Debug)]
pub struct ExportError {
    kind: ExportErrorKind,
}

impl ExportError {
    pub fn serde(err: serde_json::Error) -> Self {
        Self {
            kind: ExportErrorKind::Serde(err),
        }
    }

    pub fn store(err: StoreError) -> Self {
        Self {
            kind: ExportErrorKind::Store(err),
        }
    }

    pub fn persistence(err: PersistenceError) -> Self {
        Self {
            kind: ExportErrorKind::Persistence(err),
        }
    }
}

#[derive(Debug)]
pub enum ExportErrorKind {
    /// Section content could not be serialized
    Serde(serde_json::Error),
    /// The CID store rejected a write
    Store(StoreError),
    /// Entity tables could not be read or written
    Persistence(PersistenceError),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match &self.kind {
            ExportErrorKind::Serde(err) => format!("{} {err}", "SERIALIZE:".underline()),
            ExportErrorKind::Store(err) => err.to_string(),
            ExportErrorKind::Persistence(err) => err.to_string(),
        };
        f.write_str(&string)
    }
}

impl std::error::Error for ExportError {}

impl From<serde_json::Error> for ExportError {
    fn from(value: serde_json::Error) -> Self {
        Self::serde(value)
    }
}

impl From<StoreError> for ExportError {
    fn from(value: StoreError) -> Self {
        Self::store(value)
    }
}

impl From<PersistenceError> for ExportError {
    fn from(value: PersistenceError) -> Self {
        Self::persistence(value)
    }
}
