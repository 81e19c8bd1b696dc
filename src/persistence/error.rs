use colored::Colorize;
use std::{fmt::Display, path::PathBuf};

#[derive(Debug)]
pub struct PersistenceError {
    kind: PersistenceErrorKind,
}

impl PersistenceError {
    pub fn io(err: std::io::Error) -> Self {
        Self {
            kind: PersistenceErrorKind::Io(err),
        }
    }

    pub fn serde(err: serde_json::Error) -> Self {
        Self {
            kind: PersistenceErrorKind::Serde(err),
        }
    }

    pub fn unreadable(path: PathBuf, err: std::io::Error) -> Self {
        Self {
            kind: PersistenceErrorKind::Unreadable(path, err),
        }
    }

    pub fn invalid_definition(message: String) -> Self {
        Self {
            kind: PersistenceErrorKind::InvalidDefinition(message),
        }
    }

    pub fn store(err: crate::store::StoreError) -> Self {
        Self {
            kind: PersistenceErrorKind::Store(err),
        }
    }

    pub fn unknown_entity(kind: &str, name: &str) -> Self {
        Self {
            kind: PersistenceErrorKind::UnknownEntity(kind.to_string(), name.to_string()),
        }
    }
}

#[derive(Debug)]
pub enum PersistenceErrorKind {
    /// Error performing IO operations
    Io(std::io::Error),
    /// Workspace snapshot could not be serialized or parsed
    Serde(serde_json::Error),
    /// Workspace snapshot file exists but could not be read
    Unreadable(PathBuf, std::io::Error),
    /// Definition text failed validation
    InvalidDefinition(String),
    /// CID store rejected a write
    Store(crate::store::StoreError),
    /// No row exists for this entity
    UnknownEntity(String, String),
}

impl Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let string = match &self.kind {
            PersistenceErrorKind::Io(err) => format!("{} {err}", "IO ERROR:".underline()),
            PersistenceErrorKind::Serde(err) => {
                format!("{} {err}", "WORKSPACE FILE:".underline())
            }
            PersistenceErrorKind::Unreadable(path, err) => {
                format!("cannot read workspace file {}: {err}", path.display())
            }
            PersistenceErrorKind::InvalidDefinition(message) => message.clone(),
            PersistenceErrorKind::Store(err) => err.to_string(),
            PersistenceErrorKind::UnknownEntity(kind, name) => {
                format!("no {kind} named {name:?}")
            }
        };
        f.write_str(&string)
    }
}

impl std::error::Error for PersistenceError {}

impl From<std::io::Error> for PersistenceError {
    fn from(value: std::io::Error) -> Self {
        Self::io(value)
    }
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        Self::serde(value)
    }
}

impl From<crate::store::StoreError> for PersistenceError {
    fn from(value: crate::store::StoreError) -> Self {
        Self::store(value)
    }
}
