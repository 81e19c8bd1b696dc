//! The CID store: byte blobs keyed by their CID.
//!
//! Rows live in memory and are mirrored to the `cids/` directory as
//! write-once files whose basename equals the CID of their contents. The
//! store is a set, not a multiset: putting the same bytes any number of
//! times yields one row, and an attempt to bind different bytes to an
//! existing CID is a consistency error.

mod directory;
mod error;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    collections::BTreeSet,
    path::{Path, PathBuf},
};

use crate::{cid::Cid, utils::write_atomic};

pub use directory::load_cids_from_directory;
pub use error::{StoreError, StoreErrorKind};

/// One stored blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CidRecord {
    /// Store path: `/` + CID
    pub path: String,
    /// The content bytes
    pub file_data: Vec<u8>,
    /// Content size in bytes
    pub file_size: u64,
    /// When the record was first written
    pub created_at: DateTime<Utc>,
    /// User who first uploaded the content
    pub uploaded_by_user_id: String,
}

/// Content-addressed blob store with an optional directory mirror.
#[derive(Debug, Default)]
pub struct CidStore {
    directory: Option<PathBuf>,
    rows: RwLock<BTreeMap<String, CidRecord>>,
}

impl CidStore {
    /// An in-memory store with no directory mirror.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// A store mirrored to the given directory.
    pub fn with_directory(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: Some(directory.into()),
            rows: RwLock::new(BTreeMap::new()),
        }
    }

    /// The mirror directory, when one is configured.
    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    /// Store `bytes` and return their CID.
    ///
    /// Idempotent for equal bytes. A racing put for the same CID converges
    /// to a single row; differing bytes for an existing CID are rejected.
    pub fn put(&self, bytes: &[u8], user_id: &str) -> Result<Cid, StoreError> {
        let cid = Cid::generate(bytes);
        let path = cid.store_path();

        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&path) {
            if existing.file_data != bytes {
                return Err(StoreError::conflict(cid.as_str().to_string()));
            }
            return Ok(cid);
        }

        if let Some(directory) = &self.directory {
            let file_path = directory.join(cid.as_str());
            if !file_path.exists() {
                write_atomic(&file_path, bytes)?;
            }
        }

        rows.insert(
            path.clone(),
            CidRecord {
                path,
                file_data: bytes.to_vec(),
                file_size: bytes.len() as u64,
                created_at: Utc::now(),
                uploaded_by_user_id: user_id.to_string(),
            },
        );
        Ok(cid)
    }

    /// Bytes for a CID value (no leading slash).
    ///
    /// Literal CIDs decode in place and need no store row.
    pub fn get(&self, cid: &str) -> Option<Vec<u8>> {
        if let Ok(parsed) = Cid::parse(cid) {
            if let Some(content) = parsed.embedded_content() {
                return Some(content);
            }
        }
        self.rows
            .read()
            .get(&format!("/{cid}"))
            .map(|record| record.file_data.clone())
    }

    /// The full record stored at a path (`/` + CID).
    pub fn get_by_path(&self, path: &str) -> Option<CidRecord> {
        self.rows.read().get(path).cloned()
    }

    /// Whether content for this CID is recoverable.
    pub fn exists(&self, cid: &str) -> bool {
        if let Ok(parsed) = Cid::parse(cid) {
            if parsed.embedded_content().is_some() {
                return true;
            }
        }
        self.rows.read().contains_key(&format!("/{cid}"))
    }

    /// All stored paths, used by the boot dependency verifier.
    pub fn paths(&self) -> BTreeSet<String> {
        self.rows.read().keys().cloned().collect()
    }

    /// Number of stored rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Whether the store holds no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// All records, ordered by path. Used by the export engine when
    /// unreferenced CID data is requested.
    pub fn records(&self) -> Vec<CidRecord> {
        self.rows.read().values().cloned().collect()
    }

    /// Insert a row loaded from the directory mirror.
    ///
    /// The caller has already verified that `cid` equals the generated CID
    /// of `bytes`; this only guards against a conflicting existing row.
    pub(crate) fn insert_verified(
        &self,
        cid: &Cid,
        bytes: Vec<u8>,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let path = cid.store_path();
        let mut rows = self.rows.write();
        if let Some(existing) = rows.get(&path) {
            if existing.file_data != bytes {
                return Err(StoreError::conflict(cid.as_str().to_string()));
            }
            return Ok(false);
        }
        let file_size = bytes.len() as u64;
        rows.insert(
            path.clone(),
            CidRecord {
                path,
                file_data: bytes,
                file_size,
                created_at: Utc::now(),
                uploaded_by_user_id: user_id.to_string(),
            },
        );
        Ok(true)
    }
}
