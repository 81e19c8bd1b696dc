//! Entity rows held in the workspace tables.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::alias::MatchType;

/// A pattern-based request rewriter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alias {
    pub id: Uuid,
    pub user_id: String,
    /// Unique per user
    pub name: String,
    /// Multi-line DSL text; the primary line drives matching
    pub definition: String,
    pub enabled: bool,
    /// Primary-route fields parsed out of the definition
    pub match_type: MatchType,
    pub match_pattern: String,
    pub target_path: String,
    pub ignore_case: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A named transform executed on matching requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub user_id: String,
    /// Unique per user
    pub name: String,
    /// Transform definition text
    pub definition: String,
    /// CID of the definition bytes in the store
    pub definition_cid: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A superseded server definition, kept for versioned execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerVersion {
    pub user_id: String,
    pub server_name: String,
    /// CID of the superseded definition bytes
    pub definition_cid: String,
    pub created_at: DateTime<Utc>,
}

/// Plaintext context value injected into server execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    pub definition: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Encrypted context value; the row never holds plaintext.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Secret {
    pub id: Uuid,
    pub user_id: String,
    pub name: String,
    /// Sealed value, decryptable only with the workspace key
    pub ciphertext: String,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only audit row for entity saves, deletes, and imports.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityInteraction {
    pub id: Uuid,
    pub user_id: String,
    pub entity_type: String,
    pub entity_name: String,
    pub action: String,
    pub message: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Request to append an interaction row.
#[derive(Debug, Clone)]
pub struct InteractionRequest {
    pub user_id: String,
    pub entity_type: String,
    pub entity_name: String,
    pub action: String,
    pub message: String,
    pub content: String,
}

/// Append-only record of one server execution; cross-links are all CIDs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerInvocation {
    pub id: Uuid,
    pub user_id: String,
    pub server_name: String,
    /// CID of the produced output bytes
    pub result_cid: String,
    /// CID of the server-definitions context snapshot
    pub servers_cid: String,
    /// CID of the variables context snapshot
    pub variables_cid: String,
    /// CID of the secrets context snapshot
    pub secrets_cid: String,
    /// CID of the serialized request details
    pub request_details_cid: Option<String>,
    /// CID of the assembled invocation record itself
    pub invocation_cid: Option<String>,
    pub invoked_at: DateTime<Utc>,
}

/// Record of a produced snapshot export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRecord {
    pub id: Uuid,
    pub user_id: String,
    pub cid_value: String,
    pub generated_at: DateTime<Utc>,
}
