//! Entity tables and their on-disk snapshot.
//!
//! All workspace entities live in in-process tables guarded by one lock;
//! every mutation rewrites the snapshot file so a restart reconstructs the
//! tables. Interaction and invocation rows are append-only. Writes to a
//! given (user, name) are serialized by the table lock.

mod error;
mod models;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::debug;
use uuid::Uuid;

use crate::{
    alias::parse_alias_definition,
    store::CidStore,
    utils::{get_read, write_atomic},
};

pub use error::{PersistenceError, PersistenceErrorKind};
pub use models::{
    Alias, EntityInteraction, ExportRecord, InteractionRequest, Secret, Server,
    ServerInvocation, ServerVersion, Variable,
};

#[derive(Debug, Default, Serialize, Deserialize)]
struct Tables {
    aliases: Vec<Alias>,
    servers: Vec<Server>,
    server_versions: Vec<ServerVersion>,
    variables: Vec<Variable>,
    secrets: Vec<Secret>,
    interactions: Vec<EntityInteraction>,
    invocations: Vec<ServerInvocation>,
    exports: Vec<ExportRecord>,
}

/// The workspace database.
#[derive(Debug, Default)]
pub struct Database {
    path: Option<PathBuf>,
    tables: RwLock<Tables>,
}

impl Database {
    /// An ephemeral database with no snapshot file.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open a database backed by a snapshot file, loading it when present.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, PersistenceError> {
        let path = path.into();
        let tables = match get_read(&path) {
            Ok(file) => serde_json::from_reader(file)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Tables::default(),
            Err(err) => return Err(PersistenceError::unreadable(path, err)),
        };
        Ok(Self {
            path: Some(path),
            tables: RwLock::new(tables),
        })
    }

    fn persist(&self, tables: &Tables) -> Result<(), PersistenceError> {
        if let Some(path) = &self.path {
            let rendered = serde_json::to_vec_pretty(tables)?;
            write_atomic(path, &rendered)?;
            debug!(path = %path.display(), "workspace snapshot written");
        }
        Ok(())
    }

    // ---- aliases ----

    /// All aliases owned by a user, sorted by name.
    pub fn user_aliases(&self, user_id: &str) -> Vec<Alias> {
        let tables = self.tables.read();
        let mut rows: Vec<Alias> = tables
            .aliases
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Look up one alias by name.
    pub fn alias_by_name(&self, user_id: &str, name: &str) -> Option<Alias> {
        self.tables
            .read()
            .aliases
            .iter()
            .find(|row| row.user_id == user_id && row.name == name)
            .cloned()
    }

    /// Create or update an alias, reparsing its primary route fields.
    pub fn upsert_alias(
        &self,
        user_id: &str,
        name: &str,
        definition: &str,
        enabled: bool,
    ) -> Result<Alias, PersistenceError> {
        let parsed = parse_alias_definition(definition)
            .map_err(|err| PersistenceError::invalid_definition(err.to_string()))?;
        let primary = parsed.primary();

        let mut tables = self.tables.write();
        let now = Utc::now();
        let row = match tables
            .aliases
            .iter_mut()
            .find(|row| row.user_id == user_id && row.name == name)
        {
            Some(existing) => {
                existing.definition = definition.to_string();
                existing.enabled = enabled;
                existing.match_type = primary.match_type;
                existing.match_pattern = primary.pattern.clone();
                existing.target_path = primary.target.clone();
                existing.ignore_case = primary.ignore_case;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let row = Alias {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    definition: definition.to_string(),
                    enabled,
                    match_type: primary.match_type,
                    match_pattern: primary.pattern.clone(),
                    target_path: primary.target.clone(),
                    ignore_case: primary.ignore_case,
                    created_at: now,
                    updated_at: now,
                };
                tables.aliases.push(row.clone());
                row
            }
        };
        self.persist(&tables)?;
        Ok(row)
    }

    /// Remove an alias. Returns whether a row was deleted.
    pub fn delete_alias(&self, user_id: &str, name: &str) -> Result<bool, PersistenceError> {
        let mut tables = self.tables.write();
        let before = tables.aliases.len();
        tables
            .aliases
            .retain(|row| !(row.user_id == user_id && row.name == name));
        let removed = tables.aliases.len() != before;
        if removed {
            self.persist(&tables)?;
        }
        Ok(removed)
    }

    // ---- servers ----

    /// All servers owned by a user, sorted by name.
    pub fn user_servers(&self, user_id: &str) -> Vec<Server> {
        let tables = self.tables.read();
        let mut rows: Vec<Server> = tables
            .servers
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Look up one server by name.
    pub fn server_by_name(&self, user_id: &str, name: &str) -> Option<Server> {
        self.tables
            .read()
            .servers
            .iter()
            .find(|row| row.user_id == user_id && row.name == name)
            .cloned()
    }

    /// Create or update a server.
    ///
    /// The definition bytes are written into the CID store and the row's
    /// `definition_cid` refreshed. When an update changes the definition,
    /// the superseded version is appended to the history table.
    pub fn upsert_server(
        &self,
        store: &CidStore,
        user_id: &str,
        name: &str,
        definition: &str,
        enabled: bool,
    ) -> Result<Server, PersistenceError> {
        let definition_cid = store.put(definition.as_bytes(), user_id)?;

        let mut tables = self.tables.write();
        let now = Utc::now();
        let mut superseded: Option<ServerVersion> = None;
        let row = match tables
            .servers
            .iter_mut()
            .find(|row| row.user_id == user_id && row.name == name)
        {
            Some(existing) => {
                if existing.definition_cid != definition_cid.as_str() {
                    superseded = Some(ServerVersion {
                        user_id: existing.user_id.clone(),
                        server_name: existing.name.clone(),
                        definition_cid: existing.definition_cid.clone(),
                        created_at: now,
                    });
                }
                existing.definition = definition.to_string();
                existing.definition_cid = definition_cid.as_str().to_string();
                existing.enabled = enabled;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let row = Server {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    definition: definition.to_string(),
                    definition_cid: definition_cid.as_str().to_string(),
                    enabled,
                    created_at: now,
                    updated_at: now,
                };
                tables.servers.push(row.clone());
                row
            }
        };
        if let Some(version) = superseded {
            tables.server_versions.push(version);
        }
        self.persist(&tables)?;
        Ok(row)
    }

    /// Remove a server. Returns whether a row was deleted.
    pub fn delete_server(&self, user_id: &str, name: &str) -> Result<bool, PersistenceError> {
        let mut tables = self.tables.write();
        let before = tables.servers.len();
        tables
            .servers
            .retain(|row| !(row.user_id == user_id && row.name == name));
        let removed = tables.servers.len() != before;
        if removed {
            self.persist(&tables)?;
        }
        Ok(removed)
    }

    /// Superseded definition versions for a server, newest last.
    pub fn server_history(&self, user_id: &str, name: &str) -> Vec<ServerVersion> {
        self.tables
            .read()
            .server_versions
            .iter()
            .filter(|row| row.user_id == user_id && row.server_name == name)
            .cloned()
            .collect()
    }

    // ---- variables ----

    /// All variables owned by a user, sorted by name.
    pub fn user_variables(&self, user_id: &str) -> Vec<Variable> {
        let tables = self.tables.read();
        let mut rows: Vec<Variable> = tables
            .variables
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Look up one variable by name.
    pub fn variable_by_name(&self, user_id: &str, name: &str) -> Option<Variable> {
        self.tables
            .read()
            .variables
            .iter()
            .find(|row| row.user_id == user_id && row.name == name)
            .cloned()
    }

    /// Create or update a variable.
    pub fn upsert_variable(
        &self,
        user_id: &str,
        name: &str,
        definition: &str,
        enabled: bool,
    ) -> Result<Variable, PersistenceError> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let row = match tables
            .variables
            .iter_mut()
            .find(|row| row.user_id == user_id && row.name == name)
        {
            Some(existing) => {
                existing.definition = definition.to_string();
                existing.enabled = enabled;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let row = Variable {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    definition: definition.to_string(),
                    enabled,
                    created_at: now,
                    updated_at: now,
                };
                tables.variables.push(row.clone());
                row
            }
        };
        self.persist(&tables)?;
        Ok(row)
    }

    /// Remove a variable. Returns whether a row was deleted.
    pub fn delete_variable(&self, user_id: &str, name: &str) -> Result<bool, PersistenceError> {
        let mut tables = self.tables.write();
        let before = tables.variables.len();
        tables
            .variables
            .retain(|row| !(row.user_id == user_id && row.name == name));
        let removed = tables.variables.len() != before;
        if removed {
            self.persist(&tables)?;
        }
        Ok(removed)
    }

    // ---- secrets ----

    /// All secrets owned by a user, sorted by name.
    pub fn user_secrets(&self, user_id: &str) -> Vec<Secret> {
        let tables = self.tables.read();
        let mut rows: Vec<Secret> = tables
            .secrets
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows
    }

    /// Look up one secret by name.
    pub fn secret_by_name(&self, user_id: &str, name: &str) -> Option<Secret> {
        self.tables
            .read()
            .secrets
            .iter()
            .find(|row| row.user_id == user_id && row.name == name)
            .cloned()
    }

    /// Create or update a secret row holding sealed ciphertext.
    pub fn upsert_secret(
        &self,
        user_id: &str,
        name: &str,
        ciphertext: &str,
        enabled: bool,
    ) -> Result<Secret, PersistenceError> {
        let mut tables = self.tables.write();
        let now = Utc::now();
        let row = match tables
            .secrets
            .iter_mut()
            .find(|row| row.user_id == user_id && row.name == name)
        {
            Some(existing) => {
                existing.ciphertext = ciphertext.to_string();
                existing.enabled = enabled;
                existing.updated_at = now;
                existing.clone()
            }
            None => {
                let row = Secret {
                    id: Uuid::new_v4(),
                    user_id: user_id.to_string(),
                    name: name.to_string(),
                    ciphertext: ciphertext.to_string(),
                    enabled,
                    created_at: now,
                    updated_at: now,
                };
                tables.secrets.push(row.clone());
                row
            }
        };
        self.persist(&tables)?;
        Ok(row)
    }

    /// Remove a secret. Returns whether a row was deleted.
    pub fn delete_secret(&self, user_id: &str, name: &str) -> Result<bool, PersistenceError> {
        let mut tables = self.tables.write();
        let before = tables.secrets.len();
        tables
            .secrets
            .retain(|row| !(row.user_id == user_id && row.name == name));
        let removed = tables.secrets.len() != before;
        if removed {
            self.persist(&tables)?;
        }
        Ok(removed)
    }

    // ---- interactions ----

    /// Append an interaction row.
    pub fn record_interaction(
        &self,
        request: InteractionRequest,
    ) -> Result<EntityInteraction, PersistenceError> {
        let row = EntityInteraction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            entity_type: request.entity_type,
            entity_name: request.entity_name,
            action: request.action,
            message: request.message,
            content: request.content,
            created_at: Utc::now(),
        };
        let mut tables = self.tables.write();
        tables.interactions.push(row.clone());
        self.persist(&tables)?;
        Ok(row)
    }

    /// Append an interaction row with an explicit timestamp (history import).
    pub fn record_interaction_at(
        &self,
        request: InteractionRequest,
        created_at: chrono::DateTime<Utc>,
    ) -> Result<EntityInteraction, PersistenceError> {
        let row = EntityInteraction {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            entity_type: request.entity_type,
            entity_name: request.entity_name,
            action: request.action,
            message: request.message,
            content: request.content,
            created_at,
        };
        let mut tables = self.tables.write();
        tables.interactions.push(row.clone());
        self.persist(&tables)?;
        Ok(row)
    }

    /// Interactions for one entity, newest first.
    pub fn interactions_for(
        &self,
        user_id: &str,
        entity_type: &str,
        entity_name: &str,
    ) -> Vec<EntityInteraction> {
        let mut rows: Vec<EntityInteraction> = self
            .tables
            .read()
            .interactions
            .iter()
            .filter(|row| {
                row.user_id == user_id
                    && row.entity_type == entity_type
                    && row.entity_name == entity_name
            })
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows
    }

    /// All interactions for a user, oldest first.
    pub fn user_interactions(&self, user_id: &str) -> Vec<EntityInteraction> {
        let mut rows: Vec<EntityInteraction> = self
            .tables
            .read()
            .interactions
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        rows
    }

    /// Whether an equivalent interaction row already exists. Used to dedupe
    /// imported change history.
    pub fn interaction_exists(
        &self,
        user_id: &str,
        entity_type: &str,
        entity_name: &str,
        action: &str,
        message: &str,
        created_at: chrono::DateTime<Utc>,
    ) -> bool {
        self.tables.read().interactions.iter().any(|row| {
            row.user_id == user_id
                && row.entity_type == entity_type
                && row.entity_name == entity_name
                && row.action == action
                && row.message == message
                && row.created_at == created_at
        })
    }

    // ---- invocations ----

    /// Append an invocation row.
    pub fn create_invocation(
        &self,
        row: ServerInvocation,
    ) -> Result<ServerInvocation, PersistenceError> {
        let mut tables = self.tables.write();
        tables.invocations.push(row.clone());
        self.persist(&tables)?;
        Ok(row)
    }

    /// Attach the invocation-record CID once it has been stored.
    pub fn set_invocation_cid(
        &self,
        invocation_id: Uuid,
        invocation_cid: &str,
    ) -> Result<(), PersistenceError> {
        let mut tables = self.tables.write();
        let row = tables
            .invocations
            .iter_mut()
            .find(|row| row.id == invocation_id)
            .ok_or_else(|| {
                PersistenceError::unknown_entity("invocation", &invocation_id.to_string())
            })?;
        row.invocation_cid = Some(invocation_cid.to_string());
        self.persist(&tables)?;
        Ok(())
    }

    /// All invocations for a user, newest first.
    pub fn user_invocations(&self, user_id: &str) -> Vec<ServerInvocation> {
        let mut rows: Vec<ServerInvocation> = self
            .tables
            .read()
            .invocations
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.invoked_at.cmp(&a.invoked_at));
        rows
    }

    // ---- exports ----

    /// Record a produced snapshot export.
    pub fn record_export(
        &self,
        user_id: &str,
        cid_value: &str,
    ) -> Result<ExportRecord, PersistenceError> {
        let row = ExportRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            cid_value: cid_value.to_string(),
            generated_at: Utc::now(),
        };
        let mut tables = self.tables.write();
        tables.exports.push(row.clone());
        self.persist(&tables)?;
        Ok(row)
    }

    /// All export records for a user, newest first.
    pub fn user_exports(&self, user_id: &str) -> Vec<ExportRecord> {
        let mut rows: Vec<ExportRecord> = self
            .tables
            .read()
            .exports
            .iter()
            .filter(|row| row.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
        rows
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn alias_upsert_creates_then_updates() {
        let db = Database::in_memory();
        let created = db
            .upsert_alias("local", "docs", "/docs -> /readme", true)
            .unwrap();
        assert_eq!(created.target_path, "/readme");

        let updated = db
            .upsert_alias("local", "docs", "/docs -> /manual", false)
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.target_path, "/manual");
        assert!(!updated.enabled);
        assert_eq!(db.user_aliases("local").len(), 1);
    }

    #[test]
    fn alias_upsert_rejects_bad_definitions() {
        let db = Database::in_memory();
        assert!(db
            .upsert_alias("local", "broken", "no arrow here", true)
            .is_err());
    }

    #[test]
    fn server_updates_record_history() {
        let db = Database::in_memory();
        let store = CidStore::in_memory();
        let v1 = db
            .upsert_server(&store, "local", "echo", "transform: template\n---\nv1", true)
            .unwrap();
        assert!(db.server_history("local", "echo").is_empty());

        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv2", true)
            .unwrap();
        let history = db.server_history("local", "echo");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].definition_cid, v1.definition_cid);
        // The superseded definition stays recoverable from the store.
        assert_eq!(
            store.get(&v1.definition_cid),
            Some(b"transform: template\n---\nv1".to_vec())
        );
    }

    #[test]
    fn unchanged_server_definition_adds_no_history() {
        let db = Database::in_memory();
        let store = CidStore::in_memory();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv1", true)
            .unwrap();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nv1", false)
            .unwrap();
        assert!(db.server_history("local", "echo").is_empty());
    }

    #[test]
    fn tables_are_scoped_per_user() {
        let db = Database::in_memory();
        db.upsert_variable("alice", "greeting", "hello", true).unwrap();
        db.upsert_variable("bob", "greeting", "ahoy", true).unwrap();
        assert_eq!(db.user_variables("alice")[0].definition, "hello");
        assert_eq!(db.user_variables("bob")[0].definition, "ahoy");
    }

    #[test]
    fn snapshot_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("workspace.json");
        {
            let db = Database::open(&path).unwrap();
            db.upsert_variable("local", "greeting", "hello", true).unwrap();
        }
        let reopened = Database::open(&path).unwrap();
        assert_eq!(reopened.user_variables("local")[0].definition, "hello");
    }

    #[test]
    fn interaction_dedupe_matches_all_fields() {
        let db = Database::in_memory();
        let row = db
            .record_interaction(InteractionRequest {
                user_id: "local".to_string(),
                entity_type: "alias".to_string(),
                entity_name: "docs".to_string(),
                action: "save".to_string(),
                message: "initial".to_string(),
                content: String::new(),
            })
            .unwrap();
        assert!(db.interaction_exists(
            "local",
            "alias",
            "docs",
            "save",
            "initial",
            row.created_at
        ));
        assert!(!db.interaction_exists(
            "local",
            "alias",
            "docs",
            "save",
            "different message",
            row.created_at
        ));
    }
}
