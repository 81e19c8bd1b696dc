//! Invocation recording: every successful execution leaves an append-only
//! row whose cross-links are all CIDs, so the exact context of a past run
//! can be recovered from the store alone.

use chrono::Utc;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::warn;
use uuid::Uuid;

use crate::{
    persistence::{Database, PersistenceError, ServerInvocation},
    store::CidStore,
    utils::canonical_json_bytes,
};

use super::RequestDetails;

fn definitions_cid(
    store: &CidStore,
    user_id: &str,
    map: &BTreeMap<String, String>,
) -> Result<String, PersistenceError> {
    let bytes = canonical_json_bytes(map)?;
    let cid = store.put(&bytes, user_id)?;
    Ok(cid.as_str().to_string())
}

/// Snapshot CID of the user's server-definitions map.
pub fn current_server_definitions_cid(
    db: &Database,
    store: &CidStore,
    user_id: &str,
) -> Result<String, PersistenceError> {
    let map: BTreeMap<String, String> = db
        .user_servers(user_id)
        .into_iter()
        .map(|row| (row.name, row.definition))
        .collect();
    definitions_cid(store, user_id, &map)
}

/// Snapshot CID of the user's variables map.
pub fn current_variable_definitions_cid(
    db: &Database,
    store: &CidStore,
    user_id: &str,
) -> Result<String, PersistenceError> {
    let map: BTreeMap<String, String> = db
        .user_variables(user_id)
        .into_iter()
        .map(|row| (row.name, row.definition))
        .collect();
    definitions_cid(store, user_id, &map)
}

/// Snapshot CID of the user's secrets map. Rows hold ciphertext, so the
/// snapshot never exposes plaintext.
pub fn current_secret_definitions_cid(
    db: &Database,
    store: &CidStore,
    user_id: &str,
) -> Result<String, PersistenceError> {
    let map: BTreeMap<String, String> = db
        .user_secrets(user_id)
        .into_iter()
        .map(|row| (row.name, row.ciphertext))
        .collect();
    definitions_cid(store, user_id, &map)
}

/// Persist one invocation with its full CID lineage.
pub fn record_invocation(
    db: &Database,
    store: &CidStore,
    user_id: &str,
    server_name: &str,
    result_cid: &str,
    request: &RequestDetails,
) -> Result<ServerInvocation, PersistenceError> {
    let servers_cid = current_server_definitions_cid(db, store, user_id)?;
    let variables_cid = current_variable_definitions_cid(db, store, user_id)?;
    let secrets_cid = current_secret_definitions_cid(db, store, user_id)?;

    let request_details_cid = match canonical_json_bytes(request) {
        Ok(bytes) => match store.put(&bytes, user_id) {
            Ok(cid) => Some(cid.as_str().to_string()),
            Err(err) => {
                warn!(%err, "failed to store request details");
                None
            }
        },
        Err(err) => {
            warn!(%err, "failed to serialize request details");
            None
        }
    };

    let invocation = db.create_invocation(ServerInvocation {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        server_name: server_name.to_string(),
        result_cid: result_cid.to_string(),
        servers_cid,
        variables_cid,
        secrets_cid,
        request_details_cid,
        invocation_cid: None,
        invoked_at: Utc::now(),
    })?;

    let payload = json!({
        "user_id": invocation.user_id,
        "server_name": invocation.server_name,
        "result_cid": invocation.result_cid,
        "servers_cid": invocation.servers_cid,
        "variables_cid": invocation.variables_cid,
        "secrets_cid": invocation.secrets_cid,
        "request_details_cid": invocation.request_details_cid,
        "invoked_at": invocation.invoked_at.to_rfc3339(),
    });
    match canonical_json_bytes(&payload) {
        Ok(bytes) => match store.put(&bytes, user_id) {
            Ok(cid) => db.set_invocation_cid(invocation.id, cid.as_str())?,
            Err(err) => warn!(%err, "failed to store invocation record"),
        },
        Err(err) => warn!(%err, "failed to serialize invocation record"),
    }

    Ok(db
        .user_invocations(user_id)
        .into_iter()
        .find(|row| row.id == invocation.id)
        .unwrap_or(invocation))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn invocation_links_are_all_cids() {
        let db = Database::in_memory();
        let store = CidStore::in_memory();
        db.upsert_server(&store, "local", "echo", "transform: template\n---\nx", true)
            .unwrap();
        db.upsert_variable("local", "greeting", "hello", true).unwrap();

        let request = RequestDetails::for_path("/echo");
        let result_cid = store.put(b"output", "local").unwrap();
        let invocation =
            record_invocation(&db, &store, "local", "echo", result_cid.as_str(), &request)
                .unwrap();

        assert_eq!(invocation.server_name, "echo");
        assert!(store.exists(&invocation.servers_cid));
        assert!(store.exists(&invocation.variables_cid));
        assert!(store.exists(&invocation.secrets_cid));
        let details_cid = invocation.request_details_cid.as_deref().unwrap();
        assert!(store.exists(details_cid));
        let invocation_cid = invocation.invocation_cid.as_deref().unwrap();
        assert!(store.exists(invocation_cid));

        // The stored invocation record references the same lineage.
        let stored: serde_json::Value =
            serde_json::from_slice(&store.get(invocation_cid).unwrap()).unwrap();
        assert_eq!(stored["result_cid"], result_cid.as_str());
        assert_eq!(stored["servers_cid"], invocation.servers_cid.as_str());
    }

    #[test]
    fn snapshot_cids_are_stable_for_unchanged_tables() {
        let db = Database::in_memory();
        let store = CidStore::in_memory();
        db.upsert_variable("local", "a", "1", true).unwrap();
        let first = current_variable_definitions_cid(&db, &store, "local").unwrap();
        let second = current_variable_definitions_cid(&db, &store, "local").unwrap();
        assert_eq!(first, second);
    }
}
