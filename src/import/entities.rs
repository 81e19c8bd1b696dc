//! Per-section entity importers. Each importer upserts by name, records an
//! interaction row, and reports per-entry errors without aborting the rest
//! of the section.

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    alias::parse_alias_definition,
    cid::format_cid,
    config::Config,
    crypto::{decrypt_secret_value, encrypt_secret_value},
    persistence::{Database, InteractionRequest},
    store::CidStore,
};

/// Best-effort boolean for enabled flags in import payloads.
pub fn coerce_enabled_flag(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().map(|n| n != 0.0).unwrap_or(true),
        Some(Value::String(text)) => !matches!(
            text.trim().to_lowercase().as_str(),
            "false" | "0" | "off" | "no"
        ),
        Some(_) => true,
    }
}

/// Load CID content bytes from the provided map or the store.
pub fn load_cid_bytes(
    cid_value: &str,
    cid_map: &BTreeMap<String, Vec<u8>>,
    store: &CidStore,
) -> Option<Vec<u8>> {
    let normalized = format_cid(cid_value);
    let normalized = normalized.split('.').next().unwrap_or_default();
    if normalized.is_empty() {
        return None;
    }
    if let Some(bytes) = cid_map.get(normalized) {
        return Some(bytes.clone());
    }
    store.get(normalized)
}

fn entry_name(entry: &Value, label: &str, errors: &mut Vec<String>) -> Option<String> {
    let Some(object) = entry.as_object() else {
        errors.push(format!(
            "{label} entries must be objects with name and definition details."
        ));
        return None;
    };
    match object.get("name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => Some(name.trim().to_string()),
        _ => {
            errors.push(format!("{label} entry must include a valid name."));
            None
        }
    }
}

fn definition_text(
    entry: &Value,
    label: &str,
    name: &str,
    cid_map: &BTreeMap<String, Vec<u8>>,
    store: &CidStore,
    errors: &mut Vec<String>,
) -> Option<String> {
    match entry.get("definition") {
        Some(Value::String(text)) => return Some(text.clone()),
        Some(Value::Null) | None => {}
        Some(_) => {
            errors.push(format!("{label} \"{name}\" definition must be text when provided."));
            return None;
        }
    }

    let definition_cid = entry
        .get("definition_cid")
        .and_then(Value::as_str)
        .map(format_cid)
        .unwrap_or_default();
    if definition_cid.is_empty() {
        errors.push(format!(
            "{label} \"{name}\" entry must include either a definition or a definition_cid."
        ));
        return None;
    }

    let Some(bytes) = load_cid_bytes(&definition_cid, cid_map, store) else {
        errors.push(format!(
            "{label} \"{name}\" definition with CID \"{definition_cid}\" was not included in the import."
        ));
        return None;
    };
    match String::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(_) => {
            errors.push(format!(
                "{label} \"{name}\" definition for CID \"{definition_cid}\" must be UTF-8 text."
            ));
            None
        }
    }
}

fn record_save(db: &Database, user_id: &str, entity_type: &str, name: &str, message: &str) {
    let _ = db.record_interaction(InteractionRequest {
        user_id: user_id.to_string(),
        entity_type: entity_type.to_string(),
        entity_name: name.to_string(),
        action: "save".to_string(),
        message: message.to_string(),
        content: String::new(),
    });
}

/// Import the aliases section. Returns (imported count, imported names).
pub fn import_aliases(
    db: &Database,
    store: &CidStore,
    user_id: &str,
    section: &Value,
    cid_map: &BTreeMap<String, Vec<u8>>,
    reserved_routes: &BTreeSet<String>,
    change_message: &str,
    errors: &mut Vec<String>,
) -> (usize, Vec<String>) {
    let Some(entries) = section.as_array() else {
        errors.push("Aliases section must be a list of alias entries.".to_string());
        return (0, Vec::new());
    };

    let mut imported = Vec::new();
    for entry in entries {
        let Some(name) = entry_name(entry, "Alias", errors) else {
            continue;
        };
        if reserved_routes.contains(&format!("/{name}")) {
            errors.push(format!(
                "Alias \"{name}\" conflicts with an existing route and was skipped."
            ));
            continue;
        }
        let Some(definition) = definition_text(entry, "Alias", &name, cid_map, store, errors)
        else {
            continue;
        };
        if let Err(err) = parse_alias_definition(&definition) {
            errors.push(format!(
                "Alias \"{name}\" definition could not be parsed: {err}"
            ));
            continue;
        }
        let enabled = coerce_enabled_flag(entry.get("enabled"));
        match db.upsert_alias(user_id, &name, &definition, enabled) {
            Ok(_) => {
                record_save(db, user_id, "alias", &name, change_message);
                imported.push(name);
            }
            Err(err) => errors.push(format!("Alias \"{name}\" could not be saved: {err}")),
        }
    }
    (imported.len(), imported)
}

/// Import the servers section. Returns (imported count, imported names).
pub fn import_servers(
    db: &Database,
    store: &CidStore,
    user_id: &str,
    section: &Value,
    cid_map: &BTreeMap<String, Vec<u8>>,
    change_message: &str,
    errors: &mut Vec<String>,
) -> (usize, Vec<String>) {
    let Some(entries) = section.as_array() else {
        errors.push("Servers section must be a list of server entries.".to_string());
        return (0, Vec::new());
    };

    let mut imported = Vec::new();
    for entry in entries {
        let Some(name) = entry_name(entry, "Server", errors) else {
            continue;
        };
        let Some(definition) = definition_text(entry, "Server", &name, cid_map, store, errors)
        else {
            continue;
        };
        let enabled = coerce_enabled_flag(entry.get("enabled"));
        match db.upsert_server(store, user_id, &name, &definition, enabled) {
            Ok(_) => {
                record_save(db, user_id, "server", &name, change_message);
                imported.push(name);
            }
            Err(err) => errors.push(format!("Server \"{name}\" could not be saved: {err}")),
        }
    }
    (imported.len(), imported)
}

/// Import the variables section. Returns (imported count, imported names).
pub fn import_variables(
    db: &Database,
    user_id: &str,
    section: &Value,
    change_message: &str,
    errors: &mut Vec<String>,
) -> (usize, Vec<String>) {
    let Some(entries) = section.as_array() else {
        errors.push("Variables section must be a list of variable entries.".to_string());
        return (0, Vec::new());
    };

    let mut imported = Vec::new();
    for entry in entries {
        let Some(name) = entry_name(entry, "Variable", errors) else {
            continue;
        };
        let Some(definition) = entry.get("definition").and_then(Value::as_str) else {
            errors.push(format!("Variable \"{name}\" entry must include a definition."));
            continue;
        };
        let enabled = coerce_enabled_flag(entry.get("enabled"));
        match db.upsert_variable(user_id, &name, definition, enabled) {
            Ok(_) => {
                record_save(db, user_id, "variable", &name, change_message);
                imported.push(name);
            }
            Err(err) => errors.push(format!("Variable \"{name}\" could not be saved: {err}")),
        }
    }
    (imported.len(), imported)
}

/// Import the secrets section.
///
/// A wrong key fails this section with a single error; other sections are
/// unaffected. Values are re-sealed under the workspace key before they
/// reach the table.
pub fn import_secrets(
    db: &Database,
    config: &Config,
    user_id: &str,
    section: &Value,
    secret_key: &str,
    change_message: &str,
    errors: &mut Vec<String>,
) -> (usize, Vec<String>) {
    let Some(object) = section.as_object() else {
        errors.push("Secrets section must be an object with encryption and items.".to_string());
        return (0, Vec::new());
    };
    let Some(items) = object.get("items").and_then(Value::as_array) else {
        errors.push("Secrets section is missing its items list.".to_string());
        return (0, Vec::new());
    };

    let mut imported = Vec::new();
    for entry in items {
        let Some(name) = entry_name(entry, "Secret", errors) else {
            continue;
        };
        let Some(ciphertext) = entry.get("ciphertext").and_then(Value::as_str) else {
            errors.push(format!("Secret \"{name}\" entry must include ciphertext."));
            continue;
        };
        let plaintext = match decrypt_secret_value(ciphertext, secret_key) {
            Ok(value) => value,
            Err(_) => {
                errors.push("Invalid decryption key for secrets".to_string());
                return (imported.len(), imported);
            }
        };
        let sealed = encrypt_secret_value(&plaintext, &config.boot_secret_key);
        let enabled = coerce_enabled_flag(entry.get("enabled"));
        match db.upsert_secret(user_id, &name, &sealed, enabled) {
            Ok(_) => {
                record_save(db, user_id, "secret", &name, change_message);
                imported.push(name);
            }
            Err(err) => errors.push(format!("Secret \"{name}\" could not be saved: {err}")),
        }
    }
    (imported.len(), imported)
}

fn singular_entity_type(collection: &str) -> String {
    collection.strip_suffix('s').unwrap_or(collection).to_string()
}

/// Import change-history events, deduplicated against existing rows by
/// (user, type, name, action, message, timestamp).
pub fn import_change_history(
    db: &Database,
    user_id: &str,
    section: &Value,
    errors: &mut Vec<String>,
) -> usize {
    let Some(collections) = section.as_object() else {
        errors.push("Change history section must be an object keyed by collection.".to_string());
        return 0;
    };

    let mut imported = 0usize;
    for (collection, per_name) in collections {
        let entity_type = singular_entity_type(collection);
        let Some(per_name) = per_name.as_object() else {
            continue;
        };
        for (entity_name, events) in per_name {
            let Some(events) = events.as_array() else {
                continue;
            };
            for event in events {
                let action = event
                    .get("action")
                    .and_then(Value::as_str)
                    .unwrap_or("save");
                let message = event.get("message").and_then(Value::as_str).unwrap_or("");
                let content = event.get("content").and_then(Value::as_str).unwrap_or("");
                let Some(created_at) = event
                    .get("created_at")
                    .and_then(Value::as_str)
                    .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                    .map(|stamp| stamp.with_timezone(&Utc))
                else {
                    errors.push(format!(
                        "History event for {entity_type} \"{entity_name}\" is missing a valid timestamp."
                    ));
                    continue;
                };

                if db.interaction_exists(
                    user_id,
                    &entity_type,
                    entity_name,
                    action,
                    message,
                    created_at,
                ) {
                    continue;
                }
                let request = InteractionRequest {
                    user_id: user_id.to_string(),
                    entity_type: entity_type.clone(),
                    entity_name: entity_name.clone(),
                    action: action.to_string(),
                    message: message.to_string(),
                    content: content.to_string(),
                };
                match db.record_interaction_at(request, created_at) {
                    Ok(_) => imported += 1,
                    Err(err) => errors.push(format!("History event could not be saved: {err}")),
                }
            }
        }
    }
    imported
}
