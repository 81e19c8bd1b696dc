//! Collection functions for individual export sections.

use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::warn;

use crate::{
    config::Config,
    crypto::{decrypt_secret_value, encrypt_secret_value, SECRET_ENCRYPTION_SCHEME},
    persistence::Database,
};

use super::{CidWriter, ExportError, ExportSelection};

fn name_selected(selection: &Option<std::collections::BTreeSet<String>>, name: &str) -> bool {
    match selection {
        Some(names) => names.contains(name),
        None => true,
    }
}

fn sort_case_insensitive(entries: &mut [(String, Value)]) {
    entries.sort_by(|a, b| a.0.to_lowercase().cmp(&b.0.to_lowercase()));
}

/// CID metadata for key project files when available.
pub fn collect_project_files_section(
    base_path: &Path,
    writer: &mut CidWriter<'_>,
) -> Result<Value, ExportError> {
    let mut payload = serde_json::Map::new();
    for relative_name in ["Cargo.toml", "Cargo.lock"] {
        let Ok(content) = std::fs::read(base_path.join(relative_name)) else {
            continue;
        };
        let cid_value = writer.cid_for_content(&content, true, true)?;
        payload.insert(relative_name.to_string(), json!({ "cid": cid_value }));
    }
    Ok(Value::Object(payload))
}

/// Alias export entries including CID references.
pub fn collect_alias_section(
    db: &Database,
    user_id: &str,
    selection: &ExportSelection,
    writer: &mut CidWriter<'_>,
) -> Result<Value, ExportError> {
    let mut entries: Vec<(String, Value)> = Vec::new();
    for alias in db.user_aliases(user_id) {
        if !name_selected(&selection.selected_aliases, &alias.name) {
            continue;
        }
        if !alias.enabled && !selection.include_disabled_aliases {
            continue;
        }
        let definition_cid = writer.cid_for_content(alias.definition.as_bytes(), true, true)?;
        entries.push((
            alias.name.clone(),
            json!({
                "name": alias.name,
                "definition_cid": definition_cid,
                "enabled": alias.enabled,
            }),
        ));
    }
    sort_case_insensitive(&mut entries);
    Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()))
}

/// Server export entries including CID references.
pub fn collect_server_section(
    db: &Database,
    user_id: &str,
    selection: &ExportSelection,
    writer: &mut CidWriter<'_>,
) -> Result<Value, ExportError> {
    let mut entries: Vec<(String, Value)> = Vec::new();
    for server in db.user_servers(user_id) {
        if !name_selected(&selection.selected_servers, &server.name) {
            continue;
        }
        if !server.enabled && !selection.include_disabled_servers {
            continue;
        }
        let definition_cid = writer.cid_for_content(server.definition.as_bytes(), true, true)?;
        entries.push((
            server.name.clone(),
            json!({
                "name": server.name,
                "definition_cid": definition_cid,
                "enabled": server.enabled,
            }),
        ));
    }
    sort_case_insensitive(&mut entries);
    Ok(Value::Array(entries.into_iter().map(|(_, v)| v).collect()))
}

/// Variable export entries; definitions are carried inline.
pub fn collect_variables_section(
    db: &Database,
    user_id: &str,
    selection: &ExportSelection,
) -> Value {
    let mut entries: Vec<(String, Value)> = Vec::new();
    for variable in db.user_variables(user_id) {
        if !name_selected(&selection.selected_variables, &variable.name) {
            continue;
        }
        if !variable.enabled && !selection.include_disabled_variables {
            continue;
        }
        entries.push((
            variable.name.clone(),
            json!({
                "name": variable.name,
                "definition": variable.definition,
                "enabled": variable.enabled,
            }),
        ));
    }
    sort_case_insensitive(&mut entries);
    Value::Array(entries.into_iter().map(|(_, v)| v).collect())
}

/// Encrypted secret entries re-sealed under the export key.
pub fn collect_secrets_section(
    db: &Database,
    config: &Config,
    user_id: &str,
    selection: &ExportSelection,
) -> Value {
    let mut items: Vec<(String, Value)> = Vec::new();
    for secret in db.user_secrets(user_id) {
        if !name_selected(&selection.selected_secrets, &secret.name) {
            continue;
        }
        if !secret.enabled && !selection.include_disabled_secrets {
            continue;
        }
        let plaintext = match decrypt_secret_value(&secret.ciphertext, &config.boot_secret_key) {
            Ok(value) => value,
            Err(err) => {
                warn!(secret = %secret.name, %err, "secret skipped: could not be unsealed");
                continue;
            }
        };
        items.push((
            secret.name.clone(),
            json!({
                "name": secret.name,
                "ciphertext": encrypt_secret_value(&plaintext, &selection.secret_key),
                "enabled": secret.enabled,
            }),
        ));
    }
    sort_case_insensitive(&mut items);
    json!({
        "encryption": SECRET_ENCRYPTION_SCHEME,
        "items": Value::Array(items.into_iter().map(|(_, v)| v).collect()),
    })
}

/// Change history grouped per collection, then per entity name.
pub fn collect_change_history_section(db: &Database, user_id: &str) -> Value {
    let mut collections: BTreeMap<String, BTreeMap<String, Vec<Value>>> = BTreeMap::new();
    for interaction in db.user_interactions(user_id) {
        let collection = match interaction.entity_type.as_str() {
            "alias" => "aliases".to_string(),
            "server" => "servers".to_string(),
            "variable" => "variables".to_string(),
            "secret" => "secrets".to_string(),
            other => format!("{other}s"),
        };
        collections
            .entry(collection)
            .or_default()
            .entry(interaction.entity_name.clone())
            .or_default()
            .push(json!({
                "action": interaction.action,
                "message": interaction.message,
                "content": interaction.content,
                "created_at": interaction.created_at.to_rfc3339(),
            }));
    }
    serde_json::to_value(collections).unwrap_or(Value::Null)
}

fn collect_rust_sources(root: &Path, relative: &str, entries: &mut Vec<String>) {
    let directory = root.join(relative);
    let Ok(listing) = std::fs::read_dir(&directory) else {
        return;
    };
    let mut children: Vec<_> = listing.flatten().collect();
    children.sort_by_key(|entry| entry.file_name());
    for child in children {
        let name = child.file_name().to_string_lossy().into_owned();
        let child_relative = format!("{relative}/{name}");
        match child.file_type() {
            Ok(kind) if kind.is_dir() => {
                collect_rust_sources(root, &child_relative, entries)
            }
            Ok(kind) if kind.is_file() && name.ends_with(".rs") => {
                entries.push(child_relative)
            }
            _ => {}
        }
    }
}

/// Application source entries per category.
pub fn collect_app_source_section(
    base_path: &Path,
    writer: &mut CidWriter<'_>,
) -> Result<Value, ExportError> {
    let mut payload = serde_json::Map::new();
    for (category, relative_root) in [("application", "src"), ("tests", "tests")] {
        let mut paths: Vec<String> = Vec::new();
        collect_rust_sources(base_path, relative_root, &mut paths);

        let mut entries: Vec<Value> = Vec::new();
        for relative_path in paths {
            let Ok(content) = std::fs::read(base_path.join(&relative_path)) else {
                continue;
            };
            let cid_value = writer.cid_for_content(&content, true, true)?;
            entries.push(json!({ "path": relative_path, "cid": cid_value }));
        }
        if !entries.is_empty() {
            payload.insert(category.to_string(), Value::Array(entries));
        }
    }
    Ok(Value::Object(payload))
}

/// The deterministic runtime section: compile-time package metadata.
pub fn build_runtime_section() -> Value {
    json!({
        "implementation": "rust",
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    })
}
