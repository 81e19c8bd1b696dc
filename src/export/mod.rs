//! The export engine.
//!
//! An export serializes a selected subset of the workspace into one JSON
//! payload identified by a single CID. Every section is rendered as
//! canonical JSON, stored as its own CID, and referenced by CID string
//! from the top-level document; the optional `cid_values` map inlines the
//! content of every referenced CID so a payload can be imported into an
//! empty store. Assembly is deterministic: identical workspaces produce
//! identical payload bytes, so identical CIDs.

mod error;
mod sections;

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::{
    cid::{format_cid, Cid},
    config::Config,
    persistence::Database,
    store::CidStore,
    utils::lossy_text,
};

pub use error::{ExportError, ExportErrorKind};
pub use sections::build_runtime_section;

/// Current export payload format version.
pub const EXPORT_VERSION: u64 = 6;

/// Which collections an export covers and how they are filtered.
#[derive(Debug, Clone, Default)]
pub struct ExportSelection {
    pub include_aliases: bool,
    pub include_servers: bool,
    pub include_variables: bool,
    pub include_secrets: bool,
    pub include_history: bool,
    pub include_source: bool,
    pub include_cid_map: bool,
    pub include_unreferenced_cid_data: bool,
    pub include_disabled_aliases: bool,
    pub include_disabled_servers: bool,
    pub include_disabled_variables: bool,
    pub include_disabled_secrets: bool,
    /// Explicit name selection; `None` selects everything
    pub selected_aliases: Option<BTreeSet<String>>,
    pub selected_servers: Option<BTreeSet<String>>,
    pub selected_variables: Option<BTreeSet<String>>,
    pub selected_secrets: Option<BTreeSet<String>>,
    /// Key sealing the secrets section
    pub secret_key: String,
}

impl ExportSelection {
    /// The snapshot shape regenerated after every import: aliases, servers,
    /// and variables with the CID map inlined.
    pub fn snapshot() -> Self {
        Self {
            include_aliases: true,
            include_servers: true,
            include_variables: true,
            include_cid_map: true,
            include_disabled_aliases: true,
            include_disabled_servers: true,
            include_disabled_variables: true,
            ..Self::default()
        }
    }

    /// Everything except change history.
    pub fn everything(secret_key: impl Into<String>) -> Self {
        Self {
            include_aliases: true,
            include_servers: true,
            include_variables: true,
            include_secrets: true,
            include_source: true,
            include_cid_map: true,
            include_disabled_aliases: true,
            include_disabled_servers: true,
            include_disabled_variables: true,
            include_disabled_secrets: true,
            secret_key: secret_key.into(),
            ..Self::default()
        }
    }
}

/// The produced payload and its identifying CID.
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub cid_value: String,
    pub download_path: String,
    pub json_payload: String,
}

/// Helper for writing CIDs during export operations.
#[derive(Debug)]
pub struct CidWriter<'a> {
    store: &'a CidStore,
    user_id: &'a str,
    include_optional: bool,
    store_content: bool,
    cid_map_entries: BTreeMap<String, String>,
}

impl<'a> CidWriter<'a> {
    fn new(
        store: &'a CidStore,
        user_id: &'a str,
        include_optional: bool,
        store_content: bool,
    ) -> Self {
        Self {
            store,
            user_id,
            include_optional,
            store_content,
            cid_map_entries: BTreeMap::new(),
        }
    }

    /// Generate (and optionally store) a CID for content, recording it in
    /// the CID map when requested.
    pub fn cid_for_content(
        &mut self,
        content: &[u8],
        optional: bool,
        include_in_map: bool,
    ) -> Result<String, ExportError> {
        let cid_value = if self.store_content {
            self.store
                .put(content, self.user_id)?
                .as_str()
                .to_string()
        } else {
            Cid::generate(content).as_str().to_string()
        };

        if include_in_map && (!optional || self.include_optional) {
            self.cid_map_entries
                .entry(format_cid(&cid_value))
                .or_insert_with(|| lossy_text(content));
        }

        Ok(cid_value)
    }
}

/// Render the top-level payload: keys sorted alphabetically with
/// `cid_values` forced last, two-space indent throughout.
fn render_document(entries: &[(String, Value)]) -> Result<String, ExportError> {
    let mut out = String::from("{");
    for (index, (key, value)) in entries.iter().enumerate() {
        if index > 0 {
            out.push(',');
        }
        out.push('\n');
        let rendered = serde_json::to_string_pretty(value)?;
        for (line_index, line) in rendered.lines().enumerate() {
            if line_index == 0 {
                out.push_str(&format!("  \"{key}\": {line}"));
            } else {
                out.push('\n');
                out.push_str(&format!("  {line}"));
            }
        }
    }
    out.push_str("\n}");
    Ok(out)
}

/// Assemble the export payload for a selection.
///
/// With `store_content` false nothing is written to the CID store; the
/// payload and its would-be CID are still computed, which backs the size
/// probe.
pub fn build_export_payload(
    db: &Database,
    store: &CidStore,
    config: &Config,
    selection: &ExportSelection,
    store_content: bool,
) -> Result<ExportResult, ExportError> {
    let user_id = &config.user_id;
    let mut writer = CidWriter::new(store, user_id, selection.include_cid_map, store_content);

    let mut section_values: BTreeMap<String, Value> = BTreeMap::new();
    section_values.insert("runtime".to_string(), build_runtime_section());

    let project_files =
        sections::collect_project_files_section(&config.app_root, &mut writer)?;
    if project_files
        .as_object()
        .map(|map| !map.is_empty())
        .unwrap_or(false)
    {
        section_values.insert("project_files".to_string(), project_files);
    }

    if selection.include_aliases {
        let value = sections::collect_alias_section(db, user_id, selection, &mut writer)?;
        if value.as_array().map(|list| !list.is_empty()).unwrap_or(false) {
            section_values.insert("aliases".to_string(), value);
        }
    }
    if selection.include_servers {
        let value = sections::collect_server_section(db, user_id, selection, &mut writer)?;
        if value.as_array().map(|list| !list.is_empty()).unwrap_or(false) {
            section_values.insert("servers".to_string(), value);
        }
    }
    if selection.include_variables {
        section_values.insert(
            "variables".to_string(),
            sections::collect_variables_section(db, user_id, selection),
        );
    }
    if selection.include_secrets {
        section_values.insert(
            "secrets".to_string(),
            sections::collect_secrets_section(db, config, user_id, selection),
        );
    }
    if selection.include_history {
        let value = sections::collect_change_history_section(db, user_id);
        if value.as_object().map(|map| !map.is_empty()).unwrap_or(false) {
            section_values.insert("change_history".to_string(), value);
        }
    }
    if selection.include_source {
        let value = sections::collect_app_source_section(&config.app_root, &mut writer)?;
        if value.as_object().map(|map| !map.is_empty()).unwrap_or(false) {
            section_values.insert("app_source".to_string(), value);
        }
    }

    if selection.include_cid_map && selection.include_unreferenced_cid_data {
        for record in store.records() {
            let normalized = format_cid(&record.path);
            writer
                .cid_map_entries
                .entry(normalized)
                .or_insert_with(|| lossy_text(&record.file_data));
        }
    }

    // Replace each section value with the CID of its canonical JSON bytes.
    let mut entries: Vec<(String, Value)> = Vec::new();
    entries.push(("version".to_string(), Value::from(EXPORT_VERSION)));
    for (section_name, section_value) in &section_values {
        let section_bytes = serde_json::to_string_pretty(section_value)?.into_bytes();
        let section_cid = writer.cid_for_content(&section_bytes, false, true)?;
        entries.push((section_name.clone(), Value::from(section_cid)));
    }
    entries.sort_by(|a, b| a.0.cmp(&b.0));

    if selection.include_cid_map && !writer.cid_map_entries.is_empty() {
        let map: serde_json::Map<String, Value> = writer
            .cid_map_entries
            .iter()
            .map(|(cid, content)| (cid.clone(), Value::from(content.clone())))
            .collect();
        entries.push(("cid_values".to_string(), Value::Object(map)));
    }

    let json_payload = render_document(&entries)?;
    let json_bytes = json_payload.as_bytes();

    let (cid_value, download_path) = if store_content {
        let cid = store.put(json_bytes, user_id)?;
        let path = format!("/{}.json", cid.as_str());
        (cid.as_str().to_string(), path)
    } else {
        (Cid::generate(json_bytes).as_str().to_string(), String::new())
    };

    Ok(ExportResult {
        cid_value,
        download_path,
        json_payload,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use tempfile::tempdir;

    fn fixtures() -> (Database, CidStore, Config, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::for_tests(dir.path());
        (Database::in_memory(), CidStore::in_memory(), config, dir)
    }

    fn seeded() -> (Database, CidStore, Config, tempfile::TempDir) {
        let (db, store, config, dir) = fixtures();
        db.upsert_alias("local", "docs", "/docs -> /readme", true)
            .unwrap();
        db.upsert_server(
            &store,
            "local",
            "echo",
            "transform: template\n---\n{{request.path}}",
            true,
        )
        .unwrap();
        db.upsert_variable("local", "region", "eu-west", true).unwrap();
        (db, store, config, dir)
    }

    #[test]
    fn exporting_twice_yields_the_same_cid() {
        let (db, store, config, _dir) = seeded();
        let selection = ExportSelection::everything("export-key");
        let first = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        let second = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        assert_eq!(first.cid_value, second.cid_value);
        assert_eq!(first.json_payload, second.json_payload);
    }

    #[test]
    fn payload_references_sections_by_cid() {
        let (db, store, config, _dir) = seeded();
        let selection = ExportSelection::snapshot();
        let result = build_export_payload(&db, &store, &config, &selection, true).unwrap();

        let payload: Value = serde_json::from_str(&result.json_payload).unwrap();
        assert_eq!(payload["version"], 6);
        let aliases_cid = payload["aliases"].as_str().unwrap();
        let section_bytes = store.get(aliases_cid).unwrap();
        let section: Value = serde_json::from_slice(&section_bytes).unwrap();
        assert_eq!(section[0]["name"], "docs");
        // The alias definition itself is reachable through its CID.
        let definition_cid = section[0]["definition_cid"].as_str().unwrap();
        assert_eq!(
            store.get(definition_cid),
            Some(b"/docs -> /readme".to_vec())
        );
    }

    #[test]
    fn cid_values_appear_last_and_inline_referenced_content() {
        let (db, store, config, _dir) = seeded();
        let selection = ExportSelection::snapshot();
        let result = build_export_payload(&db, &store, &config, &selection, true).unwrap();

        let trailing = result
            .json_payload
            .rfind("\"cid_values\"")
            .expect("cid_values present");
        for key in ["\"aliases\"", "\"servers\"", "\"variables\"", "\"version\""] {
            let position = result.json_payload.find(key).unwrap();
            assert!(position < trailing, "{key} should precede cid_values");
        }

        let payload: Value = serde_json::from_str(&result.json_payload).unwrap();
        let map = payload["cid_values"].as_object().unwrap();
        assert!(map
            .values()
            .any(|value| value.as_str() == Some("/docs -> /readme")));
    }

    #[test]
    fn size_probe_writes_nothing() {
        let (db, store, config, _dir) = seeded();
        let rows_before = store.len();
        let selection = ExportSelection::snapshot();
        let result = build_export_payload(&db, &store, &config, &selection, false).unwrap();
        assert!(!result.json_payload.is_empty());
        assert!(result.download_path.is_empty());
        assert_eq!(store.len(), rows_before);
    }

    #[test]
    fn size_probe_matches_the_stored_payload() {
        let (db, store, config, _dir) = seeded();
        let selection = ExportSelection::snapshot();
        let probed = build_export_payload(&db, &store, &config, &selection, false).unwrap();
        let stored = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        assert_eq!(probed.json_payload.len(), stored.json_payload.len());
        assert_eq!(probed.cid_value, stored.cid_value);
    }

    #[test]
    fn disabled_entities_are_filtered_unless_requested() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_alias("local", "off", "/off -> /nowhere", false)
            .unwrap();

        let mut selection = ExportSelection::snapshot();
        selection.include_disabled_aliases = false;
        let result = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        let payload: Value = serde_json::from_str(&result.json_payload).unwrap();
        assert!(payload.get("aliases").is_none());

        selection.include_disabled_aliases = true;
        let result = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        let payload: Value = serde_json::from_str(&result.json_payload).unwrap();
        assert!(payload.get("aliases").is_some());
    }

    #[test]
    fn secrets_section_is_deterministic_for_a_fixed_key() {
        let (db, store, config, _dir) = fixtures();
        let sealed = crate::crypto::encrypt_secret_value("tok", &config.boot_secret_key);
        db.upsert_secret("local", "api", &sealed, true).unwrap();

        let mut selection = ExportSelection::snapshot();
        selection.include_secrets = true;
        selection.secret_key = "export-key".to_string();

        let first = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        let second = build_export_payload(&db, &store, &config, &selection, true).unwrap();
        assert_eq!(first.cid_value, second.cid_value);
    }
}
