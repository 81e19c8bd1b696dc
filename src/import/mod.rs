//! The import engine.
//!
//! A payload is a JSON object in the export shape. Sections referenced by
//! CID are resolved through the inline `cid_values` map or the store; each
//! selected section is imported independently, accumulating per-entry
//! errors rather than aborting the run. A successful import regenerates a
//! snapshot export and records it.

mod boot;
mod entities;

use serde_json::Value;
use std::collections::BTreeMap;

use crate::{
    cid::{format_cid, Cid},
    config::Config,
    export::{build_export_payload, ExportResult, ExportSelection},
    persistence::{Database, InteractionRequest},
    store::CidStore,
};

pub use boot::{
    boot_image_diff, extract_cid_references_from_payload, find_missing_cids,
    import_boot_cid, load_and_validate_boot_cid, verify_boot_cid_dependencies, BootError,
    BootReport,
};
pub use entities::{coerce_enabled_flag, load_cid_bytes};

/// Which payload sections an import applies.
#[derive(Debug, Clone, Default)]
pub struct ImportSelection {
    pub include_aliases: bool,
    pub include_servers: bool,
    pub include_variables: bool,
    pub include_secrets: bool,
    pub include_history: bool,
    /// Store inline `cid_values` content into the CID store
    pub process_cid_map: bool,
    /// Key unsealing the secrets section
    pub secret_key: String,
}

impl ImportSelection {
    /// Enable every section present in the payload, boot-importer style.
    pub fn from_payload(payload: &Value, secret_key: impl Into<String>) -> Self {
        Self {
            include_aliases: payload.get("aliases").is_some(),
            include_servers: payload.get("servers").is_some(),
            include_variables: payload.get("variables").is_some(),
            include_secrets: payload.get("secrets").is_some(),
            include_history: payload.get("change_history").is_some(),
            process_cid_map: payload.get("cid_values").is_some(),
            secret_key: secret_key.into(),
        }
    }

    /// Enable everything.
    pub fn everything(secret_key: impl Into<String>) -> Self {
        Self {
            include_aliases: true,
            include_servers: true,
            include_variables: true,
            include_secrets: true,
            include_history: true,
            process_cid_map: true,
            secret_key: secret_key.into(),
        }
    }
}

/// Outcome of one import run.
#[derive(Debug, Default)]
pub struct ImportReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub summaries: Vec<String>,
    pub imported_names: BTreeMap<String, Vec<String>>,
    pub snapshot: Option<ExportResult>,
}

impl ImportReport {
    /// Whether anything was imported or reported.
    pub fn changed(&self) -> bool {
        !self.summaries.is_empty()
    }
}

/// Parse raw import text into a JSON object payload.
pub fn parse_import_payload(raw: &str) -> Result<Value, String> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|err| format!("Import payload is not valid JSON: {err}"))?;
    if !parsed.is_object() {
        return Err("Import payload must be a JSON object.".to_string());
    }
    Ok(parsed)
}

/// Parse the `cid_values` section into raw bytes per normalized CID.
pub fn parse_cid_values_section(
    raw_map: Option<&Value>,
) -> (BTreeMap<String, Vec<u8>>, Vec<String>) {
    let mut cid_values = BTreeMap::new();
    let mut errors = Vec::new();

    let Some(raw_map) = raw_map else {
        return (cid_values, errors);
    };
    let Some(object) = raw_map.as_object() else {
        errors.push("CID map must be an object mapping CID values to content.".to_string());
        return (cid_values, errors);
    };

    for (raw_key, raw_value) in object {
        let normalized = format_cid(raw_key);
        let normalized = normalized.split('.').next().unwrap_or_default().to_string();
        if normalized.is_empty() {
            errors.push("CID map entries must use non-empty string keys.".to_string());
            continue;
        }
        let Some(text) = raw_value.as_str() else {
            errors.push(format!(
                "CID \"{normalized}\" entry invalid: CID map values must be strings."
            ));
            continue;
        };
        cid_values.insert(normalized, text.as_bytes().to_vec());
    }

    (cid_values, errors)
}

/// Ingest the CID map: verify each inlined entry hashes to its claimed
/// key, optionally store the content, and return the lookup table used to
/// resolve section references.
pub fn ingest_cid_map(
    store: &CidStore,
    config: &Config,
    payload: &Value,
    process_cid_map: bool,
    errors: &mut Vec<String>,
) -> BTreeMap<String, Vec<u8>> {
    let (parsed, mut parse_errors) = parse_cid_values_section(payload.get("cid_values"));
    errors.append(&mut parse_errors);

    let mut lookup = BTreeMap::new();
    for (cid_value, content) in parsed {
        let expected = Cid::generate(&content);
        if cid_value != expected.as_str() {
            errors.push(format!(
                "CID \"{cid_value}\" content did not match its hash and was skipped."
            ));
            continue;
        }
        if process_cid_map {
            if let Err(err) = store.put(&content, &config.user_id) {
                errors.push(format!("CID \"{cid_value}\" could not be stored: {err}"));
                continue;
            }
        }
        lookup.insert(cid_value, content);
    }
    lookup
}

/// Load a section from the payload, resolving a CID reference when the
/// section value is a string. Returns `(section, fatal)`.
pub fn load_export_section(
    payload: &Value,
    key: &str,
    cid_lookup: &BTreeMap<String, Vec<u8>>,
    store: &CidStore,
    errors: &mut Vec<String>,
) -> (Option<Value>, bool) {
    let Some(raw_value) = payload.get(key) else {
        return (None, false);
    };

    let Value::String(reference) = raw_value else {
        return (Some(raw_value.clone()), false);
    };

    let cid_value = format_cid(reference);
    let cid_value = cid_value.split('.').next().unwrap_or_default().to_string();
    if cid_value.is_empty() {
        errors.push(format!("Section \"{key}\" referenced an invalid CID value."));
        return (None, true);
    }
    let Some(content) = load_cid_bytes(&cid_value, cid_lookup, store) else {
        errors.push(format!(
            "Section \"{key}\" referenced CID \"{cid_value}\" but the content was not provided."
        ));
        return (None, true);
    };
    let Ok(text) = String::from_utf8(content) else {
        errors.push(format!(
            "Section \"{key}\" referenced CID \"{cid_value}\" that was not UTF-8 encoded."
        ));
        return (None, true);
    };
    match serde_json::from_str(&text) {
        Ok(value) => (Some(value), false),
        Err(_) => {
            errors.push(format!(
                "Section \"{key}\" referenced CID \"{cid_value}\" with invalid JSON content."
            ));
            (None, true)
        }
    }
}

fn summarize(report: &mut ImportReport, count: usize, singular: &str, plural: &str) {
    if count > 0 {
        let label = if count == 1 { singular } else { plural };
        report.summaries.push(format!("{count} {label}"));
    }
}

/// Regenerate the post-import snapshot export and record it.
pub fn generate_snapshot_export(
    db: &Database,
    store: &CidStore,
    config: &Config,
) -> Option<ExportResult> {
    let selection = ExportSelection::snapshot();
    match build_export_payload(db, store, config, &selection, true) {
        Ok(result) => {
            if let Err(err) = db.record_export(&config.user_id, &result.cid_value) {
                tracing::warn!(%err, "failed to record snapshot export");
            }
            Some(result)
        }
        Err(err) => {
            tracing::warn!(%err, "failed to generate snapshot export after import");
            None
        }
    }
}

/// Apply an import payload to the workspace.
pub fn process_import(
    db: &Database,
    store: &CidStore,
    config: &Config,
    selection: &ImportSelection,
    payload: &Value,
    reserved_routes: &std::collections::BTreeSet<String>,
    change_message: &str,
) -> ImportReport {
    let mut report = ImportReport::default();
    let user_id = &config.user_id;

    let cid_lookup = ingest_cid_map(
        store,
        config,
        payload,
        selection.process_cid_map,
        &mut report.errors,
    );

    if selection.include_aliases {
        let (section, fatal) =
            load_export_section(payload, "aliases", &cid_lookup, store, &mut report.errors);
        if let (Some(section), false) = (section, fatal) {
            let (count, names) = entities::import_aliases(
                db,
                store,
                user_id,
                &section,
                &cid_lookup,
                reserved_routes,
                change_message,
                &mut report.errors,
            );
            summarize(&mut report, count, "alias", "aliases");
            report.imported_names.insert("aliases".to_string(), names);
        }
    }

    if selection.include_servers {
        let (section, fatal) =
            load_export_section(payload, "servers", &cid_lookup, store, &mut report.errors);
        if let (Some(section), false) = (section, fatal) {
            let (count, names) = entities::import_servers(
                db,
                store,
                user_id,
                &section,
                &cid_lookup,
                change_message,
                &mut report.errors,
            );
            summarize(&mut report, count, "server", "servers");
            report.imported_names.insert("servers".to_string(), names);
        }
    }

    if selection.include_variables {
        let (section, fatal) =
            load_export_section(payload, "variables", &cid_lookup, store, &mut report.errors);
        if let (Some(section), false) = (section, fatal) {
            let (count, names) = entities::import_variables(
                db,
                user_id,
                &section,
                change_message,
                &mut report.errors,
            );
            summarize(&mut report, count, "variable", "variables");
            report.imported_names.insert("variables".to_string(), names);
        }
    }

    if selection.include_secrets {
        let (section, fatal) =
            load_export_section(payload, "secrets", &cid_lookup, store, &mut report.errors);
        if let (Some(section), false) = (section, fatal) {
            let (count, names) = entities::import_secrets(
                db,
                config,
                user_id,
                &section,
                &selection.secret_key,
                change_message,
                &mut report.errors,
            );
            summarize(&mut report, count, "secret", "secrets");
            report.imported_names.insert("secrets".to_string(), names);
        }
    }

    if selection.include_history {
        let (section, fatal) = load_export_section(
            payload,
            "change_history",
            &cid_lookup,
            store,
            &mut report.errors,
        );
        if let (Some(section), false) = (section, fatal) {
            let count =
                entities::import_change_history(db, user_id, &section, &mut report.errors);
            summarize(&mut report, count, "history event", "history events");
        }
    }

    if report.changed() || !report.errors.is_empty() || !report.warnings.is_empty() {
        let _ = db.record_interaction(InteractionRequest {
            user_id: user_id.to_string(),
            entity_type: "import".to_string(),
            entity_name: "json".to_string(),
            action: "save".to_string(),
            message: change_message.to_string(),
            content: payload.to_string(),
        });
    }

    report.snapshot = generate_snapshot_export(db, store, config);
    report
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn fixtures() -> (Database, CidStore, Config, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::for_tests(dir.path());
        (Database::in_memory(), CidStore::in_memory(), config, dir)
    }

    fn no_reserved() -> BTreeSet<String> {
        BTreeSet::new()
    }

    #[test]
    fn malformed_payloads_are_rejected_up_front() {
        assert!(parse_import_payload("not json").is_err());
        assert!(parse_import_payload("[1, 2]").is_err());
        assert!(parse_import_payload("{\"version\": 6}").is_ok());
    }

    #[test]
    fn inline_sections_import_directly() {
        let (db, store, config, _dir) = fixtures();
        let payload = serde_json::json!({
            "version": 6,
            "aliases": [{"name": "docs", "definition": "/docs -> /readme", "enabled": true}],
            "variables": [{"name": "region", "definition": "eu-west", "enabled": true}],
        });
        let selection = ImportSelection::everything("");
        let report = process_import(
            &db,
            &store,
            &config,
            &selection,
            &payload,
            &no_reserved(),
            "test import",
        );
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        assert_eq!(db.user_aliases("local").len(), 1);
        assert_eq!(db.user_variables("local").len(), 1);
        assert!(report.snapshot.is_some());
    }

    #[test]
    fn cid_referenced_sections_resolve_through_the_map() {
        let (db, store, config, _dir) = fixtures();
        let section =
            serde_json::json!([{"name": "docs", "definition": "/docs -> /readme", "enabled": true}]);
        let section_text = serde_json::to_string_pretty(&section).unwrap();
        let section_cid = Cid::generate(section_text.as_bytes());

        let payload = serde_json::json!({
            "version": 6,
            "aliases": section_cid.as_str(),
            "cid_values": { section_cid.as_str(): section_text },
        });
        let selection = ImportSelection::everything("");
        let report = process_import(
            &db,
            &store,
            &config,
            &selection,
            &payload,
            &no_reserved(),
            "",
        );
        assert!(report.errors.is_empty(), "errors: {:?}", report.errors);
        assert_eq!(db.user_aliases("local")[0].target_path, "/readme");
        // Processing the map also lands the content in the store.
        assert!(store.exists(section_cid.as_str()));
    }

    #[test]
    fn tampered_cid_map_entries_are_skipped_with_an_error() {
        let (db, store, config, _dir) = fixtures();
        // Hashed CID: content over the embed limit, so existence depends on
        // a store row.
        let honest_content = "x".repeat(100);
        let honest = Cid::generate(honest_content.as_bytes());
        let payload = serde_json::json!({
            "version": 6,
            "cid_values": { honest.as_str(): "different content" },
        });
        let selection = ImportSelection::everything("");
        let report = process_import(
            &db,
            &store,
            &config,
            &selection,
            &payload,
            &no_reserved(),
            "",
        );
        assert!(report
            .errors
            .iter()
            .any(|err| err.contains("did not match its hash")));
        assert!(!store.exists(honest.as_str()));
        assert!(db.user_aliases("local").is_empty());
    }

    #[test]
    fn missing_section_reference_is_fatal_for_that_section_only() {
        let (db, store, config, _dir) = fixtures();
        let absent = Cid::generate(&vec![3u8; 100]);
        let payload = serde_json::json!({
            "version": 6,
            "aliases": absent.as_str(),
            "variables": [{"name": "ok", "definition": "1", "enabled": true}],
        });
        let selection = ImportSelection::everything("");
        let report = process_import(
            &db,
            &store,
            &config,
            &selection,
            &payload,
            &no_reserved(),
            "",
        );
        assert!(report
            .errors
            .iter()
            .any(|err| err.contains("was not provided")));
        assert!(db.user_aliases("local").is_empty());
        assert_eq!(db.user_variables("local").len(), 1);
    }

    #[test]
    fn wrong_secret_key_fails_only_the_secrets_section() {
        let (db, store, config, _dir) = fixtures();
        let ciphertext = crate::crypto::encrypt_secret_value("token", "right-key");
        let payload = serde_json::json!({
            "version": 6,
            "secrets": {
                "encryption": crate::crypto::SECRET_ENCRYPTION_SCHEME,
                "items": [{"name": "api", "ciphertext": ciphertext, "enabled": true}],
            },
            "variables": [{"name": "ok", "definition": "1", "enabled": true}],
        });
        let mut selection = ImportSelection::everything("wrong-key");
        selection.process_cid_map = false;
        let report = process_import(
            &db,
            &store,
            &config,
            &selection,
            &payload,
            &no_reserved(),
            "",
        );
        assert!(report
            .errors
            .iter()
            .any(|err| err == "Invalid decryption key for secrets"));
        assert!(db.user_secrets("local").is_empty());
        assert_eq!(db.user_variables("local").len(), 1);
    }

    #[test]
    fn reserved_alias_names_are_skipped() {
        let (db, store, config, _dir) = fixtures();
        let payload = serde_json::json!({
            "version": 6,
            "aliases": [{"name": "upload", "definition": "/upload -> /elsewhere", "enabled": true}],
        });
        let reserved: BTreeSet<String> = ["/upload".to_string()].into_iter().collect();
        let selection = ImportSelection::everything("");
        let report = process_import(
            &db, &store, &config, &selection, &payload, &reserved, "",
        );
        assert!(report
            .errors
            .iter()
            .any(|err| err.contains("conflicts with an existing route")));
        assert!(db.user_aliases("local").is_empty());
    }

    #[test]
    fn change_history_import_dedupes_events() {
        let (db, store, config, _dir) = fixtures();
        let payload = serde_json::json!({
            "version": 6,
            "change_history": {
                "aliases": {
                    "docs": [
                        {"action": "save", "message": "first", "content": "", "created_at": "2026-01-01T00:00:00+00:00"},
                    ],
                },
            },
        });
        let selection = ImportSelection::everything("");
        let first = process_import(
            &db, &store, &config, &selection, &payload, &no_reserved(), "",
        );
        assert!(first.summaries.iter().any(|s| s.contains("history event")));
        let second = process_import(
            &db, &store, &config, &selection, &payload, &no_reserved(), "",
        );
        assert!(!second.summaries.iter().any(|s| s.contains("history event")));
        assert_eq!(db.interactions_for("local", "alias", "docs").len(), 1);
    }
}
