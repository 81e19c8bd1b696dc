//! Boot-CID import: bring up a workspace from a single CID.
//!
//! Dependency verification runs before any mutation: every section key
//! whose value is a string CID must already be present in the store (or be
//! inlined in `cid_values`). A failed verification aborts with the full
//! missing list and leaves every table untouched.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt::Display;

use crate::{
    cid::{format_cid, is_normalized_cid},
    config::Config,
    export::ExportResult,
    persistence::Database,
    store::CidStore,
};

use super::{
    entities::coerce_enabled_flag, load_export_section, parse_cid_values_section,
    process_import, ImportReport, ImportSelection,
};

/// Section keys whose string values are CID references.
const SECTION_KEYS: [&str; 7] = [
    "aliases",
    "servers",
    "variables",
    "secrets",
    "change_history",
    "app_source",
    "metadata",
];

/// Failures bringing up a workspace from a boot CID.
#[derive(Debug)]
pub struct BootError {
    kind: BootErrorKind,
}

impl BootError {
    pub fn invalid_cid(value: String) -> Self {
        Self {
            kind: BootErrorKind::InvalidCid(value),
        }
    }

    pub fn not_found(value: String) -> Self {
        Self {
            kind: BootErrorKind::NotFound(value),
        }
    }

    pub fn not_utf8(value: String) -> Self {
        Self {
            kind: BootErrorKind::NotUtf8(value),
        }
    }

    pub fn not_json(value: String, message: String) -> Self {
        Self {
            kind: BootErrorKind::NotJson(value, message),
        }
    }

    pub fn not_an_object(value: String) -> Self {
        Self {
            kind: BootErrorKind::NotAnObject(value),
        }
    }

    pub fn missing_dependencies(missing: Vec<String>) -> Self {
        Self {
            kind: BootErrorKind::MissingDependencies(missing),
        }
    }

    pub fn import_failed(errors: Vec<String>) -> Self {
        Self {
            kind: BootErrorKind::ImportFailed(errors),
        }
    }

    /// Whether this is the dependency-verification failure.
    pub fn is_missing_dependencies(&self) -> bool {
        matches!(self.kind, BootErrorKind::MissingDependencies(_))
    }
}

#[derive(Debug)]
pub enum BootErrorKind {
    /// The supplied value is not a structurally valid CID
    InvalidCid(String),
    /// The boot CID has no content in the store
    NotFound(String),
    /// Boot content is not UTF-8 text
    NotUtf8(String),
    /// Boot content is not valid JSON
    NotJson(String, String),
    /// Boot content is JSON but not an object
    NotAnObject(String),
    /// Referenced CIDs are absent from the store
    MissingDependencies(Vec<String>),
    /// The import itself reported errors
    ImportFailed(Vec<String>),
}

impl Display for BootError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            BootErrorKind::InvalidCid(value) => write!(f, "Invalid CID format: {value}"),
            BootErrorKind::NotFound(value) => write!(
                f,
                "Boot CID not found in the store: {value}\nMake sure the CID file exists in the cids directory."
            ),
            BootErrorKind::NotUtf8(value) => {
                write!(f, "Boot CID content is not valid UTF-8: {value}")
            }
            BootErrorKind::NotJson(value, message) => {
                write!(f, "Boot CID content is not valid JSON: {value}\nError: {message}")
            }
            BootErrorKind::NotAnObject(value) => {
                write!(f, "Boot CID content must be a JSON object: {value}")
            }
            BootErrorKind::MissingDependencies(missing) => {
                let listing = missing.join("\n  ");
                write!(
                    f,
                    "Boot CID import failed: The following referenced CIDs are missing from the database:\n  {listing}\n\nPlease place files with those names in the cids/ directory before starting."
                )
            }
            BootErrorKind::ImportFailed(errors) => {
                write!(f, "Boot CID import failed:\n{}", errors.join("\n"))
            }
        }
    }
}

impl std::error::Error for BootError {}

/// Extract the CID references a payload requires, excluding those already
/// inlined in `cid_values`. Returns store paths (leading slash).
pub fn extract_cid_references_from_payload(payload: &Value) -> BTreeSet<String> {
    let mut provided = BTreeSet::new();
    let (cid_values, _) = parse_cid_values_section(payload.get("cid_values"));
    for cid_value in cid_values.keys() {
        provided.insert(format!("/{cid_value}"));
    }

    let mut references = BTreeSet::new();
    for key in SECTION_KEYS {
        let Some(Value::String(reference)) = payload.get(key) else {
            continue;
        };
        let normalized = format_cid(reference);
        let normalized = normalized.split('.').next().unwrap_or_default();
        if normalized.is_empty() {
            continue;
        }
        let path = format!("/{normalized}");
        if !provided.contains(&path) {
            references.insert(path);
        }
    }
    references
}

/// The referenced CIDs absent from the store, sorted for stable output.
pub fn find_missing_cids(store: &CidStore, required: &BTreeSet<String>) -> Vec<String> {
    let available = store.paths();
    required
        .iter()
        .filter(|path| !available.contains(*path))
        .cloned()
        .collect()
}

/// Load the boot CID from the store and require a UTF-8 JSON object.
pub fn load_and_validate_boot_cid(
    store: &CidStore,
    boot_cid: &str,
) -> Result<Value, BootError> {
    let normalized = format_cid(boot_cid);
    if !is_normalized_cid(&normalized) {
        return Err(BootError::invalid_cid(boot_cid.to_string()));
    }

    let Some(content) = store.get(&normalized) else {
        return Err(BootError::not_found(normalized));
    };
    let text =
        String::from_utf8(content).map_err(|_| BootError::not_utf8(normalized.clone()))?;
    let payload: Value = serde_json::from_str(&text)
        .map_err(|err| BootError::not_json(normalized.clone(), err.to_string()))?;
    if !payload.is_object() {
        return Err(BootError::not_an_object(normalized));
    }
    Ok(payload)
}

/// Verify every CID the boot payload references is satisfiable. No
/// mutation happens here.
pub fn verify_boot_cid_dependencies(
    store: &CidStore,
    boot_cid: &str,
) -> Result<Value, BootError> {
    let payload = load_and_validate_boot_cid(store, boot_cid)?;
    let required = extract_cid_references_from_payload(&payload);
    if required.is_empty() {
        return Ok(payload);
    }
    let missing = find_missing_cids(store, &required);
    if !missing.is_empty() {
        return Err(BootError::missing_dependencies(missing));
    }
    Ok(payload)
}

fn diff_entity_section(
    section: &Value,
    kind: &str,
    current: impl Fn(&str) -> Option<(String, bool)>,
    warnings: &mut Vec<String>,
) {
    let entries: Vec<&Value> = match section {
        Value::Array(list) => list.iter().collect(),
        Value::Object(object) => object
            .get("items")
            .and_then(Value::as_array)
            .map(|items| items.iter().collect())
            .unwrap_or_default(),
        _ => Vec::new(),
    };

    for entry in entries {
        let Some(name) = entry.get("name").and_then(Value::as_str) else {
            continue;
        };
        let Some((existing_definition, existing_enabled)) = current(name) else {
            continue;
        };
        let inbound_enabled = coerce_enabled_flag(entry.get("enabled"));
        let definition_differs = entry
            .get("definition")
            .and_then(Value::as_str)
            .map(|inbound| inbound != existing_definition)
            .unwrap_or(false);
        if definition_differs {
            warnings.push(format!("{kind} \"{name}\": definition differs from boot image"));
        }
        if inbound_enabled != existing_enabled {
            warnings.push(format!(
                "{kind} \"{name}\": enabled flag differs from boot image"
            ));
        }
    }
}

/// Compare inbound entities against current rows; returns warning lines
/// for names whose definition or enabled flag differs. Informational only.
pub fn boot_image_diff(
    db: &Database,
    store: &CidStore,
    config: &Config,
    payload: &Value,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let mut errors = Vec::new();
    let cid_lookup = super::ingest_cid_map(store, config, payload, false, &mut errors);
    let user_id = &config.user_id;

    if let (Some(section), false) =
        load_export_section(payload, "aliases", &cid_lookup, store, &mut errors)
    {
        diff_entity_section(
            &section,
            "alias",
            |name| {
                db.alias_by_name(user_id, name)
                    .map(|row| (row.definition, row.enabled))
            },
            &mut warnings,
        );
    }
    if let (Some(section), false) =
        load_export_section(payload, "servers", &cid_lookup, store, &mut errors)
    {
        diff_entity_section(
            &section,
            "server",
            |name| {
                db.server_by_name(user_id, name)
                    .map(|row| (row.definition, row.enabled))
            },
            &mut warnings,
        );
    }
    if let (Some(section), false) =
        load_export_section(payload, "variables", &cid_lookup, store, &mut errors)
    {
        diff_entity_section(
            &section,
            "variable",
            |name| {
                db.variable_by_name(user_id, name)
                    .map(|row| (row.definition, row.enabled))
            },
            &mut warnings,
        );
    }

    warnings
}

/// Outcome of a successful boot import.
#[derive(Debug)]
pub struct BootReport {
    pub summaries: Vec<String>,
    pub warnings: Vec<String>,
    /// Snapshot export generated after the import
    pub snapshot: Option<ExportResult>,
}

/// Import a boot CID through the same paths as the HTTP import endpoint.
///
/// Dependency verification precedes every mutation; a failure returns the
/// missing list with no table touched. The informational boot-image diff
/// is returned in the report's warnings.
pub fn import_boot_cid(
    db: &Database,
    store: &CidStore,
    config: &Config,
    reserved_routes: &BTreeSet<String>,
    boot_cid: &str,
) -> Result<BootReport, BootError> {
    let payload = verify_boot_cid_dependencies(store, boot_cid)?;

    let diff_warnings = boot_image_diff(db, store, config, &payload);

    let selection = ImportSelection::from_payload(&payload, config.boot_secret_key.clone());
    let change_message = format!("Boot import from CID {}", format_cid(boot_cid));
    let report: ImportReport = process_import(
        db,
        store,
        config,
        &selection,
        &payload,
        reserved_routes,
        &change_message,
    );

    if !report.errors.is_empty() {
        return Err(BootError::import_failed(report.errors));
    }

    let mut warnings = diff_warnings;
    warnings.extend(report.warnings);

    Ok(BootReport {
        summaries: report.summaries,
        warnings,
        snapshot: report.snapshot,
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::cid::Cid;
    use tempfile::tempdir;

    fn fixtures() -> (Database, CidStore, Config, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = Config::for_tests(dir.path());
        (Database::in_memory(), CidStore::in_memory(), config, dir)
    }

    fn no_reserved() -> BTreeSet<String> {
        BTreeSet::new()
    }

    /// A hashed CID (content over the embed limit) that is not in the store.
    fn absent_cid() -> Cid {
        Cid::generate(&vec![42u8; 128])
    }

    #[test]
    fn references_exclude_inlined_cid_values() {
        let aliases_cid = Cid::generate(&vec![1u8; 100]);
        let servers_cid = Cid::generate(&vec![2u8; 100]);
        let inlined_text = "[]";
        let inlined_cid = Cid::generate(inlined_text.as_bytes());

        let payload = serde_json::json!({
            "aliases": aliases_cid.as_str(),
            "servers": servers_cid.as_str(),
            "variables": inlined_cid.as_str(),
            "cid_values": { inlined_cid.as_str(): inlined_text },
        });

        let references = extract_cid_references_from_payload(&payload);
        assert!(references.contains(&aliases_cid.store_path()));
        assert!(references.contains(&servers_cid.store_path()));
        assert!(!references.contains(&inlined_cid.store_path()));
    }

    #[test]
    fn missing_dependency_aborts_before_any_mutation() {
        let (db, store, config, _dir) = fixtures();
        let absent = absent_cid();
        let payload_text = serde_json::to_string_pretty(&serde_json::json!({
            "version": 6,
            "aliases": absent.as_str(),
        }))
        .unwrap();
        let boot = store.put(payload_text.as_bytes(), "local").unwrap();

        let err = import_boot_cid(&db, &store, &config, &no_reserved(), boot.as_str())
            .unwrap_err();
        assert!(err.is_missing_dependencies());
        let rendered = err.to_string();
        assert!(rendered.contains("missing from the database"));
        assert!(rendered.contains(absent.as_str()));
        // No mutation happened.
        assert!(db.user_aliases("local").is_empty());
        assert!(db.user_interactions("local").is_empty());
    }

    #[test]
    fn boot_cid_must_be_valid_json_object() {
        let (_db, store, _config, _dir) = fixtures();
        let not_json = store.put(&vec![0u8; 80], "local").unwrap();
        assert!(load_and_validate_boot_cid(&store, not_json.as_str()).is_err());

        let list = store.put(b"[1, 2, 3]", "local").unwrap();
        assert!(matches!(
            load_and_validate_boot_cid(&store, list.as_str()),
            Err(ref err) if err.to_string().contains("JSON object")
        ));

        assert!(load_and_validate_boot_cid(&store, "!!!").is_err());
        assert!(load_and_validate_boot_cid(&store, absent_cid().as_str()).is_err());
    }

    #[test]
    fn satisfied_dependencies_import_and_snapshot() {
        let (db, store, config, _dir) = fixtures();

        let section = serde_json::json!([
            {"name": "docs", "definition": "/docs -> /readme", "enabled": true}
        ]);
        let section_text = serde_json::to_string_pretty(&section).unwrap();
        let section_cid = store.put(section_text.as_bytes(), "local").unwrap();

        let payload_text = serde_json::to_string_pretty(&serde_json::json!({
            "version": 6,
            "aliases": section_cid.as_str(),
        }))
        .unwrap();
        let boot = store.put(payload_text.as_bytes(), "local").unwrap();

        let report =
            import_boot_cid(&db, &store, &config, &no_reserved(), boot.as_str()).unwrap();
        assert!(report.summaries.iter().any(|s| s.contains("alias")));
        assert_eq!(db.user_aliases("local")[0].name, "docs");
        assert!(report.snapshot.is_some());
    }

    #[test]
    fn diff_reports_entities_that_would_change() {
        let (db, store, config, _dir) = fixtures();
        db.upsert_alias("local", "docs", "/docs -> /old-target", true)
            .unwrap();

        let payload = serde_json::json!({
            "version": 6,
            "aliases": [
                {"name": "docs", "definition": "/docs -> /new-target", "enabled": false}
            ],
        });
        let warnings = boot_image_diff(&db, &store, &config, &payload);
        assert!(warnings.iter().any(|w| w.contains("definition differs")));
        assert!(warnings.iter().any(|w| w.contains("enabled flag differs")));
    }
}
