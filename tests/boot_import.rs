//! Boot-from-CID behavior against a real mirror directory: dependency
//! verification, abort-before-mutation, diff warnings, and the snapshot
//! generated after a successful boot.

use serde_json::json;

use cidspace::{
    cid::Cid,
    config::Config,
    http::existing_routes,
    import::{import_boot_cid, verify_boot_cid_dependencies},
    persistence::Database,
    store::{load_cids_from_directory, CidStore},
};

fn mirror_fixture(dir: &std::path::Path, bytes: &[u8]) -> Cid {
    let cid = Cid::generate(bytes);
    std::fs::write(dir.join("cids").join(cid.as_str()), bytes).unwrap();
    cid
}

fn booted_workspace(
    dir: &std::path::Path,
) -> (Database, CidStore, Config) {
    let config = Config::for_tests(dir);
    let db = Database::in_memory();
    let store = CidStore::with_directory(&config.cid_directory);
    load_cids_from_directory(&store, &config.user_id, false).unwrap();
    (db, store, config)
}

/// A hashed CID for content that is nowhere in the store.
fn absent_cid() -> Cid {
    Cid::generate(&vec![99u8; 200])
}

#[test]
fn boot_with_missing_dependency_aborts_before_mutation() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cids")).unwrap();

    let absent = absent_cid();
    let boot_payload = serde_json::to_string_pretty(&json!({
        "version": 6,
        "aliases": absent.as_str(),
    }))
    .unwrap();
    let boot_cid = mirror_fixture(dir.path(), boot_payload.as_bytes());

    let (db, store, config) = booted_workspace(dir.path());
    let err = import_boot_cid(&db, &store, &config, &existing_routes(), boot_cid.as_str())
        .unwrap_err();

    assert!(err.is_missing_dependencies());
    let rendered = err.to_string();
    assert!(rendered.contains("missing from the database"));
    assert!(rendered.contains(absent.as_str()));

    // All tables are still empty.
    assert!(db.user_aliases("local").is_empty());
    assert!(db.user_servers("local").is_empty());
    assert!(db.user_interactions("local").is_empty());
}

#[test]
fn boot_from_mirror_files_materializes_the_workspace() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cids")).unwrap();

    let aliases_section = serde_json::to_string_pretty(&json!([
        { "name": "docs", "definition": "/docs -> /readme", "enabled": true }
    ]))
    .unwrap();
    let aliases_cid = mirror_fixture(dir.path(), aliases_section.as_bytes());

    let servers_section = serde_json::to_string_pretty(&json!([
        {
            "name": "echo",
            "definition": "transform: template\ncontent-type: text/plain\n---\nhello",
            "enabled": true,
        }
    ]))
    .unwrap();
    let servers_cid = mirror_fixture(dir.path(), servers_section.as_bytes());

    let boot_payload = serde_json::to_string_pretty(&json!({
        "version": 6,
        "aliases": aliases_cid.as_str(),
        "servers": servers_cid.as_str(),
    }))
    .unwrap();
    let boot_cid = mirror_fixture(dir.path(), boot_payload.as_bytes());

    let (db, store, config) = booted_workspace(dir.path());
    let report = import_boot_cid(&db, &store, &config, &existing_routes(), boot_cid.as_str())
        .unwrap();

    assert_eq!(db.user_aliases("local")[0].target_path, "/readme");
    assert_eq!(db.user_servers("local")[0].name, "echo");
    assert!(report.summaries.iter().any(|s| s.contains("alias")));
    assert!(report.summaries.iter().any(|s| s.contains("server")));

    // The post-boot snapshot is itself stored and recorded.
    let snapshot = report.snapshot.expect("snapshot generated");
    assert!(store.exists(&snapshot.cid_value));
    assert_eq!(db.user_exports("local")[0].cid_value, snapshot.cid_value);
}

#[test]
fn boot_verification_passes_when_cid_values_inline_content() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cids")).unwrap();

    let section_text = serde_json::to_string_pretty(&json!([
        { "name": "region", "definition": "eu-west", "enabled": true }
    ]))
    .unwrap();
    let section_cid = Cid::generate(section_text.as_bytes());

    // The section content rides inside the payload, not the mirror.
    let boot_payload = serde_json::to_string_pretty(&json!({
        "version": 6,
        "variables": section_cid.as_str(),
        "cid_values": { section_cid.as_str(): section_text },
    }))
    .unwrap();
    let boot_cid = mirror_fixture(dir.path(), boot_payload.as_bytes());

    let (db, store, config) = booted_workspace(dir.path());
    assert!(verify_boot_cid_dependencies(&store, boot_cid.as_str()).is_ok());

    let report = import_boot_cid(&db, &store, &config, &existing_routes(), boot_cid.as_str())
        .unwrap();
    assert!(report.summaries.iter().any(|s| s.contains("variable")));
    assert_eq!(db.user_variables("local")[0].definition, "eu-west");
    // Processing the CID map also persisted the section bytes.
    assert!(store.paths().contains(&section_cid.store_path()));
}

#[test]
fn boot_diff_warns_about_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cids")).unwrap();

    let boot_payload = serde_json::to_string_pretty(&json!({
        "version": 6,
        "aliases": [
            { "name": "docs", "definition": "/docs -> /new-home", "enabled": true }
        ],
    }))
    .unwrap();
    let boot_cid = mirror_fixture(dir.path(), boot_payload.as_bytes());

    let (db, store, config) = booted_workspace(dir.path());
    db.upsert_alias("local", "docs", "/docs -> /old-home", true)
        .unwrap();

    let report = import_boot_cid(&db, &store, &config, &existing_routes(), boot_cid.as_str())
        .unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|warning| warning.contains("definition differs")));
    // The import still proceeds; the warning is informational.
    assert_eq!(db.user_aliases("local")[0].target_path, "/new-home");
}

#[test]
fn corrupted_mirror_is_a_consistency_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("cids")).unwrap();
    let honest = Cid::generate(b"honest bytes");
    std::fs::write(
        dir.path().join("cids").join(honest.as_str()),
        b"tampered bytes",
    )
    .unwrap();

    let config = Config::for_tests(dir.path());
    let store = CidStore::with_directory(&config.cid_directory);
    let err = load_cids_from_directory(&store, &config.user_id, false).unwrap_err();
    assert!(err.is_consistency_failure());
}
