//! Export determinism and the export → import → export round trip.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{body_json, get, post_json, workspace};

fn seeded_request() -> serde_json::Value {
    json!({
        "include_aliases": true,
        "include_servers": true,
        "include_variables": true,
        "include_secrets": true,
        "include_history": false,
        "include_cid_map": true,
        "include_disabled": true,
        "secret_key": "export-key",
    })
}

async fn seed(ctx: &std::sync::Arc<cidspace::http::AppContext>) {
    post_json(
        ctx,
        "/aliases/new",
        &json!({ "name": "docs", "definition": "/docs -> /readme" }),
    )
    .await;
    post_json(
        ctx,
        "/servers/new",
        &json!({
            "name": "echo",
            "definition": "transform: template\ncontent-type: text/plain\n---\n{{request.path}}",
        }),
    )
    .await;
    post_json(
        ctx,
        "/variables/new",
        &json!({ "name": "region", "definition": "eu-west" }),
    )
    .await;
}

#[tokio::test]
async fn exporting_twice_is_bit_identical() {
    let (ctx, _dir) = workspace();
    seed(&ctx).await;

    let first = body_json(post_json(&ctx, "/export", &seeded_request()).await).await;
    let second = body_json(post_json(&ctx, "/export", &seeded_request()).await).await;
    assert_eq!(first["cid_value"], second["cid_value"]);
}

#[tokio::test]
async fn size_probe_reports_without_storing() {
    let (ctx, _dir) = workspace();
    seed(&ctx).await;

    let rows_before = ctx.store.len();
    let probe = body_json(post_json(&ctx, "/export/size", &seeded_request()).await).await;
    assert!(probe["size_bytes"].as_u64().unwrap() > 0);
    assert_eq!(ctx.store.len(), rows_before);

    // The probe's would-be CID matches the real export.
    let real = body_json(post_json(&ctx, "/export", &seeded_request()).await).await;
    assert_eq!(probe["cid_value"], real["cid_value"]);
}

#[tokio::test]
async fn export_import_export_round_trips_to_the_same_cid() {
    let (source, _source_dir) = workspace();
    seed(&source).await;

    let exported = body_json(post_json(&source, "/export", &seeded_request()).await).await;
    let export_cid = exported["cid_value"].as_str().unwrap().to_string();

    // The payload is served at /{cid}.json.
    let payload_response = get(&source, &format!("/{export_cid}.json")).await;
    assert_eq!(payload_response.status(), StatusCode::OK);
    let payload_text =
        String::from_utf8(common::body_bytes(payload_response).await).unwrap();

    // Import into an empty workspace.
    let (target, _target_dir) = workspace();
    let report = body_json(
        post_json(
            &target,
            "/import",
            &json!({
                "text": payload_text,
                "secret_key": "export-key",
            }),
        )
        .await,
    )
    .await;
    assert!(
        report["errors"].as_array().unwrap().is_empty(),
        "import errors: {:?}",
        report["errors"]
    );

    // Entities arrived intact.
    let aliases = body_json(get(&target, "/aliases").await).await;
    assert_eq!(aliases[0]["name"], "docs");
    let servers = body_json(get(&target, "/servers").await).await;
    assert_eq!(servers[0]["name"], "echo");

    // Re-exporting reproduces the identical CID.
    let re_exported =
        body_json(post_json(&target, "/export", &seeded_request()).await).await;
    assert_eq!(re_exported["cid_value"].as_str().unwrap(), export_cid);
}

#[tokio::test]
async fn import_records_a_snapshot_export() {
    let (source, _source_dir) = workspace();
    seed(&source).await;
    let exported = body_json(post_json(&source, "/export", &seeded_request()).await).await;
    let export_cid = exported["cid_value"].as_str().unwrap().to_string();
    let payload_text = String::from_utf8(
        common::body_bytes(get(&source, &format!("/{export_cid}.json")).await).await,
    )
    .unwrap();

    let (target, _target_dir) = workspace();
    let report = body_json(
        post_json(
            &target,
            "/import",
            &json!({ "text": payload_text, "secret_key": "export-key" }),
        )
        .await,
    )
    .await;
    let snapshot_cid = report["snapshot"]["cid_value"].as_str().unwrap();
    assert!(target.store.exists(snapshot_cid));
}

#[tokio::test]
async fn malformed_import_payload_is_a_400_with_no_mutation() {
    let (ctx, _dir) = workspace();
    let response = post_json(&ctx, "/import", &json!({ "text": "{not json" })).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let aliases = body_json(get(&ctx, "/aliases").await).await;
    assert!(aliases.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn secrets_round_trip_through_export_and_import() {
    let (source, _source_dir) = workspace();
    post_json(
        &source,
        "/secrets/new",
        &json!({ "name": "api_token", "definition": "tok-123" }),
    )
    .await;

    let exported = body_json(post_json(&source, "/export", &seeded_request()).await).await;
    let export_cid = exported["cid_value"].as_str().unwrap().to_string();
    let payload_text = String::from_utf8(
        common::body_bytes(get(&source, &format!("/{export_cid}.json")).await).await,
    )
    .unwrap();

    let (target, _target_dir) = workspace();
    let report = body_json(
        post_json(
            &target,
            "/import",
            &json!({ "text": payload_text, "secret_key": "export-key" }),
        )
        .await,
    )
    .await;
    assert!(report["errors"].as_array().unwrap().is_empty());

    // The secret landed and unseals inside server execution.
    post_json(
        &target,
        "/servers/new",
        &json!({
            "name": "show",
            "definition": "transform: template\ncontent-type: text/plain\n---\n{{secret.api_token}}",
        }),
    )
    .await;
    let response = get(&target, "/show").await;
    assert_eq!(response.status(), StatusCode::FOUND);
    let fetched = get(&target, &common::location(&response)).await;
    assert_eq!(common::body_bytes(fetched).await, b"tok-123");
}

#[tokio::test]
async fn wrong_import_key_fails_secrets_section_only() {
    let (source, _source_dir) = workspace();
    post_json(
        &source,
        "/secrets/new",
        &json!({ "name": "api_token", "definition": "tok-123" }),
    )
    .await;
    post_json(
        &source,
        "/variables/new",
        &json!({ "name": "region", "definition": "eu-west" }),
    )
    .await;

    let exported = body_json(post_json(&source, "/export", &seeded_request()).await).await;
    let export_cid = exported["cid_value"].as_str().unwrap().to_string();
    let payload_text = String::from_utf8(
        common::body_bytes(get(&source, &format!("/{export_cid}.json")).await).await,
    )
    .unwrap();

    let (target, _target_dir) = workspace();
    let report = body_json(
        post_json(
            &target,
            "/import",
            &json!({ "text": payload_text, "secret_key": "wrong-key" }),
        )
        .await,
    )
    .await;
    assert!(report["errors"]
        .as_array()
        .unwrap()
        .iter()
        .any(|err| err == "Invalid decryption key for secrets"));

    let secrets = body_json(get(&target, "/secrets").await).await;
    assert!(secrets.as_array().unwrap().is_empty());
    let variables = body_json(get(&target, "/variables").await).await;
    assert_eq!(variables.as_array().unwrap().len(), 1);
}
