//! Export and import endpoints.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::{
    export::{build_export_payload, ExportSelection},
    import::{parse_import_payload, process_import, ImportSelection},
};

use super::{json_error, AppContext};

/// Request body for POST /export and POST /export/size.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExportRequest {
    pub include_aliases: bool,
    pub include_servers: bool,
    pub include_variables: bool,
    pub include_secrets: bool,
    pub include_history: bool,
    pub include_source: bool,
    pub include_cid_map: bool,
    pub include_unreferenced_cid_data: bool,
    pub include_disabled: bool,
    pub selected_aliases: Option<Vec<String>>,
    pub selected_servers: Option<Vec<String>>,
    pub selected_variables: Option<Vec<String>>,
    pub selected_secrets: Option<Vec<String>>,
    pub secret_key: String,
}

impl Default for ExportRequest {
    fn default() -> Self {
        Self {
            include_aliases: true,
            include_servers: true,
            include_variables: true,
            include_secrets: false,
            include_history: false,
            include_source: false,
            include_cid_map: true,
            include_unreferenced_cid_data: false,
            include_disabled: true,
            selected_aliases: None,
            selected_servers: None,
            selected_variables: None,
            selected_secrets: None,
            secret_key: String::new(),
        }
    }
}

fn to_name_set(names: Option<Vec<String>>) -> Option<BTreeSet<String>> {
    names.map(|list| list.into_iter().collect())
}

impl From<ExportRequest> for ExportSelection {
    fn from(request: ExportRequest) -> Self {
        Self {
            include_aliases: request.include_aliases,
            include_servers: request.include_servers,
            include_variables: request.include_variables,
            include_secrets: request.include_secrets,
            include_history: request.include_history,
            include_source: request.include_source,
            include_cid_map: request.include_cid_map,
            include_unreferenced_cid_data: request.include_unreferenced_cid_data,
            include_disabled_aliases: request.include_disabled,
            include_disabled_servers: request.include_disabled,
            include_disabled_variables: request.include_disabled,
            include_disabled_secrets: request.include_disabled,
            selected_aliases: to_name_set(request.selected_aliases),
            selected_servers: to_name_set(request.selected_servers),
            selected_variables: to_name_set(request.selected_variables),
            selected_secrets: to_name_set(request.selected_secrets),
            secret_key: request.secret_key.trim().to_string(),
        }
    }
}

/// GET /export: the available toggles and their defaults.
pub async fn export_options() -> Response {
    Json(json!({
        "defaults": {
            "include_aliases": true,
            "include_servers": true,
            "include_variables": true,
            "include_secrets": false,
            "include_history": false,
            "include_source": false,
            "include_cid_map": true,
            "include_unreferenced_cid_data": false,
            "include_disabled": true,
        },
        "notes": "POST this shape to /export; POST to /export/size for a dry-run byte count.",
    }))
    .into_response()
}

/// POST /export: build and record a snapshot.
pub async fn export(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let selection = ExportSelection::from(request);
    match build_export_payload(&ctx.db, &ctx.store, &ctx.config, &selection, true) {
        Ok(result) => {
            if let Err(err) = ctx.db.record_export(&ctx.config.user_id, &result.cid_value) {
                return json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string());
            }
            Json(json!({
                "cid_value": result.cid_value,
                "download_path": result.download_path,
                "generated_at": Utc::now().to_rfc3339(),
            }))
            .into_response()
        }
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

/// POST /export/size: full assembly without writes; returns byte length.
pub async fn export_size(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ExportRequest>,
) -> Response {
    let selection = ExportSelection::from(request);
    match build_export_payload(&ctx.db, &ctx.store, &ctx.config, &selection, false) {
        Ok(result) => Json(json!({
            "size_bytes": result.json_payload.len(),
            "cid_value": result.cid_value,
        }))
        .into_response(),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

/// Request body for POST /import: exactly one payload source.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ImportRequest {
    /// Inline payload text
    pub text: Option<String>,
    /// CID of a payload already in the store
    pub cid: Option<String>,
    /// URL serving the payload
    pub url: Option<String>,
    pub include_aliases: bool,
    pub include_servers: bool,
    pub include_variables: bool,
    pub include_secrets: bool,
    pub include_history: bool,
    pub process_cid_map: bool,
    pub secret_key: String,
    pub change_message: String,
}

impl Default for ImportRequest {
    fn default() -> Self {
        Self {
            text: None,
            cid: None,
            url: None,
            include_aliases: true,
            include_servers: true,
            include_variables: true,
            include_secrets: true,
            include_history: true,
            process_cid_map: true,
            secret_key: String::new(),
            change_message: String::new(),
        }
    }
}

/// GET /import: usage notes.
pub async fn import_options() -> Response {
    Json(json!({
        "sources": ["text", "cid", "url"],
        "notes": "POST a payload source plus section toggles; the response reports per-section results.",
    }))
    .into_response()
}

async fn resolve_payload_text(
    ctx: &AppContext,
    request: &ImportRequest,
) -> Result<String, Response> {
    match (&request.text, &request.cid, &request.url) {
        (Some(text), None, None) => Ok(text.clone()),
        (None, Some(cid), None) => {
            let normalized = crate::cid::format_cid(cid);
            let normalized = normalized.split('.').next().unwrap_or_default().to_string();
            if !crate::cid::is_normalized_cid(&normalized) {
                return Err(json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("Invalid CID format: {cid}"),
                ));
            }
            let Some(bytes) = ctx.store.get(&normalized) else {
                return Err(json_error(StatusCode::NOT_FOUND, "CID not found"));
            };
            String::from_utf8(bytes).map_err(|_| {
                json_error(StatusCode::BAD_REQUEST, "CID content is not UTF-8 text.")
            })
        }
        (None, None, Some(raw_url)) => {
            let parsed = url::Url::parse(raw_url).map_err(|err| {
                json_error(StatusCode::BAD_REQUEST, &format!("Invalid URL: {err}"))
            })?;
            let client = reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(
                    ctx.config.outbound_timeout_secs,
                ))
                .build()
                .map_err(|err| {
                    json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string())
                })?;
            let response = client.get(parsed).send().await.map_err(|err| {
                json_error(StatusCode::BAD_REQUEST, &format!("URL fetch failed: {err}"))
            })?;
            response.text().await.map_err(|err| {
                json_error(StatusCode::BAD_REQUEST, &format!("URL fetch failed: {err}"))
            })
        }
        _ => Err(json_error(
            StatusCode::BAD_REQUEST,
            "Provide exactly one of \"text\", \"cid\", or \"url\".",
        )),
    }
}

/// POST /import: apply a snapshot payload.
pub async fn import(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<ImportRequest>,
) -> Response {
    let raw = match resolve_payload_text(&ctx, &request).await {
        Ok(raw) => raw,
        Err(response) => return response,
    };
    let payload = match parse_import_payload(&raw) {
        Ok(payload) => payload,
        Err(message) => return json_error(StatusCode::BAD_REQUEST, &message),
    };

    let selection = ImportSelection {
        include_aliases: request.include_aliases,
        include_servers: request.include_servers,
        include_variables: request.include_variables,
        include_secrets: request.include_secrets,
        include_history: request.include_history,
        process_cid_map: request.process_cid_map,
        secret_key: request.secret_key.trim().to_string(),
    };

    let _guard = ctx.boot_lock.read();
    let report = process_import(
        &ctx.db,
        &ctx.store,
        &ctx.config,
        &selection,
        &payload,
        &ctx.builtin_routes,
        &request.change_message,
    );

    Json(json!({
        "errors": report.errors,
        "warnings": report.warnings,
        "summaries": report.summaries,
        "imported_names": report.imported_names,
        "snapshot": report.snapshot.as_ref().map(|snapshot| json!({
            "cid_value": snapshot.cid_value,
            "download_path": snapshot.download_path,
        })),
    }))
    .into_response()
}
