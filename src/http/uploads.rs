//! Uploads: file bytes, inline text, or a URL to fetch. Every variant
//! lands in the CID store and answers with a redirect to the success page
//! for the produced CID.

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

use crate::cid::cid_path;

use super::{found_redirect, json_error, AppContext};

/// JSON upload body: exactly one of `text` or `url`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadPayload {
    pub text: Option<String>,
    pub url: Option<String>,
    pub filename: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct UploadQuery {
    pub filename: Option<String>,
}

fn extension_from_filename(filename: Option<&str>) -> Option<String> {
    let filename = filename?;
    let (_, extension) = filename.rsplit_once('.')?;
    if extension.is_empty() {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

async fn fetch_url(ctx: &AppContext, raw_url: &str) -> Result<Vec<u8>, Response> {
    let parsed = url::Url::parse(raw_url)
        .map_err(|err| json_error(StatusCode::BAD_REQUEST, &format!("Invalid URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            "Invalid URL: only http and https are supported.",
        ));
    }

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(ctx.config.outbound_timeout_secs))
        .build()
        .map_err(|err| json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()))?;
    let response = client.get(parsed).send().await.map_err(|err| {
        json_error(StatusCode::BAD_REQUEST, &format!("URL fetch failed: {err}"))
    })?;
    if !response.status().is_success() {
        return Err(json_error(
            StatusCode::BAD_REQUEST,
            &format!("URL fetch returned status {}", response.status()),
        ));
    }
    let bytes = response.bytes().await.map_err(|err| {
        json_error(StatusCode::BAD_REQUEST, &format!("URL fetch failed: {err}"))
    })?;
    Ok(bytes.to_vec())
}

/// POST /upload: accept file bytes, text, or a URL; store as a CID and
/// redirect to the success page.
#[axum::debug_handler]
pub async fn upload(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<UploadQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let is_json = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.starts_with("application/json"))
        .unwrap_or(false);

    let mut filename = query.filename.clone();
    let content: Vec<u8> = if is_json {
        let payload: UploadPayload = match serde_json::from_slice(&body) {
            Ok(payload) => payload,
            Err(err) => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    &format!("Upload body is not valid JSON: {err}"),
                )
            }
        };
        if payload.filename.is_some() {
            filename = payload.filename.clone();
        }
        match (payload.text, payload.url) {
            (Some(text), None) => text.into_bytes(),
            (None, Some(raw_url)) => match fetch_url(&ctx, &raw_url).await {
                Ok(bytes) => bytes,
                Err(response) => return response,
            },
            _ => {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "Provide exactly one of \"text\" or \"url\".",
                )
            }
        }
    } else {
        if body.is_empty() {
            return json_error(StatusCode::BAD_REQUEST, "Upload body is empty.");
        }
        body.to_vec()
    };

    let cid = match ctx.store.put(&content, &ctx.config.user_id) {
        Ok(cid) => cid,
        Err(err) => return json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    };

    let mut location = format!("/upload/success/{}", cid.as_str());
    if let Some(extension) = extension_from_filename(filename.as_deref()) {
        location.push_str(&format!("?ext={extension}"));
    }
    found_redirect(&location)
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SuccessQuery {
    pub ext: Option<String>,
}

/// GET /upload/success/{cid}: the page an upload redirects to.
pub async fn upload_success(
    State(ctx): State<Arc<AppContext>>,
    Path(cid): Path<String>,
    Query(query): Query<SuccessQuery>,
) -> Response {
    if !ctx.store.exists(&cid) {
        return json_error(StatusCode::NOT_FOUND, "CID not found");
    }
    let path = cid_path(&cid, query.ext.as_deref()).unwrap_or_default();
    let size = ctx
        .store
        .get_by_path(&format!("/{cid}"))
        .map(|record| record.file_size)
        .unwrap_or_default();
    Json(json!({
        "cid": cid,
        "path": path,
        "size": size,
    }))
    .into_response()
}
