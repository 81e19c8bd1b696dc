//! Shared fixtures for the integration suite.

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use http_body_util::BodyExt;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use cidspace::{
    config::Config, http::AppContext, persistence::Database, store::CidStore,
};

/// A workspace rooted in a temp directory, with an empty mirror directory.
pub fn workspace() -> (Arc<AppContext>, TempDir) {
    let dir = tempfile::tempdir().expect("temp dir");
    std::fs::create_dir_all(dir.path().join("cids")).expect("cids dir");
    let config = Config::for_tests(dir.path());
    let db = Database::in_memory();
    let store = CidStore::with_directory(&config.cid_directory);
    (Arc::new(AppContext::new(config, db, store)), dir)
}

/// Drive one request through a fresh copy of the router.
pub async fn request(ctx: &Arc<AppContext>, request: Request<Body>) -> Response<Body> {
    let app: Router = cidspace::http::build_router(Arc::clone(ctx));
    app.oneshot(request).await.expect("infallible service")
}

pub async fn get(ctx: &Arc<AppContext>, uri: &str) -> Response<Body> {
    request(
        ctx,
        Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request"),
    )
    .await
}

pub async fn post_json(
    ctx: &Arc<AppContext>,
    uri: &str,
    payload: &serde_json::Value,
) -> Response<Body> {
    request(
        ctx,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_vec(payload).expect("body")))
            .expect("request"),
    )
    .await
}

/// Collect a response body as bytes.
pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("body")
        .to_bytes()
        .to_vec()
}

/// Collect a response body as parsed JSON.
pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).expect("json body")
}

pub fn location(response: &Response<Body>) -> String {
    response
        .headers()
        .get("location")
        .and_then(|value| value.to_str().ok())
        .expect("location header")
        .to_string()
}
