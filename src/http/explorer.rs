//! Introspection endpoints: the dashboard, the route-chain explorer, the
//! invocation listing, and the OpenAPI stub.

use axum::{
    extract::{Path, State},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;

use crate::routing::describe_request_path;

use super::AppContext;

/// GET /: workspace overview.
pub async fn dashboard(State(ctx): State<Arc<AppContext>>) -> Response {
    let user_id = &ctx.config.user_id;
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "counts": {
            "aliases": ctx.db.user_aliases(user_id).len(),
            "servers": ctx.db.user_servers(user_id).len(),
            "variables": ctx.db.user_variables(user_id).len(),
            "secrets": ctx.db.user_secrets(user_id).len(),
            "cids": ctx.store.len(),
            "invocations": ctx.db.user_invocations(user_id).len(),
            "exports": ctx.db.user_exports(user_id).len(),
        },
    }))
    .into_response()
}

/// GET /routes/{path}: structured resolution chain for a path.
pub async fn route_details(
    State(ctx): State<Arc<AppContext>>,
    Path(requested_path): Path<String>,
) -> Response {
    let resolution = describe_request_path(
        &ctx.db,
        &ctx.store,
        &ctx.config,
        &ctx.builtin_routes,
        &requested_path,
    );
    Json(resolution).into_response()
}

/// GET /routes/: chain for the root path.
pub async fn route_details_root(State(ctx): State<Arc<AppContext>>) -> Response {
    let resolution = describe_request_path(
        &ctx.db,
        &ctx.store,
        &ctx.config,
        &ctx.builtin_routes,
        "/",
    );
    Json(resolution).into_response()
}

/// GET /invocations: append-only invocation rows, newest first.
pub async fn invocations(State(ctx): State<Arc<AppContext>>) -> Response {
    let rows: Vec<serde_json::Value> = ctx
        .db
        .user_invocations(&ctx.config.user_id)
        .into_iter()
        .map(|row| {
            json!({
                "server_name": row.server_name,
                "result_cid": row.result_cid,
                "servers_cid": row.servers_cid,
                "variables_cid": row.variables_cid,
                "secrets_cid": row.secrets_cid,
                "request_details_cid": row.request_details_cid,
                "invocation_cid": row.invocation_cid,
                "invoked_at": row.invoked_at.to_rfc3339(),
            })
        })
        .collect();
    Json(rows).into_response()
}

/// GET /openapi.json: machine-readable route listing.
pub async fn openapi_json(State(ctx): State<Arc<AppContext>>) -> Response {
    let mut paths = serde_json::Map::new();
    for route in &ctx.builtin_routes {
        paths.insert(
            route.clone(),
            json!({ "get": { "responses": { "200": { "description": "OK" } } } }),
        );
    }
    paths.insert(
        "/{cid}".to_string(),
        json!({
            "get": {
                "description": "Serve stored CID content; extension selects the MIME type.",
                "responses": {
                    "200": { "description": "Stored bytes" },
                    "404": { "description": "CID not found" }
                }
            }
        }),
    );

    Json(json!({
        "openapi": "3.0.0",
        "info": {
            "title": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
        },
        "paths": paths,
    }))
    .into_response()
}

/// GET /openapi: human entry point for the schema.
pub async fn openapi_page() -> Response {
    Html(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>API</title></head>\n\
         <body>\n<h1>API</h1>\n<p>The machine-readable schema lives at \
         <a href=\"/openapi.json\">/openapi.json</a>.</p>\n</body>\n</html>\n",
    )
    .into_response()
}
