//! The HTTP service: built-in routes plus the fallback that drives the
//! content-addressed request pipeline.

mod entities;
mod explorer;
mod import_export;
mod mime;
mod serve_cid;
mod uploads;

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use parking_lot::RwLock;
use serde_json::json;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::{
    config::Config,
    persistence::Database,
    routing::{normalize_request_path, resolve_step, StepOutcome},
    server::{Executor, RequestDetails, ServerResponse},
    store::CidStore,
};

pub use mime::{extension_for_mime, mime_type_for_extension};
pub use serve_cid::{looks_like_markdown, render_markdown_document, serve_cid_content};

/// Paths claimed by built-in routes; aliases and servers may not shadow
/// them, and the router's step 1 consults this set.
pub fn existing_routes() -> BTreeSet<String> {
    [
        "/",
        "/aliases",
        "/servers",
        "/variables",
        "/secrets",
        "/upload",
        "/export",
        "/import",
        "/openapi",
        "/openapi.json",
        "/routes",
        "/invocations",
    ]
    .into_iter()
    .map(str::to_string)
    .collect()
}

/// Shared service state.
#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub db: Database,
    pub store: CidStore,
    /// Held for write by the boot importer; mutating handlers take read
    pub boot_lock: RwLock<()>,
    pub builtin_routes: BTreeSet<String>,
}

impl AppContext {
    pub fn new(config: Config, db: Database, store: CidStore) -> Self {
        Self {
            config,
            db,
            store,
            boot_lock: RwLock::new(()),
            builtin_routes: existing_routes(),
        }
    }

    /// The executor bound to this context.
    pub fn executor(&self) -> Executor<'_> {
        Executor::new(&self.db, &self.store, &self.config)
    }
}

/// A 302 FOUND redirect.
pub fn found_redirect(location: &str) -> Response {
    (
        StatusCode::FOUND,
        [(header::LOCATION, location.to_string())],
    )
        .into_response()
}

/// A JSON error body with the given status.
pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

fn decode_pairs(raw: &str) -> BTreeMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect()
}

fn build_request_details(
    method: &Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: &[u8],
) -> RequestDetails {
    let query_string = uri.query().unwrap_or_default().to_string();

    let mut header_map = BTreeMap::new();
    for (name, value) in headers {
        if name.as_str().eq_ignore_ascii_case("cookie") {
            continue;
        }
        if let Ok(value) = value.to_str() {
            header_map.insert(name.as_str().to_string(), value.to_string());
        }
    }

    let form_data = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .filter(|value| value.starts_with("application/x-www-form-urlencoded"))
        .map(|_| decode_pairs(&String::from_utf8_lossy(body)))
        .unwrap_or_default();

    RequestDetails {
        path: uri.path().to_string(),
        method: method.as_str().to_string(),
        args: decode_pairs(&query_string),
        query_string,
        scheme: uri.scheme_str().unwrap_or("http").to_string(),
        host: headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        remote_addr: String::new(),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string(),
        headers: header_map,
        form_data,
    }
}

fn dispatch_server_response(response: ServerResponse) -> Response {
    match response {
        ServerResponse::Redirect { location, .. } => found_redirect(&location),
        ServerResponse::Failure { body } => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            body,
        )
            .into_response(),
    }
}

/// The fallback: everything the built-in routes did not claim flows
/// through alias → server → versioned server → CID → 404.
async fn pipeline_fallback(
    State(ctx): State<Arc<AppContext>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let normalized = normalize_request_path(uri.path());
    let request = build_request_details(&method, &uri, &headers, &body);

    match resolve_step(
        &ctx.db,
        &ctx.store,
        &ctx.config,
        &ctx.builtin_routes,
        &normalized,
    ) {
        StepOutcome::Builtin { .. } => {
            // Only reachable when normalization changed the path; send the
            // client back through the real route.
            if normalized != uri.path() {
                found_redirect(&normalized)
            } else {
                json_error(StatusCode::NOT_FOUND, "Not found")
            }
        }
        StepOutcome::Alias(resolved) => found_redirect(&resolved.target),
        StepOutcome::Server {
            server,
            args,
            source,
        } => {
            let response = ctx
                .executor()
                .execute_server(&server, &request, &args, source)
                .await;
            dispatch_server_response(response)
        }
        StepOutcome::Versioned {
            server,
            definition_cid,
            ..
        } => {
            let Some(bytes) = ctx.store.get(&definition_cid) else {
                return json_error(StatusCode::NOT_FOUND, "CID not found");
            };
            let Ok(definition_text) = String::from_utf8(bytes) else {
                return json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Historical definition is not UTF-8 text.",
                );
            };
            let response = ctx
                .executor()
                .execute_definition(&server.name, &definition_text, &request, &[], None)
                .await;
            dispatch_server_response(response)
        }
        StepOutcome::VersionedAmbiguous {
            server_name,
            partial,
            matches,
        } => (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": "Multiple matching server versions",
                "server": server_name,
                "partial": partial,
                "matches": matches,
            })),
        )
            .into_response(),
        StepOutcome::VersionedMiss { .. } => json_error(StatusCode::NOT_FOUND, "Not found"),
        StepOutcome::Cid { cid, extension } => {
            serve_cid_content(&ctx.store, &cid, extension.as_deref(), &headers)
        }
        StepOutcome::NotFound => {
            // A path shaped like a CID gets the specific diagnostic.
            let cid_shaped = crate::cid::split_cid_path(&normalized)
                .map(|(cid, _)| crate::cid::is_normalized_cid(&cid))
                .unwrap_or(false);
            if cid_shaped {
                json_error(StatusCode::NOT_FOUND, "CID not found")
            } else {
                json_error(StatusCode::NOT_FOUND, "Not found")
            }
        }
    }
}

/// Build the service router.
pub fn build_router(ctx: Arc<AppContext>) -> Router {
    let body_limit = ctx.config.body_limit;
    Router::new()
        .route("/", get(explorer::dashboard))
        .route("/openapi.json", get(explorer::openapi_json))
        .route("/openapi", get(explorer::openapi_page))
        .route("/invocations", get(explorer::invocations))
        .route("/routes", get(explorer::route_details_root))
        .route("/routes/*requested_path", get(explorer::route_details))
        // aliases
        .route("/aliases", get(entities::list_aliases))
        .route("/aliases/new", post(entities::create_alias))
        .route("/aliases/:name", get(entities::view_alias))
        .route("/aliases/:name/edit", post(entities::edit_alias))
        .route("/aliases/:name/delete", post(entities::delete_alias))
        .route("/aliases/:name/history", get(entities::alias_history))
        // servers
        .route("/servers", get(entities::list_servers))
        .route("/servers/new", post(entities::create_server))
        .route("/servers/:name", get(entities::view_server))
        .route("/servers/:name/edit", post(entities::edit_server))
        .route("/servers/:name/delete", post(entities::delete_server))
        .route("/servers/:name/history", get(entities::server_history))
        .route(
            "/servers/:name/interactions",
            get(entities::server_interactions),
        )
        // variables
        .route("/variables", get(entities::list_variables))
        .route("/variables/new", post(entities::save_variable))
        .route("/variables/:name", get(entities::view_variable))
        .route("/variables/:name/delete", post(entities::delete_variable))
        .route("/variables/:name/history", get(entities::variable_history))
        // secrets
        .route("/secrets", get(entities::list_secrets))
        .route("/secrets/new", post(entities::save_secret))
        .route("/secrets/:name/delete", post(entities::delete_secret))
        .route("/secrets/:name/history", get(entities::secret_history))
        // uploads
        .route("/upload", post(uploads::upload))
        .route("/upload/success/:cid", get(uploads::upload_success))
        // import/export
        .route(
            "/export",
            get(import_export::export_options).post(import_export::export),
        )
        .route("/export/size", post(import_export::export_size))
        .route(
            "/import",
            get(import_export::import_options).post(import_export::import),
        )
        .fallback(pipeline_fallback)
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(ctx)
}

/// Bind and serve until shutdown.
pub async fn serve(ctx: Arc<AppContext>, addr: &str) -> Result<(), std::io::Error> {
    let app = build_router(ctx);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app.into_make_service()).await
}
