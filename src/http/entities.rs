//! Entity CRUD over JSON: aliases, servers, variables, and secrets share
//! one request shape. Saves validate names against the built-in route
//! table, record an interaction row, and (for servers) refresh the
//! definition CID.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

use crate::{
    crypto::encrypt_secret_value,
    persistence::InteractionRequest,
};

use super::{json_error, AppContext};

/// Request body shared by every entity save endpoint.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EntityPayload {
    pub name: Option<String>,
    pub definition: Option<String>,
    pub enabled: Option<bool>,
    pub change_message: Option<String>,
}

#[derive(Debug, Serialize)]
struct AliasView {
    name: String,
    definition: String,
    enabled: bool,
    match_type: crate::alias::MatchType,
    match_pattern: String,
    target_path: String,
    ignore_case: bool,
}

impl From<crate::persistence::Alias> for AliasView {
    fn from(row: crate::persistence::Alias) -> Self {
        Self {
            name: row.name,
            definition: row.definition,
            enabled: row.enabled,
            match_type: row.match_type,
            match_pattern: row.match_pattern,
            target_path: row.target_path,
            ignore_case: row.ignore_case,
        }
    }
}

#[derive(Debug, Serialize)]
struct ServerView {
    name: String,
    definition: String,
    definition_cid: String,
    enabled: bool,
}

impl From<crate::persistence::Server> for ServerView {
    fn from(row: crate::persistence::Server) -> Self {
        Self {
            name: row.name,
            definition: row.definition,
            definition_cid: row.definition_cid,
            enabled: row.enabled,
        }
    }
}

fn record_save(ctx: &AppContext, entity_type: &str, name: &str, payload: &EntityPayload) {
    let _ = ctx.db.record_interaction(InteractionRequest {
        user_id: ctx.config.user_id.clone(),
        entity_type: entity_type.to_string(),
        entity_name: name.to_string(),
        action: "save".to_string(),
        message: payload.change_message.clone().unwrap_or_default(),
        content: String::new(),
    });
}

fn record_delete(ctx: &AppContext, entity_type: &str, name: &str) {
    let _ = ctx.db.record_interaction(InteractionRequest {
        user_id: ctx.config.user_id.clone(),
        entity_type: entity_type.to_string(),
        entity_name: name.to_string(),
        action: "delete".to_string(),
        message: String::new(),
        content: String::new(),
    });
}

fn required_name(payload: &EntityPayload) -> Result<String, Response> {
    match payload.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => Ok(name.to_string()),
        _ => Err(json_error(StatusCode::BAD_REQUEST, "A name is required.")),
    }
}

fn required_definition(payload: &EntityPayload) -> Result<String, Response> {
    match &payload.definition {
        Some(definition) => Ok(definition.clone()),
        None => Err(json_error(
            StatusCode::BAD_REQUEST,
            "A definition is required.",
        )),
    }
}

// ---- aliases ----

pub async fn list_aliases(State(ctx): State<Arc<AppContext>>) -> Response {
    let rows: Vec<AliasView> = ctx
        .db
        .user_aliases(&ctx.config.user_id)
        .into_iter()
        .map(AliasView::from)
        .collect();
    Json(rows).into_response()
}

pub async fn create_alias(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let name = match required_name(&payload) {
        Ok(name) => name,
        Err(response) => return response,
    };
    if ctx.builtin_routes.contains(&format!("/{name}")) {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("Alias name \"{name}\" conflicts with an existing route."),
        );
    }
    if ctx.db.alias_by_name(&ctx.config.user_id, &name).is_some() {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("An alias named \"{name}\" already exists."),
        );
    }
    let definition = match required_definition(&payload) {
        Ok(definition) => definition,
        Err(response) => return response,
    };
    match ctx.db.upsert_alias(
        &ctx.config.user_id,
        &name,
        &definition,
        payload.enabled.unwrap_or(true),
    ) {
        Ok(row) => {
            record_save(&ctx, "alias", &name, &payload);
            (StatusCode::CREATED, Json(AliasView::from(row))).into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn view_alias(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    match ctx.db.alias_by_name(&ctx.config.user_id, &name) {
        Some(row) => Json(AliasView::from(row)).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "No such alias."),
    }
}

pub async fn edit_alias(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let Some(existing) = ctx.db.alias_by_name(&ctx.config.user_id, &name) else {
        return json_error(StatusCode::NOT_FOUND, "No such alias.");
    };
    let definition = payload
        .definition
        .clone()
        .unwrap_or_else(|| existing.definition.clone());
    let enabled = payload.enabled.unwrap_or(existing.enabled);
    match ctx
        .db
        .upsert_alias(&ctx.config.user_id, &name, &definition, enabled)
    {
        Ok(row) => {
            record_save(&ctx, "alias", &name, &payload);
            Json(AliasView::from(row)).into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn delete_alias(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    match ctx.db.delete_alias(&ctx.config.user_id, &name) {
        Ok(true) => {
            record_delete(&ctx, "alias", &name);
            Json(json!({ "deleted": name })).into_response()
        }
        Ok(false) => json_error(StatusCode::NOT_FOUND, "No such alias."),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

// ---- servers ----

pub async fn list_servers(State(ctx): State<Arc<AppContext>>) -> Response {
    let rows: Vec<ServerView> = ctx
        .db
        .user_servers(&ctx.config.user_id)
        .into_iter()
        .map(ServerView::from)
        .collect();
    Json(rows).into_response()
}

pub async fn create_server(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let name = match required_name(&payload) {
        Ok(name) => name,
        Err(response) => return response,
    };
    if ctx.builtin_routes.contains(&format!("/{name}")) {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("Server name \"{name}\" conflicts with an existing route."),
        );
    }
    if ctx.db.server_by_name(&ctx.config.user_id, &name).is_some() {
        return json_error(
            StatusCode::BAD_REQUEST,
            &format!("A server named \"{name}\" already exists."),
        );
    }
    let definition = match required_definition(&payload) {
        Ok(definition) => definition,
        Err(response) => return response,
    };
    match ctx.db.upsert_server(
        &ctx.store,
        &ctx.config.user_id,
        &name,
        &definition,
        payload.enabled.unwrap_or(true),
    ) {
        Ok(row) => {
            record_save(&ctx, "server", &name, &payload);
            (StatusCode::CREATED, Json(ServerView::from(row))).into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn view_server(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    match ctx.db.server_by_name(&ctx.config.user_id, &name) {
        Some(row) => Json(ServerView::from(row)).into_response(),
        None => json_error(StatusCode::NOT_FOUND, "No such server."),
    }
}

pub async fn edit_server(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let Some(existing) = ctx.db.server_by_name(&ctx.config.user_id, &name) else {
        return json_error(StatusCode::NOT_FOUND, "No such server.");
    };
    let definition = payload
        .definition
        .clone()
        .unwrap_or_else(|| existing.definition.clone());
    let enabled = payload.enabled.unwrap_or(existing.enabled);
    match ctx.db.upsert_server(
        &ctx.store,
        &ctx.config.user_id,
        &name,
        &definition,
        enabled,
    ) {
        Ok(row) => {
            record_save(&ctx, "server", &name, &payload);
            Json(ServerView::from(row)).into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn delete_server(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    match ctx.db.delete_server(&ctx.config.user_id, &name) {
        Ok(true) => {
            record_delete(&ctx, "server", &name);
            Json(json!({ "deleted": name })).into_response()
        }
        Ok(false) => json_error(StatusCode::NOT_FOUND, "No such server."),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

pub async fn server_history(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let history = ctx.db.server_history(&ctx.config.user_id, &name);
    Json(
        history
            .into_iter()
            .map(|version| {
                json!({
                    "definition_cid": version.definition_cid,
                    "created_at": version.created_at.to_rfc3339(),
                })
            })
            .collect::<Vec<_>>(),
    )
    .into_response()
}

// ---- variables ----

pub async fn list_variables(State(ctx): State<Arc<AppContext>>) -> Response {
    let rows: Vec<serde_json::Value> = ctx
        .db
        .user_variables(&ctx.config.user_id)
        .into_iter()
        .map(|row| {
            json!({
                "name": row.name,
                "definition": row.definition,
                "enabled": row.enabled,
            })
        })
        .collect();
    Json(rows).into_response()
}

pub async fn save_variable(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let name = match required_name(&payload) {
        Ok(name) => name,
        Err(response) => return response,
    };
    let definition = match required_definition(&payload) {
        Ok(definition) => definition,
        Err(response) => return response,
    };
    match ctx.db.upsert_variable(
        &ctx.config.user_id,
        &name,
        &definition,
        payload.enabled.unwrap_or(true),
    ) {
        Ok(row) => {
            record_save(&ctx, "variable", &name, &payload);
            Json(json!({
                "name": row.name,
                "definition": row.definition,
                "enabled": row.enabled,
            }))
            .into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn view_variable(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    match ctx.db.variable_by_name(&ctx.config.user_id, &name) {
        Some(row) => Json(json!({
            "name": row.name,
            "definition": row.definition,
            "enabled": row.enabled,
        }))
        .into_response(),
        None => json_error(StatusCode::NOT_FOUND, "No such variable."),
    }
}

pub async fn delete_variable(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    match ctx.db.delete_variable(&ctx.config.user_id, &name) {
        Ok(true) => {
            record_delete(&ctx, "variable", &name);
            Json(json!({ "deleted": name })).into_response()
        }
        Ok(false) => json_error(StatusCode::NOT_FOUND, "No such variable."),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

// ---- secrets ----

pub async fn list_secrets(State(ctx): State<Arc<AppContext>>) -> Response {
    let rows: Vec<serde_json::Value> = ctx
        .db
        .user_secrets(&ctx.config.user_id)
        .into_iter()
        .map(|row| json!({ "name": row.name, "enabled": row.enabled }))
        .collect();
    Json(rows).into_response()
}

pub async fn save_secret(
    State(ctx): State<Arc<AppContext>>,
    Json(payload): Json<EntityPayload>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    let name = match required_name(&payload) {
        Ok(name) => name,
        Err(response) => return response,
    };
    let definition = match required_definition(&payload) {
        Ok(definition) => definition,
        Err(response) => return response,
    };
    let sealed = encrypt_secret_value(&definition, &ctx.config.boot_secret_key);
    match ctx.db.upsert_secret(
        &ctx.config.user_id,
        &name,
        &sealed,
        payload.enabled.unwrap_or(true),
    ) {
        Ok(row) => {
            record_save(&ctx, "secret", &name, &payload);
            Json(json!({ "name": row.name, "enabled": row.enabled })).into_response()
        }
        Err(err) => json_error(StatusCode::BAD_REQUEST, &err.to_string()),
    }
}

pub async fn delete_secret(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    let _guard = ctx.boot_lock.read();
    match ctx.db.delete_secret(&ctx.config.user_id, &name) {
        Ok(true) => {
            record_delete(&ctx, "secret", &name);
            Json(json!({ "deleted": name })).into_response()
        }
        Ok(false) => json_error(StatusCode::NOT_FOUND, "No such secret."),
        Err(err) => json_error(StatusCode::INTERNAL_SERVER_ERROR, &err.to_string()),
    }
}

fn history_response(ctx: &AppContext, entity_type: &str, name: &str) -> Response {
    let rows: Vec<serde_json::Value> = ctx
        .db
        .interactions_for(&ctx.config.user_id, entity_type, name)
        .into_iter()
        .map(|row| {
            json!({
                "action": row.action,
                "message": row.message,
                "content": row.content,
                "created_at": row.created_at.to_rfc3339(),
            })
        })
        .collect();
    Json(rows).into_response()
}

pub async fn alias_history(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    history_response(&ctx, "alias", &name)
}

pub async fn variable_history(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    history_response(&ctx, "variable", &name)
}

pub async fn secret_history(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    history_response(&ctx, "secret", &name)
}

pub async fn server_interactions(
    State(ctx): State<Arc<AppContext>>,
    Path(name): Path<String>,
) -> Response {
    history_response(&ctx, "server", &name)
}
