//! The server executor.
//!
//! A server is a named declarative transform. Execution materializes the
//! user's context once, resolves the chained data source when the path
//! carries one, runs the transform, stores the output bytes as a CID,
//! records the invocation lineage, and answers with a redirect to the
//! result CID. User-level failures never touch the entity tables; they
//! surface as a 500 diagnostic assembled from the failure, the definition
//! text, and the argument payload.

mod definition;
mod invocation;
mod transform;

use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::warn;

use crate::{
    config::Config,
    crypto::decrypt_secret_value,
    http::extension_for_mime,
    persistence::{Database, Server},
    store::CidStore,
};

pub use definition::{parse_server_definition, DefinitionError, ServerDefinition, TransformKind};
pub use invocation::{
    current_secret_definitions_cid, current_server_definitions_cid,
    current_variable_definitions_cid, record_invocation,
};
pub use transform::{expand_placeholders, run_transform, DEFAULT_CONTENT_TYPE};

/// Request details handed to server execution and recorded as a CID.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RequestDetails {
    pub path: String,
    pub method: String,
    pub query_string: String,
    pub scheme: String,
    pub host: String,
    pub remote_addr: String,
    pub user_agent: String,
    /// Request headers, cookies removed
    pub headers: BTreeMap<String, String>,
    /// Decoded form body, when the request carried one
    pub form_data: BTreeMap<String, String>,
    /// Decoded query arguments
    pub args: BTreeMap<String, String>,
}

impl RequestDetails {
    /// A minimal GET request for the given path.
    pub fn for_path(path: &str) -> Self {
        Self {
            path: path.to_string(),
            method: "GET".to_string(),
            scheme: "http".to_string(),
            ..Self::default()
        }
    }
}

/// Context injected into server execution, materialized once per request.
#[derive(Debug, Clone, Default)]
pub struct ExecutionContext {
    pub variables: BTreeMap<String, String>,
    pub secrets: BTreeMap<String, String>,
    pub servers: BTreeMap<String, String>,
}

/// Successful transform output.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionOutput {
    pub output: Vec<u8>,
    pub content_type: String,
}

/// Failed transform run; maps to a 500 diagnostic response.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub message: String,
    pub trace: String,
}

impl ExecutionFailure {
    pub fn new(message: impl Into<String>, trace: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            trace: trace.into(),
        }
    }

    /// The 500 body: message, trace, definition source, argument payload.
    pub fn diagnostic_body(&self, definition: &str, args_payload: &serde_json::Value) -> String {
        format!(
            "{}\n\n{}\n\n{}\n\n{}",
            self.message, self.trace, definition, args_payload
        )
    }
}

/// The chained data source named by the final path segment.
#[derive(Debug, Clone, PartialEq)]
pub enum ChainSource {
    /// Another enabled server; its output is piped as input
    Server(String),
    /// A CID in the store; its bytes are piped as input
    Cid(String),
}

/// Outcome of executing a server against a request.
#[derive(Debug)]
pub enum ServerResponse {
    /// Redirect to the stored result
    Redirect {
        location: String,
        result_cid: String,
    },
    /// 500 with the assembled diagnostic body
    Failure { body: String },
}

/// Materialize the execution context from the user's entity tables.
///
/// Disabled rows are omitted. Secret rows hold ciphertext; values are
/// unsealed with the workspace key, and rows that fail to unseal are
/// skipped with a warning.
pub fn load_user_context(db: &Database, config: &Config) -> ExecutionContext {
    let user_id = &config.user_id;
    let variables = db
        .user_variables(user_id)
        .into_iter()
        .filter(|row| row.enabled)
        .map(|row| (row.name, row.definition))
        .collect();

    let mut secrets = BTreeMap::new();
    for row in db.user_secrets(user_id) {
        if !row.enabled {
            continue;
        }
        match decrypt_secret_value(&row.ciphertext, &config.boot_secret_key) {
            Ok(value) => {
                secrets.insert(row.name, value);
            }
            Err(err) => warn!(secret = %row.name, %err, "secret could not be unsealed"),
        }
    }

    let servers = db
        .user_servers(user_id)
        .into_iter()
        .filter(|row| row.enabled)
        .map(|row| (row.name, row.definition))
        .collect();

    ExecutionContext {
        variables,
        secrets,
        servers,
    }
}

/// Executes server definitions against requests.
#[derive(Debug, Clone, Copy)]
pub struct Executor<'a> {
    pub db: &'a Database,
    pub store: &'a CidStore,
    pub config: &'a Config,
}

impl<'a> Executor<'a> {
    pub fn new(db: &'a Database, store: &'a CidStore, config: &'a Config) -> Self {
        Self { db, store, config }
    }

    fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.config.outbound_timeout_secs)
    }

    fn args_payload(
        &self,
        request: &RequestDetails,
        context: &ExecutionContext,
        args: &[String],
    ) -> serde_json::Value {
        // Secrets are redacted to their names in diagnostics.
        json!({
            "request": request,
            "args": args,
            "context": {
                "variables": context.variables,
                "secrets": context.secrets.keys().collect::<Vec<_>>(),
                "servers": context.servers.keys().collect::<Vec<_>>(),
            },
        })
    }

    async fn resolve_source(
        &self,
        source: &ChainSource,
        request: &RequestDetails,
        context: &ExecutionContext,
    ) -> Result<Vec<u8>, ExecutionFailure> {
        match source {
            ChainSource::Cid(cid) => self.store.get(cid).ok_or_else(|| {
                ExecutionFailure::new(
                    format!("CID not found: {cid}"),
                    "stage: source-resolution",
                )
            }),
            ChainSource::Server(name) => {
                let definition_text = context.servers.get(name).ok_or_else(|| {
                    ExecutionFailure::new(
                        format!("source server {name:?} is not available"),
                        "stage: source-resolution",
                    )
                })?;
                let definition = parse_server_definition(definition_text).map_err(|err| {
                    ExecutionFailure::new(
                        format!("source server {name:?} definition is invalid: {err}"),
                        "stage: source-definition-parse",
                    )
                })?;
                let result =
                    run_transform(&definition, request, context, &[], b"", self.default_timeout())
                        .await?;
                Ok(result.output)
            }
        }
    }

    async fn run(
        &self,
        definition_text: &str,
        request: &RequestDetails,
        context: &ExecutionContext,
        args: &[String],
        source: Option<&ChainSource>,
    ) -> Result<ExecutionOutput, ExecutionFailure> {
        let definition = parse_server_definition(definition_text).map_err(|err| {
            ExecutionFailure::new(err.to_string(), "stage: definition-parse")
        })?;

        let input = match source {
            Some(source) => self.resolve_source(source, request, context).await?,
            None => Vec::new(),
        };

        run_transform(
            &definition,
            request,
            context,
            args,
            &input,
            self.default_timeout(),
        )
        .await
    }

    async fn execute_text(
        &self,
        server_name: &str,
        definition_text: &str,
        request: &RequestDetails,
        args: &[String],
        source: Option<ChainSource>,
    ) -> ServerResponse {
        let context = load_user_context(self.db, self.config);

        match self
            .run(definition_text, request, &context, args, source.as_ref())
            .await
        {
            Ok(result) => {
                let user_id = &self.config.user_id;
                let stored = match self.store.put(&result.output, user_id) {
                    Ok(cid) => cid,
                    Err(err) => {
                        return ServerResponse::Failure {
                            body: ExecutionFailure::new(
                                err.to_string(),
                                "stage: result-store",
                            )
                            .diagnostic_body(
                                definition_text,
                                &self.args_payload(request, &context, args),
                            ),
                        };
                    }
                };

                if let Err(err) = record_invocation(
                    self.db,
                    self.store,
                    user_id,
                    server_name,
                    stored.as_str(),
                    request,
                ) {
                    return ServerResponse::Failure {
                        body: ExecutionFailure::new(err.to_string(), "stage: invocation-record")
                            .diagnostic_body(
                                definition_text,
                                &self.args_payload(request, &context, args),
                            ),
                    };
                }

                let location = match extension_for_mime(&result.content_type) {
                    Some(extension) => format!("/{}.{extension}", stored.as_str()),
                    None => format!("/{}", stored.as_str()),
                };
                ServerResponse::Redirect {
                    location,
                    result_cid: stored.as_str().to_string(),
                }
            }
            Err(failure) => ServerResponse::Failure {
                body: failure.diagnostic_body(
                    definition_text,
                    &self.args_payload(request, &context, args),
                ),
            },
        }
    }

    /// Execute a server row against a request.
    pub async fn execute_server(
        &self,
        server: &Server,
        request: &RequestDetails,
        args: &[String],
        source: Option<ChainSource>,
    ) -> ServerResponse {
        self.execute_text(&server.name, &server.definition, request, args, source)
            .await
    }

    /// Execute a historical definition recovered from a snapshot CID.
    pub async fn execute_definition(
        &self,
        server_name: &str,
        definition_text: &str,
        request: &RequestDetails,
        args: &[String],
        source: Option<ChainSource>,
    ) -> ServerResponse {
        self.execute_text(server_name, definition_text, request, args, source)
            .await
    }
}
