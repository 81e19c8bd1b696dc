//! The command set.

mod runnable_command;

use clap::Subcommand;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{
    cid::{format_cid, is_normalized_cid},
    config::Config,
    export::{build_export_payload, ExportSelection},
    http::{existing_routes, serve, AppContext},
    import::import_boot_cid,
    persistence::Database,
    store::{load_cids_from_directory, CidStore},
    utils::format_size,
};

use super::CliError;

pub use runnable_command::RunnableCommand;

/// Open the workspace: entity tables plus the CID store, with the
/// directory mirror scanned and verified.
fn open_workspace(config: &Config, allow_missing: bool) -> Result<(Database, CidStore), CliError> {
    let db = Database::open(&config.workspace_file)?;
    let store = CidStore::with_directory(&config.cid_directory);
    if config.load_cids {
        let loaded = load_cids_from_directory(&store, &config.user_id, allow_missing)?;
        tracing::info!(loaded, directory = %config.cid_directory.display(), "CID mirror verified");
    }
    Ok((db, store))
}

/// Defines the types of commands that can be executed from the CLI.
#[derive(Debug, Subcommand, Clone)]
pub enum WorkspaceCommand {
    /// Run the HTTP service
    Serve {
        /// Listen address
        #[arg(long, default_value = "127.0.0.1:8080")]
        addr: String,
        /// Import this CID before serving
        #[arg(long)]
        boot_cid: Option<String>,
        /// Treat a missing cids/ directory as empty
        #[arg(long)]
        allow_missing_cid_directory: bool,
    },
    /// Print the content stored for a CID
    Get {
        /// The CID to fetch
        cid: String,
        /// Write content here instead of stdout
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Store content and print its CID
    Put {
        /// Read content from this file
        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,
        /// Use this text as the content
        #[arg(long)]
        text: Option<String>,
    },
    /// Verify the cids/ directory mirror
    Verify,
    /// Build a snapshot export and print its CID
    Export {
        /// Key sealing the secrets section; omitting it skips secrets
        #[arg(long)]
        secret_key: Option<String>,
        /// Write the payload JSON here
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Import a workspace from a boot CID
    Boot {
        /// The boot CID
        cid: String,
    },
}

impl WorkspaceCommand {
    pub(crate) async fn run_with(self, config: Config) -> Result<String, CliError> {
        match self {
            WorkspaceCommand::Serve {
                addr,
                boot_cid,
                allow_missing_cid_directory,
            } => {
                if config.session_secret.is_none() {
                    return Err(CliError::missing_session_secret());
                }
                let (db, store) = open_workspace(&config, allow_missing_cid_directory)?;
                let ctx = Arc::new(AppContext::new(config, db, store));

                if let Some(boot_cid) = boot_cid {
                    let _guard = ctx.boot_lock.write();
                    let report = import_boot_cid(
                        &ctx.db,
                        &ctx.store,
                        &ctx.config,
                        &ctx.builtin_routes,
                        &boot_cid,
                    )?;
                    for warning in &report.warnings {
                        println!("Boot image warning: {warning}");
                    }
                    if let Some(snapshot) = &report.snapshot {
                        println!("\nSnapshot export generated:");
                        println!("  CID: {}", snapshot.cid_value);
                    }
                }

                serve(Arc::clone(&ctx), &addr).await?;
                Ok("service stopped".to_string())
            }
            WorkspaceCommand::Get { cid, output } => {
                let normalized = format_cid(&cid);
                if !is_normalized_cid(&normalized) {
                    return Err(CliError::invalid_arguments(format!(
                        "Invalid CID format: {cid}"
                    )));
                }
                let (_db, store) = open_workspace(&config, true)?;
                let Some(content) = store.get(&normalized) else {
                    return Err(CliError::cid_not_found(normalized));
                };
                match output {
                    Some(path) => {
                        std::fs::write(&path, &content)?;
                        Ok(format!(
                            "wrote {} to {}",
                            format_size(content.len() as u64),
                            path.display()
                        ))
                    }
                    None => Ok(String::from_utf8_lossy(&content).into_owned()),
                }
            }
            WorkspaceCommand::Put { file, text } => {
                let content = match (file, text) {
                    (Some(path), None) => {
                        if !path.exists() {
                            return Err(CliError::missing_file(path));
                        }
                        std::fs::read(&path)?
                    }
                    (None, Some(text)) => text.into_bytes(),
                    _ => {
                        return Err(CliError::invalid_arguments(
                            "provide exactly one of --file or --text".to_string(),
                        ))
                    }
                };
                std::fs::create_dir_all(&config.cid_directory)?;
                let (_db, store) = open_workspace(&config, true)?;
                let cid = store.put(&content, &config.user_id)?;
                Ok(cid.as_str().to_string())
            }
            WorkspaceCommand::Verify => {
                let store = CidStore::with_directory(&config.cid_directory);
                let loaded = load_cids_from_directory(&store, &config.user_id, false)?;
                Ok(format!(
                    "verified {loaded} CID file(s) in {}",
                    config.cid_directory.display()
                ))
            }
            WorkspaceCommand::Export { secret_key, output } => {
                let (db, store) = open_workspace(&config, true)?;
                let selection = match &secret_key {
                    Some(key) => ExportSelection::everything(key.clone()),
                    None => ExportSelection::snapshot(),
                };
                let result = build_export_payload(&db, &store, &config, &selection, true)?;
                db.record_export(&config.user_id, &result.cid_value)?;
                if let Some(path) = output {
                    std::fs::write(&path, result.json_payload.as_bytes())?;
                }
                Ok(result.cid_value)
            }
            WorkspaceCommand::Boot { cid } => {
                let (db, store) = open_workspace(&config, false)?;
                let report =
                    import_boot_cid(&db, &store, &config, &existing_routes(), &cid)?;
                for warning in &report.warnings {
                    println!("Boot image warning: {warning}");
                }
                let mut message = if report.summaries.is_empty() {
                    "Boot CID import completed (no changes)".to_string()
                } else {
                    format!("Imported {}", report.summaries.join(", "))
                };
                if let Some(snapshot) = &report.snapshot {
                    message.push_str(&format!("\nSnapshot export CID: {}", snapshot.cid_value));
                }
                Ok(message)
            }
        }
    }
}
