//! CLI parsing.

pub mod commands;
mod error;

use clap::Parser;

pub use commands::{RunnableCommand, WorkspaceCommand};
pub use error::{CliError, CliErrorKind};

/// Arguments to cidspace
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Command passed
    #[command(subcommand)]
    pub command: WorkspaceCommand,
}
