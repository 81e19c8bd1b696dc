use async_trait::async_trait;
use clap::Subcommand;
use std::fmt::Display;

use crate::config::Config;

/// Async function for running a command
#[async_trait(?Send)]
pub trait RunnableCommand<ErrorType>: Subcommand
where
    ErrorType: std::fmt::Debug + Display,
{
    /// The internal running operation
    async fn run_internal(self, config: Config) -> Result<String, ErrorType>;

    /// Run the command against configuration resolved from the current
    /// working directory and environment.
    async fn run(self) -> Result<String, ErrorType> {
        let root = std::env::current_dir().unwrap_or_else(|_| ".".into());
        let config = Config::from_env(root);
        self.run_internal(config).await
    }
}

#[async_trait(?Send)]
impl RunnableCommand<super::super::CliError> for super::WorkspaceCommand {
    async fn run_internal(self, config: Config) -> Result<String, super::super::CliError> {
        self.run_with(config).await
    }
}
