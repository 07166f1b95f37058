pub mod agents;
pub mod app;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod operations;
pub mod providers;
pub mod records;
pub mod workspace;

use anyhow::Result;

use crate::cli::Cli;
use crate::config::RainerConfig;

/// Load configuration and run one command. `Ok(false)` means the command
/// ran but the team did not deliver.
pub async fn run(cli: Cli) -> Result<bool> {
    let config = match &cli.config {
        Some(path) => RainerConfig::load_from(path)?,
        None => RainerConfig::load()?,
    };
    let app = app::Application::new(config)?;
    app.dispatch(cli.command).await
}
