//! stepup - self-updating application launcher

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use stepup_cli::Cli;
use stepup_cli::cmd;
use stepup_core::Installation;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let install = match cli.dir {
        Some(dir) => Installation::new(dir),
        None => Installation::locate().context("Failed to locate the installation directory")?,
    };

    // An applied update has already relaunched the new version.
    if !cli.no_update && cmd::update::update(&install).await? {
        return Ok(());
    }

    cmd::run::run(&install).await
}
