//! Arena host entry point.
//!
//! Loads `arena.toml`, applies command-line overrides, sets up logging and
//! dispatches to one of the subcommands:
//!
//! * `run`: game server plus content, websocket tunnel and web on one port
//! * `server`: game server mirroring its content from a content server
//! * `content`: standalone content server
//! * `upload`: push a map pack to a content server

mod cli;
mod commands;
mod config;
mod logging;
mod signals;

use clap::Parser;
use cli::{Cli, Command};
use config::AppConfig;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("❌ {:#}", e);
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load_from_file(&cli.config).await?;
    cli.apply_overrides(&mut config);
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {e}"))?;

    logging::setup_logging(&config.logging)?;
    info!("📁 Using configuration file {}", cli.config.display());

    match &cli.command {
        Command::Run(_) => commands::run::execute(&config.run).await,
        Command::Server(_) => commands::server::execute(&config.run).await,
        Command::Content(_) => commands::content::execute(&config.content).await,
        Command::Upload { file, addr } => commands::upload::execute(file, addr).await,
    }?;

    info!("👋 Shutdown complete");
    Ok(())
}
