mod cli;
mod command;
mod config;
mod database;
mod monitoring;
mod orchestrator;
mod pool;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use clap::Parser;
use logger::LevelFilter;
use tracing::info;

use crate::cli::{Cli, Command};
use crate::config::Config;
use crate::orchestrator::Orchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    logger::init_tracing(LevelFilter::INFO);

    let config = Config::from_config(cli.config.as_ref()).context("failed to load configuration")?;

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            info!("Starting uplert monitor\n{}", config);
            let pool = pool::open(&config.database.path)
                .await
                .with_context(|| format!("failed to open database {}", config.database.path.display()))?;
            Orchestrator::start(config, pool).await
        }
        Command::Send { url, interval } => cli::send(&config, &url, &interval).await,
        Command::Tail => cli::tail(&config).await,
    }
}
