//! Spool Indexer
//!
//! Keeps the search index in step with page-change events written to a
//! spool directory.
//!
//! # Usage
//!
//! ```bash
//! spool-indexer start [--foreground] [--event-folder-root PATH] [--num-pools N]
//! spool-indexer stop
//! spool-indexer status
//! spool-indexer ping [--solr-update-url URL]
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/spool-indexer/config.toml)
//! 3. Environment variables (SPOOL_INDEXER_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use indexer_daemon::{check_engine, show_status, start_daemon, stop_daemon, Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start(args) => {
            start_daemon(cli.config.as_deref(), &args, cli.log_level.as_deref()).await?;
        }
        Commands::Stop => {
            stop_daemon()?;
        }
        Commands::Status => {
            show_status()?;
        }
        Commands::Ping { solr_update_url } => {
            let status = check_engine(cli.config.as_deref(), solr_update_url.as_deref()).await?;
            if !status.is_healthy() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
