//! CLI argument parsing for the spool indexer.
//!
//! CLI flags override every other configuration source.

use clap::{Parser, Subcommand};

/// Spool Indexer
///
/// Reads page-change events from a spool directory and keeps the search
/// index in step with the content service.
#[derive(Parser, Debug)]
#[command(name = "spool-indexer")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/spool-indexer/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Overrides accepted by `start`.
#[derive(clap::Args, Debug, Clone, Default)]
pub struct StartArgs {
    /// Run in foreground (don't daemonize)
    #[arg(short, long)]
    pub foreground: bool,

    /// Root of the spool directory tree
    #[arg(long)]
    pub event_folder_root: Option<String>,

    /// Comma-separated priority folders, scanned first
    #[arg(long)]
    pub folder_ordering: Option<String>,

    /// Concurrent content requests per pool
    #[arg(long)]
    pub num_processes: Option<usize>,

    /// Number of files processed at once
    #[arg(long)]
    pub num_pools: Option<usize>,

    /// Service selector passed to the content service
    #[arg(long)]
    pub index_service: Option<String>,

    /// Search engine update endpoint
    #[arg(long)]
    pub solr_update_url: Option<String>,

    /// Do not stamp documents with the indexing time
    #[arg(long)]
    pub dont_add_last_indexed: bool,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the indexer
    Start(StartArgs),

    /// Stop the running daemon
    Stop,

    /// Show daemon status
    Status,

    /// Check search engine health once
    Ping {
        /// Search engine update endpoint (default from config)
        #[arg(long)]
        solr_update_url: Option<String>,
    },
}
