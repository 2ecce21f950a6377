//! Spool indexer daemon library exports.
//!
//! This crate provides the `spool-indexer` binary.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, stop, status, ping)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, StartArgs};
pub use commands::{
    apply_start_overrides, check_engine, load_settings, show_status, start_daemon, stop_daemon,
};
