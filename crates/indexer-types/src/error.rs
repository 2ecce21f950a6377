//! Error types for the spool indexer.

use thiserror::Error;

/// Unified error type for configuration and shared type handling.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
