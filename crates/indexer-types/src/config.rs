//! Configuration loading for the spool indexer.
//!
//! Layered config: defaults -> config file -> env vars -> CLI flags.
//! The default config file lives at ~/.config/spool-indexer/config.toml.
//! Settings are resolved once at startup and never mutated afterwards.

use config::{Config, Environment, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::IndexerError;

/// What to do with a host slice the content service could not serve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SliceFailurePolicy {
    /// Log and drop the slice; the rest of the file is still delivered
    #[default]
    Drop,
    /// Fail the whole file so it lands in the dead-letter folder
    DeadLetter,
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Service selector passed to the content service
    #[serde(default = "default_index_service")]
    pub index_service: String,

    /// Search engine update endpoint
    #[serde(default = "default_solr_update_url")]
    pub solr_update_url: String,

    /// Stamp every add document with an `indexed` timestamp
    #[serde(default = "default_true")]
    pub add_last_indexed: bool,

    /// Root of the spool directory tree
    #[serde(default = "default_event_folder_root")]
    pub event_folder_root: String,

    /// Comma-separated folder names scanned before all others
    #[serde(default = "default_folder_ordering")]
    pub folder_ordering: String,

    /// Concurrent fetches per pool
    #[serde(default = "default_num_processes")]
    pub num_processes: usize,

    /// Number of pools, i.e. files in flight at once
    #[serde(default = "default_num_pools")]
    pub num_pools: usize,

    /// Dead-letter folder name under the spool root
    #[serde(default = "default_failures_folder")]
    pub failures_folder: String,

    /// Sleep between orchestrator iterations (ms)
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Pause between health pings while the search engine is unhealthy (s)
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// HTTP request timeout in seconds; 0 disables the timeout
    #[serde(default)]
    pub request_timeout_secs: u64,

    /// Entry point appended to each host when querying the content service
    #[serde(default = "default_content_entry_point")]
    pub content_entry_point: String,

    /// Redirect target served for hosts that are not valid destinations
    #[serde(default = "default_invalid_destination_url")]
    pub invalid_destination_url: String,

    /// Handling of slices the content service failed to serve
    #[serde(default)]
    pub on_slice_failure: SliceFailurePolicy,

    /// Treat any failed add batch as a failed delivery
    #[serde(default)]
    pub strict_add_batches: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_index_service() -> String {
    "All".to_string()
}

fn default_solr_update_url() -> String {
    "http://search-master:8983/solr/main/update/".to_string()
}

fn default_true() -> bool {
    true
}

fn default_event_folder_root() -> String {
    "/var/spool/scribe/".to_string()
}

fn default_folder_ordering() -> String {
    "events,retries,bulk".to_string()
}

fn default_num_processes() -> usize {
    6
}

fn default_num_pools() -> usize {
    10
}

fn default_failures_folder() -> String {
    "failures".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_content_entry_point() -> String {
    "wikia.php".to_string()
}

fn default_invalid_destination_url() -> String {
    "http://community.wikia.com/wiki/Community_Central:Not_a_valid_Wikia".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            index_service: default_index_service(),
            solr_update_url: default_solr_update_url(),
            add_last_indexed: true,
            event_folder_root: default_event_folder_root(),
            folder_ordering: default_folder_ordering(),
            num_processes: default_num_processes(),
            num_pools: default_num_pools(),
            failures_folder: default_failures_folder(),
            poll_interval_ms: default_poll_interval_ms(),
            health_check_interval_secs: default_health_check_interval_secs(),
            request_timeout_secs: 0,
            content_entry_point: default_content_entry_point(),
            invalid_destination_url: default_invalid_destination_url(),
            on_slice_failure: SliceFailurePolicy::default(),
            strict_add_batches: false,
            log_level: default_log_level(),
        }
    }
}

impl Settings {
    /// Load settings with layered precedence:
    /// 1. Built-in defaults
    /// 2. Config file (~/.config/spool-indexer/config.toml)
    /// 3. CLI-specified config file (optional)
    /// 4. Environment variables (SPOOL_INDEXER_*)
    ///
    /// CLI flags should be applied by the caller after this returns.
    pub fn load(cli_config_path: Option<&str>) -> Result<Self, IndexerError> {
        let config_dir = ProjectDirs::from("", "", "spool-indexer")
            .map(|p| p.config_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let default_config_path = config_dir.join("config");

        let mut builder = Config::builder()
            .set_default("index_service", default_index_service())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("solr_update_url", default_solr_update_url())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("event_folder_root", default_event_folder_root())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("folder_ordering", default_folder_ordering())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("num_processes", default_num_processes() as i64)
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("num_pools", default_num_pools() as i64)
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .set_default("log_level", default_log_level())
            .map_err(|e| IndexerError::Config(e.to_string()))?
            .add_source(File::with_name(&default_config_path.to_string_lossy()).required(false));

        if let Some(path) = cli_config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // SPOOL_INDEXER_NUM_POOLS, SPOOL_INDEXER_SOLR_UPDATE_URL, ...
        builder = builder.add_source(
            Environment::with_prefix("SPOOL_INDEXER")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder
            .build()
            .map_err(|e| IndexerError::Config(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| IndexerError::Config(e.to_string()))
    }

    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), IndexerError> {
        if self.num_pools == 0 {
            return Err(IndexerError::Config("num_pools must be > 0".to_string()));
        }
        if self.num_processes == 0 {
            return Err(IndexerError::Config("num_processes must be > 0".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(IndexerError::Config("poll_interval_ms must be > 0".to_string()));
        }
        if self.health_check_interval_secs == 0 {
            return Err(IndexerError::Config(
                "health_check_interval_secs must be > 0".to_string(),
            ));
        }
        let url = reqwest::Url::parse(&self.solr_update_url).map_err(|e| {
            IndexerError::Config(format!("solr_update_url {}: {}", self.solr_update_url, e))
        })?;
        // The ping URL is derived by replacing the last path segment.
        if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
            return Err(IndexerError::Config(format!(
                "solr_update_url must be an http(s) URL, got {}",
                self.solr_update_url
            )));
        }
        if self.failures_folder.is_empty() || self.failures_folder.contains('/') {
            return Err(IndexerError::Config(format!(
                "failures_folder must be a plain folder name, got '{}'",
                self.failures_folder
            )));
        }
        Ok(())
    }

    /// Priority folder names in scan order.
    pub fn folder_order(&self) -> Vec<String> {
        self.folder_ordering
            .split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Spool root with `~` expanded.
    pub fn expanded_event_root(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.event_folder_root).into_owned())
    }

    /// Sleep between orchestrator iterations.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Pause between health pings while unhealthy.
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    /// HTTP request timeout, if configured.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }
}
