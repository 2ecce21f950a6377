//! Spool-driven indexing pipeline.
//!
//! This crate turns page-change event files into search engine updates.
//!
//! ## Key Components
//!
//! - [`parse_event_file`]: Reads a spool file into per-host page id lists
//! - [`ContentSource`]: Trait for fetching current page documents
//! - [`HttpContentSource`]: Content source backed by each host's indexer controller
//! - [`aggregate`]: Combines per-slice results for one file
//! - [`SearchWriter`]: Health-gated, batched delivery to the update endpoint
//! - [`SpoolDirectory`]: Folder ordering, candidate listing and dead-lettering
//! - [`PoolManager`]: Fixed set of slots, one file per slot
//! - [`Orchestrator`]: Non-blocking scheduling loop over the spool
//!
//! ## Architecture
//!
//! 1. The orchestrator attaches spool files to idle pool slots
//! 2. Each file's events are grouped by host and split into slices
//! 3. A slot's workers fetch the slices concurrently
//! 4. Results are concatenated and handed to the search writer
//! 5. Delivered files are removed; failed files move to the dead-letter folder
//!
//! ## Example
//!
//! ```ignore
//! use indexer_pipeline::Orchestrator;
//! use indexer_types::Settings;
//! use tokio_util::sync::CancellationToken;
//!
//! let settings = Settings::load(None)?;
//! let cancel = CancellationToken::new();
//! let mut orchestrator = Orchestrator::from_settings(&settings, cancel.clone())?;
//! orchestrator.run().await;
//! ```

pub mod aggregator;
pub mod error;
pub mod fetcher;
pub mod mock;
pub mod orchestrator;
pub mod parser;
pub mod pool;
pub mod spool;
pub mod writer;

pub use aggregator::aggregate;
pub use error::{FetchError, PipelineError, WriterError};
pub use fetcher::{ContentServiceConfig, ContentSource, HttpContentSource};
pub use mock::MockContentSource;
pub use orchestrator::{IterationSummary, Orchestrator};
pub use parser::{parse_event_bytes, parse_event_file, parse_events, ParsedEvents};
pub use pool::{FileTask, PollOutcome, PoolManager, PoolOptions, PoolSlot, TaskStage, WorkerPool};
pub use spool::SpoolDirectory;
pub use writer::{
    ping_url, DeliveryReport, HealthGate, HealthStatus, SearchWriter, WriterConfig,
    ADD_BATCH_SIZE,
};
