//! # indexer-types
//!
//! Shared domain types for the spool indexer.
//!
//! This crate defines the data structures passed between pipeline stages:
//! - Events: page-change records read from spool files
//! - Host slices: bounded id lists sent to the content service
//! - Documents: add and delete records bound for the search engine
//! - Settings: layered configuration for the daemon
//!
//! ## Usage
//!
//! ```rust
//! use indexer_types::{Event, HostSlice};
//!
//! let event = Event::new(42, "muppet.wikia.com");
//! let slices = HostSlice::split(&event.server_name, &[event.page_id]);
//! assert_eq!(slices.len(), 1);
//! ```

pub mod config;
pub mod document;
pub mod error;
pub mod event;

pub use config::{Settings, SliceFailurePolicy};
pub use document::{DeleteDirective, ExtractResult, SolrDocument};
pub use error::IndexerError;
pub use event::{Event, HostSlice, MAX_IDS_PER_REQUEST};
