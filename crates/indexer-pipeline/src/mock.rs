//! Mock content source for testing.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use indexer_types::{ExtractResult, HostSlice, SolrDocument};

use crate::error::FetchError;
use crate::fetcher::ContentSource;

/// Content source that answers from memory.
///
/// Every page id becomes an add document `{"id": "<host>_<pageId>"}`,
/// unless it was registered as deleted. Hosts can be set up to fail or to
/// panic so failure paths can be exercised without a network.
#[derive(Default)]
pub struct MockContentSource {
    deleted: HashSet<u64>,
    failing_hosts: HashSet<String>,
    panicking_hosts: HashSet<String>,
    calls: Mutex<Vec<HostSlice>>,
}

impl MockContentSource {
    /// Create a mock that serves every id as an add.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve these page ids as deletes.
    pub fn with_deleted(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.deleted.extend(ids);
        self
    }

    /// Answer requests for this host with HTTP 500.
    pub fn with_failing_host(mut self, host: impl Into<String>) -> Self {
        self.failing_hosts.insert(host.into());
        self
    }

    /// Panic while serving this host.
    pub fn with_panicking_host(mut self, host: impl Into<String>) -> Self {
        self.panicking_hosts.insert(host.into());
        self
    }

    /// Slices requested so far.
    pub fn calls(&self) -> Vec<HostSlice> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl ContentSource for MockContentSource {
    async fn fetch(
        &self,
        slice: &HostSlice,
        indexed_at: Option<&str>,
    ) -> Result<ExtractResult, FetchError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(slice.clone());
        }

        if self.panicking_hosts.contains(&slice.server_name) {
            panic!("mock content source panicked for {}", slice.server_name);
        }
        if self.failing_hosts.contains(&slice.server_name) {
            return Err(FetchError::Status {
                host: slice.server_name.clone(),
                status: 500,
                body: "mock failure".to_string(),
            });
        }

        let contents = slice
            .page_ids
            .iter()
            .map(|id| {
                let doc_id = format!("{}_{}", slice.server_name, id);
                let value = if self.deleted.contains(id) {
                    json!({"delete": {"id": doc_id}})
                } else {
                    json!({"id": doc_id})
                };
                match value {
                    Value::Object(map) => SolrDocument::new(map),
                    _ => SolrDocument::new(Map::new()),
                }
            })
            .collect();

        Ok(ExtractResult::classify(contents, indexed_at))
    }
}
