//! End-to-end test infrastructure for the spool indexer.
//!
//! Provides a shared [`SpoolHarness`]: a temporary spool tree plus mock
//! content service and search engine servers, and helpers to drive the
//! orchestrator until the spool is drained.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use indexer_pipeline::{
    ContentServiceConfig, ContentSource, HttpContentSource, IterationSummary, Orchestrator,
    PoolManager, PoolOptions, SearchWriter, SpoolDirectory, WriterConfig,
};

/// Path of the search engine update handler on the mock engine.
pub const UPDATE_PATH: &str = "/solr/main/update/";

/// Path of the ping handler derived from [`UPDATE_PATH`].
pub const PING_PATH: &str = "/solr/main/admin/ping";

/// Entry point served by the mock content service.
pub const ENTRY_PATH: &str = "/wikia.php";

/// Pause between pings in tests.
pub const TEST_HEALTH_INTERVAL: Duration = Duration::from_millis(20);

/// Shared test harness for end-to-end tests.
pub struct SpoolHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: TempDir,
    /// Spool root
    pub root: PathBuf,
    /// Mock search engine
    pub engine: MockServer,
    /// Mock content service; events point their serverName at it
    pub content: MockServer,
    /// Root shutdown token
    pub cancel: CancellationToken,
}

impl SpoolHarness {
    /// Create a spool root with the usual folders and start both servers.
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        for folder in ["events", "retries", "bulk"] {
            std::fs::create_dir_all(root.join(folder)).expect("Failed to create spool folder");
        }

        Self {
            _temp_dir: temp_dir,
            root,
            engine: MockServer::start().await,
            content: MockServer::start().await,
            cancel: CancellationToken::new(),
        }
    }

    /// Update URL of the mock engine.
    pub fn update_url(&self) -> String {
        format!("{}{}", self.engine.uri(), UPDATE_PATH)
    }

    /// serverName that routes to the mock content service.
    pub fn content_host(&self) -> String {
        self.content.uri()
    }

    /// Write newline-delimited events into a spool folder.
    pub fn write_events(&self, folder: &str, name: &str, page_ids: &[u64]) -> PathBuf {
        let host = self.content_host();
        let content: String = page_ids
            .iter()
            .map(|id| format!("{}\n", json!({"pageId": id, "serverName": host})))
            .collect();
        self.write_raw(folder, name, &content)
    }

    /// Write arbitrary file content into a spool folder.
    pub fn write_raw(&self, folder: &str, name: &str, content: &str) -> PathBuf {
        let dir = self.root.join(folder);
        std::fs::create_dir_all(&dir).expect("Failed to create spool folder");
        let path = dir.join(name);
        std::fs::write(&path, content).expect("Failed to write spool file");
        path
    }

    /// Names of files in the dead-letter folder.
    pub fn failures(&self) -> Vec<String> {
        list_names(&self.root.join("failures"))
    }

    /// Names of files still waiting in a spool folder.
    pub fn remaining(&self, folder: &str) -> Vec<String> {
        list_names(&self.root.join(folder))
    }

    /// Search writer pointed at the mock engine.
    pub fn writer(&self, strict_add_batches: bool) -> Arc<SearchWriter> {
        let writer = SearchWriter::new(WriterConfig {
            update_url: self.update_url(),
            health_check_interval: TEST_HEALTH_INTERVAL,
            timeout: Some(Duration::from_secs(5)),
            strict_add_batches,
        })
        .expect("Failed to build search writer");
        Arc::new(writer)
    }

    /// Content config pointed at the mock content service.
    pub fn content_config(&self) -> ContentServiceConfig {
        ContentServiceConfig {
            index_service: "All".to_string(),
            entry_point: "wikia.php".to_string(),
            invalid_destination_url: format!("{}/wiki/Not_a_valid_Wikia", self.content.uri()),
            timeout: Some(Duration::from_secs(5)),
        }
    }

    /// HTTP content source pointed at the mock content service.
    pub fn http_source(&self) -> Arc<dyn ContentSource> {
        let source = HttpContentSource::new(self.content_config())
            .expect("Failed to build content source");
        Arc::new(source)
    }

    /// Orchestrator over this spool.
    pub fn orchestrator(
        &self,
        source: Arc<dyn ContentSource>,
        options: PoolOptions,
        strict_add_batches: bool,
    ) -> Orchestrator {
        let spool = SpoolDirectory::new(
            &self.root,
            vec!["events".to_string(), "retries".to_string(), "bulk".to_string()],
            "failures",
        );
        let pools = PoolManager::new(
            spool,
            source,
            self.writer(strict_add_batches),
            options,
            self.cancel.child_token(),
        );
        Orchestrator::new(pools, Duration::from_millis(10), self.cancel.clone())
    }

    /// Answer pings as healthy and accept every update.
    pub async fn mount_healthy_engine(&self) {
        mount_ping(&self.engine, 200, 0).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&self.engine)
            .await;
    }

    /// Serve documents for requested ids; ids in `deleted` come back as deletes.
    pub async fn mount_content(&self, deleted: &[u64]) {
        Mock::given(method("GET"))
            .and(path(ENTRY_PATH))
            .respond_with(ContentResponder {
                deleted: deleted.to_vec(),
            })
            .mount(&self.content)
            .await;
    }

    /// JSON bodies posted to the update handler, in arrival order.
    pub async fn posted_updates(&self) -> Vec<Value> {
        self.engine
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| serde_json::from_slice(&r.body).expect("Update body was not JSON"))
            .collect()
    }

    /// Number of pings the engine received.
    pub async fn ping_count(&self) -> usize {
        self.engine
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.url.path() == PING_PATH)
            .count()
    }

    /// `ids` parameters of requests the content service received.
    pub async fn content_requests(&self) -> Vec<String> {
        self.content
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter_map(|r| {
                r.url
                    .query_pairs()
                    .find(|(key, _)| key == "ids")
                    .map(|(_, value)| value.into_owned())
            })
            .collect()
    }
}

/// Mount a ping handler answering with the given HTTP and engine status.
pub async fn mount_ping(server: &MockServer, http_status: u16, engine_status: i64) {
    Mock::given(method("GET"))
        .and(path(PING_PATH))
        .respond_with(
            ResponseTemplate::new(http_status)
                .set_body_json(json!({"responseHeader": {"status": engine_status}})),
        )
        .mount(server)
        .await;
}

/// Run iterations until nothing is attached and nothing new was picked up.
pub async fn drive_until_idle(orchestrator: &mut Orchestrator) -> IterationSummary {
    let mut total = IterationSummary::default();
    for _ in 0..1000 {
        let summary = orchestrator.run_iteration();
        total.attached += summary.attached;
        total.completed += summary.completed;
        total.dead_lettered += summary.dead_lettered;
        total.released += summary.released;
        if summary.in_flight == 0 && summary.attached == 0 {
            return total;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("spool did not drain: {:?}", total);
}

fn list_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .map(|entries| {
            entries
                .filter_map(Result::ok)
                .filter_map(|e| e.file_name().to_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    names.sort();
    names
}

/// Builds a content-service answer from the `ids` query parameter.
struct ContentResponder {
    deleted: Vec<u64>,
}

impl Respond for ContentResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let ids: Vec<u64> = request
            .url
            .query_pairs()
            .find(|(key, _)| key == "ids")
            .map(|(_, value)| value.split('|').filter_map(|id| id.parse().ok()).collect())
            .unwrap_or_default();

        let contents: Vec<Value> = ids
            .iter()
            .map(|id| {
                if self.deleted.contains(id) {
                    json!({"delete": {"id": format!("wiki_{}", id)}})
                } else {
                    json!({"id": format!("wiki_{}", id), "title": format!("Page {}", id)})
                }
            })
            .collect();

        ResponseTemplate::new(200).set_body_json(json!({ "contents": contents }))
    }
}
