//! Search engine delivery with health gating.
//!
//! Every delivery starts by pinging the engine. While the engine is
//! unhealthy the writer pauses for a fixed interval and pings again, with no
//! retry limit; the pause is the only suspension and it can be interrupted
//! by shutdown. A connection failure while posting puts the gate back into
//! the unhealthy state and the same payload is retried once the engine
//! answers pings again.
//!
//! Adds are posted in batches of [`ADD_BATCH_SIZE`]. A rejected add batch is
//! logged and skipped; the delete payload is posted once and its rejection
//! fails the delivery.

use std::time::Duration;

use backoff::backoff::{Backoff, Constant};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use indexer_types::{ExtractResult, Settings};

use crate::error::WriterError;

/// Documents per add request.
pub const ADD_BATCH_SIZE: usize = 250;

/// Health gate state for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthGate {
    AssumedHealthy,
    Unhealthy,
}

/// Result of a single ping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthStatus {
    /// HTTP 200 with `responseHeader.status == 0`
    Healthy,
    /// The ping could not connect
    Unreachable(String),
    /// The ping returned a non-success status
    HttpStatus(u16),
    /// The engine answered but reported a non-zero status
    Degraded(i64),
    /// The ping body was not the expected JSON
    Malformed(String),
}

impl HealthStatus {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unreachable(e) => write!(f, "unreachable ({})", e),
            HealthStatus::HttpStatus(code) => write!(f, "HTTP {}", code),
            HealthStatus::Degraded(status) => write!(f, "status {}", status),
            HealthStatus::Malformed(e) => write!(f, "malformed ping response ({})", e),
        }
    }
}

/// Outcome of one delivery call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Add requests issued (excluding connection retries)
    pub add_batches: usize,
    /// Add requests the engine rejected
    pub failed_add_batches: usize,
    /// Add documents accepted
    pub adds_sent: usize,
    /// Delete directives accepted
    pub deletes_sent: usize,
    /// Pauses taken while the engine was unhealthy
    pub health_waits: u32,
    /// Total time spent paused
    pub waited: Duration,
    /// Whether the delivery as a whole succeeded
    pub success: bool,
}

/// Configuration for the search writer.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Update endpoint receiving JSON documents
    pub update_url: String,

    /// Pause between pings while unhealthy
    pub health_check_interval: Duration,

    /// Request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,

    /// Fail the delivery when any add batch is rejected
    pub strict_add_batches: bool,
}

impl WriterConfig {
    /// Build from daemon settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            update_url: settings.solr_update_url.clone(),
            health_check_interval: settings.health_check_interval(),
            timeout: settings.request_timeout(),
            strict_add_batches: settings.strict_add_batches,
        }
    }

    /// Set the pause between pings.
    pub fn with_health_check_interval(mut self, interval: Duration) -> Self {
        self.health_check_interval = interval;
        self
    }

    /// Set strict add-batch handling.
    pub fn with_strict_add_batches(mut self, strict: bool) -> Self {
        self.strict_add_batches = strict;
        self
    }
}

/// Derive the ping endpoint from the update endpoint.
///
/// The trailing path segment (`update`) is replaced by `admin/ping` and the
/// query is set to `wt=json`.
pub fn ping_url(update_url: &str) -> Result<Url, WriterError> {
    let mut url = Url::parse(update_url)
        .map_err(|e| WriterError::InvalidUrl(format!("{}: {}", update_url, e)))?;
    url.path_segments_mut()
        .map_err(|_| WriterError::InvalidUrl(update_url.to_string()))?
        .pop_if_empty()
        .pop()
        .extend(["admin", "ping"]);
    url.set_query(Some("wt=json"));
    Ok(url)
}

#[derive(Deserialize)]
struct PingResponse {
    #[serde(rename = "responseHeader")]
    response_header: PingHeader,
}

#[derive(Deserialize)]
struct PingHeader {
    status: i64,
}

enum PostOutcome {
    Accepted,
    Rejected { status: u16, body: String },
    Unreachable(String),
    Failed(String),
}

struct DeliverySession {
    gate: HealthGate,
    pauses: Constant,
    report: DeliveryReport,
}

/// Writes documents to the search engine's update endpoint.
pub struct SearchWriter {
    client: Client,
    update_url: Url,
    ping_url: Url,
    config: WriterConfig,
}

impl SearchWriter {
    /// Create a new search writer.
    pub fn new(config: WriterConfig) -> Result<Self, WriterError> {
        let update_url = Url::parse(&config.update_url)
            .map_err(|e| WriterError::InvalidUrl(format!("{}: {}", config.update_url, e)))?;
        let ping_url = ping_url(&config.update_url)?;

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| WriterError::Client(e.to_string()))?;

        Ok(Self {
            client,
            update_url,
            ping_url,
            config,
        })
    }

    /// The ping endpoint used by the health gate.
    pub fn ping_endpoint(&self) -> &Url {
        &self.ping_url
    }

    /// Ping the engine once.
    pub async fn check_health(&self) -> HealthStatus {
        let response = match self.client.get(self.ping_url.clone()).send().await {
            Ok(response) => response,
            Err(e) => return HealthStatus::Unreachable(e.to_string()),
        };

        if !response.status().is_success() {
            return HealthStatus::HttpStatus(response.status().as_u16());
        }

        match response.json::<PingResponse>().await {
            Ok(ping) if ping.response_header.status == 0 => HealthStatus::Healthy,
            Ok(ping) => HealthStatus::Degraded(ping.response_header.status),
            Err(e) => HealthStatus::Malformed(e.to_string()),
        }
    }

    /// Deliver one file's documents.
    ///
    /// Blocks while the engine is unhealthy. Returns
    /// [`WriterError::Cancelled`] if `cancel` fires during such a pause.
    pub async fn deliver(
        &self,
        docs: &ExtractResult,
        cancel: &CancellationToken,
    ) -> Result<DeliveryReport, WriterError> {
        let mut session = DeliverySession {
            gate: HealthGate::AssumedHealthy,
            pauses: Constant::new(self.config.health_check_interval),
            report: DeliveryReport::default(),
        };

        self.await_healthy(&mut session, cancel).await?;

        for batch in docs.adds.chunks(ADD_BATCH_SIZE) {
            session.report.add_batches += 1;
            loop {
                match self.post(batch).await {
                    PostOutcome::Accepted => {
                        session.report.adds_sent += batch.len();
                        debug!(count = batch.len(), url = %self.update_url, "Sent updates");
                        break;
                    }
                    PostOutcome::Rejected { status, body } => {
                        error!(
                            url = %self.update_url,
                            response_status = status,
                            response_content = %body,
                            data = %serde_json::to_string(batch).unwrap_or_default(),
                            "Status code for update was not 200"
                        );
                        session.report.failed_add_batches += 1;
                        break;
                    }
                    PostOutcome::Failed(e) => {
                        error!(url = %self.update_url, error = %e, "Could not send updates");
                        session.report.failed_add_batches += 1;
                        break;
                    }
                    PostOutcome::Unreachable(e) => {
                        warn!(url = %self.update_url, error = %e, "Could not connect to search engine");
                        session.gate = HealthGate::Unhealthy;
                        self.await_healthy(&mut session, cancel).await?;
                    }
                }
            }
        }

        let deletes_ok = if docs.deletes.is_empty() {
            true
        } else {
            loop {
                match self.post(&docs.deletes).await {
                    PostOutcome::Accepted => {
                        session.report.deletes_sent = docs.deletes.len();
                        debug!(count = docs.deletes.len(), url = %self.update_url, "Sent deletes");
                        break true;
                    }
                    PostOutcome::Rejected { status, body } => {
                        error!(
                            url = %self.update_url,
                            response_status = status,
                            response_content = %body,
                            data = %serde_json::to_string(&docs.deletes).unwrap_or_default(),
                            "Status code for delete was not 200"
                        );
                        break false;
                    }
                    PostOutcome::Failed(e) => {
                        error!(url = %self.update_url, error = %e, "Could not send deletes");
                        break false;
                    }
                    PostOutcome::Unreachable(e) => {
                        warn!(url = %self.update_url, error = %e, "Could not connect to search engine");
                        session.gate = HealthGate::Unhealthy;
                        self.await_healthy(&mut session, cancel).await?;
                    }
                }
            }
        };

        let adds_ok = !self.config.strict_add_batches || session.report.failed_add_batches == 0;
        session.report.success =
            session.gate == HealthGate::AssumedHealthy && adds_ok && deletes_ok;
        Ok(session.report)
    }

    /// Ping until healthy, pausing after every failed ping.
    async fn await_healthy(
        &self,
        session: &mut DeliverySession,
        cancel: &CancellationToken,
    ) -> Result<(), WriterError> {
        loop {
            let status = self.check_health().await;
            if status.is_healthy() {
                if session.gate == HealthGate::Unhealthy {
                    info!(
                        waited_secs = session.report.waited.as_secs(),
                        "Search engine is healthy again"
                    );
                }
                session.gate = HealthGate::AssumedHealthy;
                return Ok(());
            }

            session.gate = HealthGate::Unhealthy;
            let pause = session
                .pauses
                .next_backoff()
                .unwrap_or(self.config.health_check_interval);
            warn!(
                ping = %self.ping_url,
                status = %status,
                waited_secs = session.report.waited.as_secs(),
                "Search engine is unhealthy, waiting"
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(WriterError::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
            session.report.health_waits += 1;
            session.report.waited += pause;
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, payload: &T) -> PostOutcome {
        let response = match self
            .client
            .post(self.update_url.clone())
            .json(payload)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) if e.is_connect() || e.is_timeout() => {
                return PostOutcome::Unreachable(e.to_string())
            }
            Err(e) => return PostOutcome::Failed(e.to_string()),
        };

        let status = response.status();
        if status.is_success() {
            PostOutcome::Accepted
        } else {
            let body = response.text().await.unwrap_or_default();
            PostOutcome::Rejected {
                status: status.as_u16(),
                body,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexer_types::{DeleteDirective, SolrDocument};
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const UPDATE_PATH: &str = "/solr/main/update/";
    const PING_PATH: &str = "/solr/main/admin/ping";

    fn config(server: &MockServer) -> WriterConfig {
        WriterConfig {
            update_url: format!("{}{}", server.uri(), UPDATE_PATH),
            health_check_interval: Duration::from_millis(10),
            timeout: None,
            strict_add_batches: false,
        }
    }

    fn adds(count: usize) -> ExtractResult {
        ExtractResult {
            adds: (0..count)
                .map(|i| serde_json::from_value::<SolrDocument>(json!({ "id": i })).unwrap())
                .collect(),
            deletes: vec![],
        }
    }

    fn healthy() -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({"responseHeader": {"status": 0}}))
    }

    async fn mount_healthy_ping(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .and(query_param("wt", "json"))
            .respond_with(healthy())
            .mount(server)
            .await;
    }

    async fn posts(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == "POST")
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    #[test]
    fn test_ping_url() {
        assert_eq!(
            ping_url("http://search-master:8983/solr/main/update/")
                .unwrap()
                .as_str(),
            "http://search-master:8983/solr/main/admin/ping?wt=json"
        );
        assert_eq!(
            ping_url("http://localhost:8983/solr/main/update?commit=true")
                .unwrap()
                .as_str(),
            "http://localhost:8983/solr/main/admin/ping?wt=json"
        );
        assert!(ping_url("not a url").is_err());
    }

    #[tokio::test]
    async fn test_check_health_states() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"responseHeader": {"status": 1}})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        mount_healthy_ping(&server).await;

        let writer = SearchWriter::new(config(&server)).unwrap();
        assert_eq!(writer.check_health().await, HealthStatus::HttpStatus(503));
        assert_eq!(writer.check_health().await, HealthStatus::Degraded(1));
        assert_eq!(writer.check_health().await, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_check_health_unreachable() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let writer = SearchWriter::new(WriterConfig {
            update_url: format!("http://{}{}", addr, UPDATE_PATH),
            health_check_interval: Duration::from_millis(10),
            timeout: None,
            strict_add_batches: false,
        })
        .unwrap();
        assert!(matches!(
            writer.check_health().await,
            HealthStatus::Unreachable(_)
        ));
    }

    #[tokio::test]
    async fn test_adds_are_batched() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .expect(3)
            .mount(&server)
            .await;

        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&adds(501), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.add_batches, 3);
        assert_eq!(report.adds_sent, 501);
        assert_eq!(report.health_waits, 0);

        let sizes: Vec<usize> = posts(&server)
            .await
            .iter()
            .map(|b| b.as_array().unwrap().len())
            .collect();
        assert_eq!(sizes, vec![250, 250, 1]);
    }

    #[tokio::test]
    async fn test_failed_add_batch_does_not_stop_delivery() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad doc"))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&adds(600), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.add_batches, 3);
        assert_eq!(report.failed_add_batches, 1);
        assert_eq!(report.adds_sent, 350);
        assert!(report.success);
        assert_eq!(posts(&server).await.len(), 3);
    }

    #[tokio::test]
    async fn test_strict_add_batches() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let writer =
            SearchWriter::new(config(&server).with_strict_add_batches(true)).unwrap();
        let report = writer
            .deliver(&adds(10), &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_deletes_posted_once() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut docs = adds(1);
        docs.deletes = vec![
            DeleteDirective { id: json!("1_2") },
            DeleteDirective { id: json!("1_3") },
        ];

        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&docs, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.deletes_sent, 2);
        let bodies = posts(&server).await;
        assert_eq!(bodies.len(), 2);
        assert_eq!(bodies[1], json!([{"id": "1_2"}, {"id": "1_3"}]));
    }

    #[tokio::test]
    async fn test_rejected_deletes_fail_delivery() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let docs = ExtractResult {
            adds: vec![],
            deletes: vec![DeleteDirective { id: json!("1_2") }],
        };
        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&docs, &CancellationToken::new())
            .await
            .unwrap();
        assert!(!report.success);
    }

    #[tokio::test]
    async fn test_empty_delivery_posts_nothing() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;

        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&ExtractResult::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(report.success);
        assert!(posts(&server).await.is_empty());
    }

    #[tokio::test]
    async fn test_waits_once_per_failed_ping() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let writer = SearchWriter::new(config(&server)).unwrap();
        let report = writer
            .deliver(&adds(3), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.health_waits, 2);
        assert_eq!(report.waited, Duration::from_millis(20));

        let methods: Vec<String> = server
            .received_requests()
            .await
            .unwrap()
            .iter()
            .map(|r| r.method.as_str().to_string())
            .collect();
        assert_eq!(methods, vec!["GET", "GET", "GET", "POST"]);
    }

    async fn request_methods(server: &MockServer) -> Vec<String> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| r.method.as_str().to_string())
            .collect()
    }

    /// First POST hangs past the client timeout, later POSTs succeed.
    async fn mount_stalling_update(server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(800)))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(server)
            .await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(server)
            .await;
    }

    fn timing_out(server: &MockServer) -> WriterConfig {
        WriterConfig {
            timeout: Some(Duration::from_millis(200)),
            ..config(server)
        }
    }

    #[tokio::test]
    async fn test_add_batch_retried_after_connection_loss() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        mount_stalling_update(&server).await;

        let writer = SearchWriter::new(timing_out(&server)).unwrap();
        let report = writer
            .deliver(&adds(2), &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.add_batches, 1);
        assert_eq!(report.failed_add_batches, 0);
        assert_eq!(report.adds_sent, 2);
        assert_eq!(
            request_methods(&server).await,
            vec!["GET", "POST", "GET", "POST"]
        );
    }

    #[tokio::test]
    async fn test_deletes_retried_after_connection_loss() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        mount_stalling_update(&server).await;

        let docs = ExtractResult {
            adds: vec![],
            deletes: vec![DeleteDirective { id: json!("1_2") }],
        };
        let writer = SearchWriter::new(timing_out(&server)).unwrap();
        let report = writer
            .deliver(&docs, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.success);
        assert_eq!(report.deletes_sent, 1);
        assert_eq!(
            request_methods(&server).await,
            vec!["GET", "POST", "GET", "POST"]
        );
        let bodies = posts(&server).await;
        assert_eq!(bodies[0], bodies[1]);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_wait() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(PING_PATH))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let writer = SearchWriter::new(
            config(&server).with_health_check_interval(Duration::from_secs(3600)),
        )
        .unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let result = writer.deliver(&adds(1), &cancel).await;
        assert!(matches!(result, Err(WriterError::Cancelled)));
        assert!(posts(&server).await.is_empty());
    }

    #[tokio::test]
    async fn test_replayed_delivery_is_identical() {
        let server = MockServer::start().await;
        mount_healthy_ping(&server).await;
        Mock::given(method("POST"))
            .and(path(UPDATE_PATH))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let mut docs = adds(3);
        docs.deletes = vec![DeleteDirective { id: json!("9") }];
        let writer = SearchWriter::new(config(&server)).unwrap();
        let cancel = CancellationToken::new();

        let first = writer.deliver(&docs, &cancel).await.unwrap();
        let second = writer.deliver(&docs, &cancel).await.unwrap();
        assert_eq!(first, second);

        let bodies = posts(&server).await;
        assert_eq!(bodies.len(), 4);
        assert_eq!(bodies[0], bodies[2]);
        assert_eq!(bodies[1], bodies[3]);
    }
}
