//! Content service access.
//!
//! For one host and at most [`MAX_IDS_PER_REQUEST`] page ids, asks the
//! host's indexer controller for the current documents and classifies them
//! into adds and deletes.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, error, warn};

use indexer_types::{ExtractResult, HostSlice, Settings, SolrDocument, MAX_IDS_PER_REQUEST};

use crate::error::FetchError;

/// Controller name the content service routes index lookups to.
const INDEXER_CONTROLLER: &str = "WikiaSearchIndexer";

/// Method on the indexer controller that returns documents.
const INDEXER_METHOD: &str = "get";

/// Source of current page documents.
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Fetch and classify the documents for one host slice.
    ///
    /// When `indexed_at` is set every add document is stamped with it.
    async fn fetch(
        &self,
        slice: &HostSlice,
        indexed_at: Option<&str>,
    ) -> Result<ExtractResult, FetchError>;
}

/// Configuration for the HTTP content source.
#[derive(Debug, Clone)]
pub struct ContentServiceConfig {
    /// Service selector passed as the `service` parameter
    pub index_service: String,

    /// Path appended to each host (e.g. "wikia.php")
    pub entry_point: String,

    /// Where hosts that do not exist redirect to
    pub invalid_destination_url: String,

    /// Request timeout; `None` waits indefinitely
    pub timeout: Option<Duration>,
}

impl ContentServiceConfig {
    /// Build from daemon settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            index_service: settings.index_service.clone(),
            entry_point: settings.content_entry_point.clone(),
            invalid_destination_url: settings.invalid_destination_url.clone(),
            timeout: settings.request_timeout(),
        }
    }
}

impl Default for ContentServiceConfig {
    fn default() -> Self {
        Self::from_settings(&Settings::default())
    }
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    contents: Vec<SolrDocument>,
}

/// Content source backed by the per-host HTTP application.
pub struct HttpContentSource {
    client: Client,
    config: ContentServiceConfig,
}

impl HttpContentSource {
    /// Create a new HTTP content source.
    pub fn new(config: ContentServiceConfig) -> Result<Self, FetchError> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|e| FetchError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Entry point URL for a host. Bare host names are requested over http.
    pub fn entry_url(&self, server_name: &str) -> String {
        let base = if server_name.contains("://") {
            server_name.trim_end_matches('/').to_string()
        } else {
            format!("http://{}", server_name.trim_end_matches('/'))
        };
        format!("{}/{}", base, self.config.entry_point)
    }
}

#[async_trait]
impl ContentSource for HttpContentSource {
    async fn fetch(
        &self,
        slice: &HostSlice,
        indexed_at: Option<&str>,
    ) -> Result<ExtractResult, FetchError> {
        debug_assert!(slice.len() <= MAX_IDS_PER_REQUEST);

        let host = slice.server_name.clone();
        let ids = slice.joined_ids();
        let params = [
            ("controller", INDEXER_CONTROLLER),
            ("method", INDEXER_METHOD),
            ("service", self.config.index_service.as_str()),
            ("ids", ids.as_str()),
        ];

        let response = self
            .client
            .get(self.entry_url(&host))
            .query(&params)
            .send()
            .await
            .map_err(|e| FetchError::Unreachable {
                host: host.clone(),
                message: e.to_string(),
            })?;

        let status = response.status();
        let final_url = response.url().to_string();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchError::Status {
                host,
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await.map_err(|e| FetchError::Decode {
            url: final_url.clone(),
            message: e.to_string(),
        })?;

        let decoded: ContentResponse = match serde_json::from_str(&body) {
            Ok(decoded) => decoded,
            Err(_) if final_url.starts_with(&self.config.invalid_destination_url) => {
                return Err(FetchError::InvalidDestination { host });
            }
            Err(e) => {
                return Err(FetchError::Decode {
                    url: final_url,
                    message: format!("{}: {}", e, truncate(&body, 200)),
                });
            }
        };

        let result = ExtractResult::classify(decoded.contents, indexed_at);
        debug!(
            host = %host,
            ids = slice.len(),
            adds = result.adds.len(),
            deletes = result.deletes.len(),
            "Fetched slice"
        );
        Ok(result)
    }
}

/// Log a slice failure at the level its kind deserves.
pub fn log_fetch_failure(slice: &HostSlice, err: &FetchError) {
    match err {
        FetchError::InvalidDestination { host } => {
            debug!(host = %host, "Host is not a valid destination, skipping slice");
        }
        FetchError::Unreachable { .. } => {
            warn!(host = %slice.server_name, ids = %slice.joined_ids(), error = %err, "Dropping slice");
        }
        _ => {
            error!(host = %slice.server_name, ids = %slice.joined_ids(), error = %err, "Request to index service failed");
        }
    }
}

fn truncate(s: &str, max_len: usize) -> &str {
    match s.char_indices().nth(max_len) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn slice(host: &str, ids: Vec<u64>) -> HostSlice {
        HostSlice {
            server_name: host.to_string(),
            page_ids: ids,
        }
    }

    fn source() -> HttpContentSource {
        HttpContentSource::new(ContentServiceConfig::default()).unwrap()
    }

    #[test]
    fn test_entry_url() {
        let source = source();
        assert_eq!(
            source.entry_url("muppet.wikia.com"),
            "http://muppet.wikia.com/wikia.php"
        );
        assert_eq!(
            source.entry_url("http://127.0.0.1:8080/"),
            "http://127.0.0.1:8080/wikia.php"
        );
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc");
        assert_eq!(truncate("ab", 3), "ab");
    }

    #[tokio::test]
    async fn test_fetch_classifies_documents() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wikia.php"))
            .and(query_param("controller", "WikiaSearchIndexer"))
            .and(query_param("method", "get"))
            .and(query_param("service", "All"))
            .and(query_param("ids", "1|2|3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "contents": [
                    {"id": "10_1", "title": "Kermit"},
                    {"delete": {"id": "10_2"}},
                    {"id": "10_3", "title": "Gonzo"}
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let result = source()
            .fetch(&slice(&server.uri(), vec![1, 2, 3]), Some("2026-10-17T00:00:00.000000Z"))
            .await
            .unwrap();

        assert_eq!(result.adds.len(), 2);
        assert_eq!(result.deletes.len(), 1);
        assert_eq!(result.deletes[0].id, json!("10_2"));
        assert!(result
            .adds
            .iter()
            .all(|d| d.indexed_at() == Some("2026-10-17T00:00:00.000000Z")));
    }

    #[tokio::test]
    async fn test_fetch_without_stamp() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/wikia.php"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"contents": [{"id": "10_1"}]})),
            )
            .mount(&server)
            .await;

        let result = source()
            .fetch(&slice(&server.uri(), vec![1]), None)
            .await
            .unwrap();
        assert!(result.adds[0].indexed_at().is_none());
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("fatal"))
            .mount(&server)
            .await;

        let err = source()
            .fetch(&slice(&server.uri(), vec![1]), None)
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 500);
                assert_eq!(body, "fatal");
            }
            other => panic!("Expected Status error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_fetch_undecodable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let err = source()
            .fetch(&slice(&server.uri(), vec![1]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
        assert!(!err.is_expected());
    }

    #[tokio::test]
    async fn test_fetch_invalid_destination_is_expected() {
        let server = MockServer::start().await;
        let invalid_url = format!("{}/wiki/Not_a_valid_Wikia", server.uri());
        Mock::given(method("GET"))
            .and(path("/wikia.php"))
            .respond_with(
                ResponseTemplate::new(302).insert_header("Location", invalid_url.as_str()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wiki/Not_a_valid_Wikia"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not valid</html>"))
            .mount(&server)
            .await;

        let config = ContentServiceConfig {
            invalid_destination_url: invalid_url,
            ..Default::default()
        };
        let source = HttpContentSource::new(config).unwrap();
        let err = source
            .fetch(&slice(&server.uri(), vec![1]), None)
            .await
            .unwrap_err();
        assert!(err.is_expected());
    }

    #[tokio::test]
    async fn test_fetch_unreachable_host() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = source()
            .fetch(&slice(&format!("http://{}", addr), vec![1]), None)
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Unreachable { .. }));
    }
}
