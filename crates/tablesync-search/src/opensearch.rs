//! REST client for Elasticsearch and OpenSearch clusters.
//!
//! Speaks the small subset of the REST API the sync engine needs: `_bulk`,
//! index existence (`HEAD /{index}`), index creation (`PUT /{index}`) and a
//! root ping. Works against self-managed clusters (no auth or basic auth)
//! and AWS-managed domains (SigV4, feature `aws`).
//!
//! # Example
//!
//! ```rust,no_run
//! use tablesync_search::opensearch::{Auth, OpenSearchClient};
//! use std::time::Duration;
//!
//! # fn example() -> Result<(), tablesync_search::SearchError> {
//! let client = OpenSearchClient::builder()
//!     .endpoint("https://search-orders.eu-west-1.es.amazonaws.com")
//!     .auth(Auth::aws_sigv4("eu-west-1", "es"))
//!     .timeout(Duration::from_secs(10))
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::engine::{BulkItemResult, BulkOperation, BulkResponse, IndexSettings, Refresh, SearchEngine};
use crate::error::{SearchError, SearchResult};
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use url::Url;

#[cfg(feature = "aws")]
use crate::sigv4::SigV4Signer;

/// Default request timeout
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default connect timeout
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum error body bytes to read (prevent unbounded allocation)
const MAX_ERROR_BODY_BYTES: usize = 4096;

/// Error type the cluster returns when an index already exists
const ALREADY_EXISTS_ERROR: &str = "resource_already_exists_exception";

/// Cluster authentication
#[derive(Debug, Clone, Default)]
pub enum Auth {
    #[default]
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    /// Sign every request with the ambient AWS credentials
    #[cfg(feature = "aws")]
    AwsSigV4 { region: String, service: String },
}

impl Auth {
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Auth::Basic {
            username: username.into(),
            password: SecretString::from(password.into()),
        }
    }

    #[cfg(feature = "aws")]
    pub fn aws_sigv4(region: impl Into<String>, service: impl Into<String>) -> Self {
        Auth::AwsSigV4 {
            region: region.into(),
            service: service.into(),
        }
    }
}

enum RequestAuth {
    None,
    Basic {
        username: String,
        password: SecretString,
    },
    #[cfg(feature = "aws")]
    SigV4(SigV4Signer),
}

/// Builder for [`OpenSearchClient`]
#[derive(Debug, Default)]
pub struct OpenSearchClientBuilder {
    endpoint: Option<String>,
    auth: Auth,
    timeout: Option<Duration>,
    connect_timeout: Option<Duration>,
}

impl OpenSearchClientBuilder {
    /// Cluster base URL (required)
    pub fn endpoint(mut self, url: impl Into<String>) -> Self {
        self.endpoint = Some(url.into());
        self
    }

    pub fn auth(mut self, auth: Auth) -> Self {
        self.auth = auth;
        self
    }

    /// Per-request timeout (default: 30s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// TCP connect timeout (default: 5s)
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Build the client
    pub fn build(self) -> SearchResult<OpenSearchClient> {
        let endpoint = self
            .endpoint
            .ok_or_else(|| SearchError::Config("endpoint is required".to_string()))?;
        let endpoint = endpoint.trim_end_matches('/').to_string();

        let parsed = Url::parse(&endpoint)
            .map_err(|e| SearchError::Config(format!("invalid endpoint '{endpoint}': {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SearchError::Config(format!(
                "endpoint must start with http:// or https://, got: {endpoint}"
            )));
        }
        if parsed.host_str().is_none() {
            return Err(SearchError::Config(format!("endpoint has no host: {endpoint}")));
        }

        let auth = match self.auth {
            Auth::None => RequestAuth::None,
            Auth::Basic { username, password } => {
                if username.is_empty() {
                    return Err(SearchError::Config(
                        "basic auth username must not be empty".to_string(),
                    ));
                }
                let local = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1"));
                if parsed.scheme() == "http" && !local {
                    warn!("Cluster endpoint uses plain HTTP, basic auth credentials are sent in cleartext");
                }
                RequestAuth::Basic { username, password }
            }
            #[cfg(feature = "aws")]
            Auth::AwsSigV4 { region, service } => {
                if region.is_empty() || service.is_empty() {
                    return Err(SearchError::Config(
                        "SigV4 auth needs a region and a service".to_string(),
                    ));
                }
                RequestAuth::SigV4(SigV4Signer::new(region, service))
            }
        };

        let timeout = self.timeout.unwrap_or(DEFAULT_TIMEOUT);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(self.connect_timeout.unwrap_or(DEFAULT_CONNECT_TIMEOUT))
            .pool_max_idle_per_host(8)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| SearchError::Config(format!("failed to build HTTP client: {e}")))?;

        debug!(endpoint = %endpoint, timeout_ms = timeout.as_millis() as u64, "Search client initialized");

        Ok(OpenSearchClient {
            endpoint,
            client,
            auth,
        })
    }
}

/// Elasticsearch / OpenSearch REST client
pub struct OpenSearchClient {
    endpoint: String,
    client: reqwest::Client,
    auth: RequestAuth,
}

impl std::fmt::Debug for OpenSearchClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let auth = match &self.auth {
            RequestAuth::None => "none",
            RequestAuth::Basic { .. } => "basic",
            #[cfg(feature = "aws")]
            RequestAuth::SigV4(_) => "aws_sigv4",
        };
        f.debug_struct("OpenSearchClient")
            .field("endpoint", &self.endpoint)
            .field("auth", &auth)
            .finish()
    }
}

// ─────────────────────────────────────────────────────────────────
// Wire types
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct WireBulkResponse {
    #[serde(default)]
    took: u64,
    #[serde(default)]
    items: Vec<HashMap<String, WireBulkItem>>,
}

#[derive(Debug, Deserialize)]
struct WireBulkItem {
    status: u16,
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<WireError>,
}

/// Error object; some engine versions send a bare string instead
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireError {
    Detail {
        #[serde(rename = "type")]
        error_type: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Message(String),
}

impl WireError {
    fn into_parts(self) -> (String, Option<String>) {
        match self {
            WireError::Detail { error_type, reason } => (error_type, reason),
            WireError::Message(message) => ("error".to_string(), Some(message)),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireErrorResponse {
    error: WireError,
}

impl From<WireBulkItem> for BulkItemResult {
    fn from(item: WireBulkItem) -> Self {
        let (error_type, reason) = match item.error.map(WireError::into_parts) {
            Some((error_type, reason)) => (Some(error_type), reason),
            None => (None, None),
        };
        BulkItemResult {
            status: item.status,
            result: item.result,
            error_type,
            reason,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Requests
// ─────────────────────────────────────────────────────────────────

impl OpenSearchClient {
    /// Create a builder
    pub fn builder() -> OpenSearchClientBuilder {
        OpenSearchClientBuilder::default()
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str, query: &[(&str, &str)]) -> SearchResult<Url> {
        let mut url = Url::parse(&format!("{}/{}", self.endpoint, path))
            .map_err(|e| SearchError::Config(format!("invalid request path '{path}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, &str)],
        body: Option<(&'static str, Vec<u8>)>,
    ) -> SearchResult<reqwest::Response> {
        let url = self.url(path, query)?;
        let mut request = self.client.request(method.clone(), url.clone());

        match &self.auth {
            RequestAuth::None => {}
            RequestAuth::Basic { username, password } => {
                request = request.basic_auth(username, Some(password.expose_secret()));
            }
            #[cfg(feature = "aws")]
            RequestAuth::SigV4(signer) => {
                let payload = body.as_ref().map(|(_, bytes)| bytes.as_slice()).unwrap_or(&[]);
                for (name, value) in signer.sign(method.as_str(), &url, payload).await? {
                    request = request.header(name, value);
                }
            }
        }

        if let Some((content_type, bytes)) = body {
            request = request.header(CONTENT_TYPE, content_type).body(bytes);
        }

        Ok(request.send().await?)
    }

    /// Classify a non-success response
    async fn parse_error_response(&self, response: reqwest::Response) -> SearchError {
        let status = response.status().as_u16();

        let retry_after_secs = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());

        // Read body with bounded allocation
        let body = match response.bytes().await {
            Ok(b) => b.slice(..b.len().min(MAX_ERROR_BODY_BYTES)),
            Err(_) => Default::default(),
        };

        let (error_type, reason) = match serde_json::from_slice::<WireErrorResponse>(&body) {
            Ok(parsed) => {
                let (error_type, reason) = parsed.error.into_parts();
                (Some(error_type), reason)
            }
            Err(_) => (None, None),
        };
        debug!(status, error_type = ?error_type, reason = ?reason, "Cluster returned an error");

        if error_type.as_deref() == Some(ALREADY_EXISTS_ERROR) {
            return SearchError::IndexAlreadyExists(ALREADY_EXISTS_ERROR.to_string());
        }
        match SearchError::from_status(status, error_type) {
            SearchError::RateLimited { .. } => SearchError::RateLimited { retry_after_secs },
            other => other,
        }
    }
}

#[async_trait]
impl SearchEngine for OpenSearchClient {
    fn name(&self) -> &str {
        "opensearch"
    }

    async fn ping(&self) -> SearchResult<()> {
        let response = self.send(Method::GET, "", &[], None).await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(self.parse_error_response(response).await)
        }
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        let response = self.send(Method::HEAD, index, &[], None).await?;
        match response.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => Err(self.parse_error_response(response).await),
        }
    }

    async fn create_index(&self, index: &str, settings: &IndexSettings) -> SearchResult<()> {
        let body = serde_json::to_vec(&settings.to_body())?;
        let response = self
            .send(Method::PUT, index, &[], Some(("application/json", body)))
            .await?;
        if response.status().is_success() {
            debug!(index, "Index created");
            Ok(())
        } else {
            Err(self.parse_error_response(response).await)
        }
    }

    async fn bulk(
        &self,
        operations: &[BulkOperation],
        refresh: Refresh,
    ) -> SearchResult<BulkResponse> {
        if operations.is_empty() {
            return Ok(BulkResponse::default());
        }

        let mut body = Vec::with_capacity(operations.len() * 256);
        for op in operations {
            op.write_ndjson(&mut body)?;
        }

        let refresh_param = [("refresh", refresh.as_str())];
        let query: &[(&str, &str)] = match refresh {
            Refresh::False => &[],
            _ => &refresh_param,
        };

        let start = Instant::now();
        let response = self
            .send(
                Method::POST,
                "_bulk",
                query,
                Some(("application/x-ndjson", body)),
            )
            .await?;

        if !response.status().is_success() {
            return Err(self.parse_error_response(response).await);
        }

        let wire: WireBulkResponse = response.json().await?;
        if wire.items.len() != operations.len() {
            return Err(SearchError::Serialization(format!(
                "bulk response has {} items for {} actions",
                wire.items.len(),
                operations.len()
            )));
        }

        let items = wire
            .items
            .into_iter()
            .map(|mut entry| {
                let action = entry.keys().next().cloned().unwrap_or_default();
                entry.remove(&action).map(BulkItemResult::from).ok_or_else(|| {
                    SearchError::Serialization("bulk response item has no action".to_string())
                })
            })
            .collect::<SearchResult<Vec<_>>>()?;

        debug!(
            actions = operations.len(),
            took_ms = wire.took,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Bulk request completed"
        );

        Ok(BulkResponse {
            took_ms: wire.took,
            items,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_requires_endpoint() {
        let err = OpenSearchClient::builder().build().unwrap_err();
        assert_eq!(err, SearchError::Config("endpoint is required".into()));
    }

    #[test]
    fn test_builder_validates_scheme() {
        let err = OpenSearchClient::builder()
            .endpoint("ftp://cluster")
            .build()
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_builder_rejects_empty_username() {
        let err = OpenSearchClient::builder()
            .endpoint("https://cluster:9200")
            .auth(Auth::basic("", "pw"))
            .build()
            .unwrap_err();
        assert!(matches!(err, SearchError::Config(_)));
    }

    #[test]
    fn test_url_building() {
        let client = OpenSearchClient::builder()
            .endpoint("http://localhost:9200/")
            .build()
            .unwrap();
        assert_eq!(client.endpoint(), "http://localhost:9200");
        assert_eq!(
            client.url("_bulk", &[("refresh", "wait_for")]).unwrap().as_str(),
            "http://localhost:9200/_bulk?refresh=wait_for"
        );
        assert_eq!(
            client.url("", &[]).unwrap().as_str(),
            "http://localhost:9200/"
        );
    }

    #[test]
    fn test_debug_redacts_credentials() {
        let client = OpenSearchClient::builder()
            .endpoint("http://localhost:9200")
            .auth(Auth::basic("admin", "hunter2"))
            .build()
            .unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("basic"));
        assert!(!debug.contains("hunter2"));
        assert!(!format!("{:?}", Auth::basic("admin", "hunter2")).contains("hunter2"));
    }

    #[test]
    fn test_wire_bulk_item_conversion() {
        let wire: WireBulkResponse = serde_json::from_str(
            r#"{"took": 3, "errors": true, "items": [
                {"index": {"_index": "t", "_id": "1", "status": 201, "result": "created"}},
                {"delete": {"_index": "t", "_id": "2", "status": 404, "result": "not_found"}},
                {"index": {"_index": "t", "_id": "3", "status": 400,
                    "error": {"type": "mapper_parsing_exception", "reason": "failed to parse"}}}
            ]}"#,
        )
        .unwrap();
        let items: Vec<BulkItemResult> = wire
            .items
            .into_iter()
            .flat_map(|m| m.into_values())
            .map(BulkItemResult::from)
            .collect();
        assert_eq!(items[0], BulkItemResult::ok(201, "created"));
        assert!(items[1].is_not_found());
        assert_eq!(items[2].error_type.as_deref(), Some("mapper_parsing_exception"));
        assert_eq!(items[2].reason.as_deref(), Some("failed to parse"));
    }
}
