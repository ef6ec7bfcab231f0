//! The search engine seam and the request / response types it speaks.

use crate::error::SearchResult;
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::fmt;

/// Index-time refresh behaviour for bulk writes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Refresh {
    /// Rely on the engine's periodic refresh
    #[default]
    False,
    /// Force a refresh of the affected shards
    True,
    /// Block until the next periodic refresh makes the writes visible
    WaitFor,
}

impl Refresh {
    pub fn as_str(&self) -> &'static str {
        match self {
            Refresh::False => "false",
            Refresh::True => "true",
            Refresh::WaitFor => "wait_for",
        }
    }
}

/// Settings for index creation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSettings {
    /// `index.mapping.coerce`: let the engine coerce numeric strings
    pub coerce: bool,
    pub number_of_shards: Option<u32>,
    pub number_of_replicas: Option<u32>,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            coerce: true,
            number_of_shards: None,
            number_of_replicas: None,
        }
    }
}

impl IndexSettings {
    /// Request body for index creation
    pub fn to_body(&self) -> Value {
        let mut settings = Map::new();
        settings.insert("index.mapping.coerce".into(), json!(self.coerce));
        if let Some(shards) = self.number_of_shards {
            settings.insert("index.number_of_shards".into(), json!(shards));
        }
        if let Some(replicas) = self.number_of_replicas {
            settings.insert("index.number_of_replicas".into(), json!(replicas));
        }
        json!({ "settings": settings })
    }
}

/// One action of a bulk request
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Create or replace a document
    Index {
        index: String,
        id: String,
        document: Map<String, Value>,
    },
    Delete {
        index: String,
        id: String,
    },
}

impl BulkOperation {
    pub fn index(&self) -> &str {
        match self {
            BulkOperation::Index { index, .. } | BulkOperation::Delete { index, .. } => index,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            BulkOperation::Index { id, .. } | BulkOperation::Delete { id, .. } => id,
        }
    }

    pub fn action(&self) -> &'static str {
        match self {
            BulkOperation::Index { .. } => "index",
            BulkOperation::Delete { .. } => "delete",
        }
    }

    /// Append this action to an NDJSON bulk body
    pub fn write_ndjson(&self, out: &mut Vec<u8>) -> SearchResult<()> {
        let header = json!({ self.action(): { "_index": self.index(), "_id": self.id() } });
        serde_json::to_writer(&mut *out, &header)?;
        out.push(b'\n');
        if let BulkOperation::Index { document, .. } = self {
            serde_json::to_writer(&mut *out, document)?;
            out.push(b'\n');
        }
        Ok(())
    }
}

/// Outcome of one bulk action, aligned with the request order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemResult {
    pub status: u16,
    /// `created`, `updated`, `deleted`, `not_found`, ...
    pub result: Option<String>,
    /// Engine error type, e.g. `mapper_parsing_exception`
    pub error_type: Option<String>,
    /// Engine error reason. May echo document values; log at debug only.
    pub reason: Option<String>,
}

impl BulkItemResult {
    pub fn ok(status: u16, result: &str) -> Self {
        Self {
            status,
            result: Some(result.to_string()),
            error_type: None,
            reason: None,
        }
    }

    pub fn failed(status: u16, error_type: &str) -> Self {
        Self {
            status,
            result: None,
            error_type: Some(error_type.to_string()),
            reason: None,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error_type.is_none()
    }

    /// Document or index was not there (status 404)
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }
}

impl fmt::Display for BulkItemResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.error_type, &self.result) {
            (Some(error_type), _) => write!(f, "{} {}", self.status, error_type),
            (None, Some(result)) => write!(f, "{} {}", self.status, result),
            (None, None) => write!(f, "{}", self.status),
        }
    }
}

/// Response to a bulk request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkResponse {
    pub took_ms: u64,
    pub items: Vec<BulkItemResult>,
}

impl BulkResponse {
    /// Position of the first item that did not succeed
    pub fn first_failure(&self) -> Option<usize> {
        self.items.iter().position(|item| !item.is_success())
    }
}

/// A search cluster that documents can be written to.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait SearchEngine: Send + Sync {
    /// Engine name (e.g., "opensearch")
    fn name(&self) -> &str;

    /// Check the cluster is reachable and credentials are accepted
    async fn ping(&self) -> SearchResult<()>;

    async fn index_exists(&self, index: &str) -> SearchResult<bool>;

    /// Create an index. Fails with
    /// [`SearchError::IndexAlreadyExists`](crate::SearchError::IndexAlreadyExists)
    /// when another writer created it first.
    async fn create_index(&self, index: &str, settings: &IndexSettings) -> SearchResult<()>;

    /// Submit actions in one bulk request. Per-item failures are reported in
    /// the response, request-level failures as errors.
    async fn bulk(
        &self,
        operations: &[BulkOperation],
        refresh: Refresh,
    ) -> SearchResult<BulkResponse>;
}
