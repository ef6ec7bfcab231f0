//! Error types for tablesync-search

/// Result type alias for search engine operations
pub type SearchResult<T> = std::result::Result<T, SearchError>;

/// Errors returned by a [`SearchEngine`](crate::SearchEngine).
///
/// Engine `reason` strings are never carried here since they can echo
/// document field values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    /// Client configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Authentication or authorization failure (401 / 403, signing)
    #[error("authentication error: {0}")]
    Auth(String),

    /// Request timeout
    #[error("timeout: {0}")]
    Timeout(String),

    /// Network / transport error
    #[error("connection error: {0}")]
    Connection(String),

    /// Cluster is shedding load (429)
    #[error("rate limited by cluster")]
    RateLimited {
        /// Retry-after hint in seconds (if sent by the cluster)
        retry_after_secs: Option<u64>,
    },

    /// Cluster-side failure (5xx)
    #[error("cluster error ({status})")]
    Transient { status: u16 },

    /// Index creation lost a race or the index already existed
    #[error("index already exists: {0}")]
    IndexAlreadyExists(String),

    /// Request rejected for a reason that will not change on retry
    #[error("request rejected ({status}): {}", .error_type.as_deref().unwrap_or("unknown"))]
    Rejected {
        status: u16,
        error_type: Option<String>,
    },

    /// Serialization / deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SearchError {
    /// Whether the same request may succeed when retried
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SearchError::Timeout(_)
                | SearchError::Connection(_)
                | SearchError::RateLimited { .. }
                | SearchError::Transient { .. }
        )
    }

    pub fn is_auth(&self) -> bool {
        matches!(self, SearchError::Auth(_))
    }

    /// HTTP status behind this error, when there was a response
    pub fn status(&self) -> Option<u16> {
        match self {
            SearchError::RateLimited { .. } => Some(429),
            SearchError::Transient { status } | SearchError::Rejected { status, .. } => {
                Some(*status)
            }
            SearchError::IndexAlreadyExists(_) => Some(400),
            _ => None,
        }
    }

    /// Classify an error status and optional engine error type
    pub fn from_status(status: u16, error_type: Option<String>) -> Self {
        match status {
            401 | 403 => SearchError::Auth(format!("cluster returned {status}")),
            429 => SearchError::RateLimited {
                retry_after_secs: None,
            },
            500..=599 => SearchError::Transient { status },
            _ => SearchError::Rejected { status, error_type },
        }
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SearchError::Timeout("request timed out".to_string())
        } else if err.is_connect() {
            SearchError::Connection(err.to_string())
        } else if let Some(status) = err.status() {
            SearchError::from_status(status.as_u16(), None)
        } else if err.is_decode() {
            SearchError::Serialization(err.to_string())
        } else {
            SearchError::Connection(err.to_string())
        }
    }
}

impl From<serde_json::Error> for SearchError {
    fn from(err: serde_json::Error) -> Self {
        SearchError::Serialization(err.to_string())
    }
}
