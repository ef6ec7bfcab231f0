//! Error types for the sync worker

use std::time::Duration;
use tablesync_core::{DecodeError, IdentifierError, MappingError};
use tablesync_search::SearchError;

/// Result type alias for sync operations
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Why a record or batch could not be applied
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Record could not be decoded; redelivery will not help
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Document id could not be derived from the record keys
    #[error("identifier error: {0}")]
    Identifier(#[from] IdentifierError),

    /// Table name is not usable as an index name
    #[error("invalid index name '{0}': must match [0-9A-Za-z_-]+")]
    InvalidIndexName(String),

    /// Cluster failure that may clear up on redelivery (timeouts, 429, 5xx)
    #[error("transient cluster error: {0}")]
    TransientCluster(SearchError),

    /// Cluster failure that will not clear up on its own (auth, bad request)
    #[error("cluster error: {0}")]
    Cluster(SearchError),

    /// The cluster rejected one document; the record is a poison pill
    #[error("write of document '{id}' to index '{index}' rejected ({status}): {error_type}")]
    PermanentWrite {
        index: String,
        id: String,
        status: u16,
        error_type: String,
    },

    #[error("batch cancelled")]
    Cancelled,

    #[error("batch deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("configuration error: {0}")]
    Config(String),

    /// Key-schema mapping artifact could not be loaded
    #[error("mapping load failed: {0}")]
    MappingLoad(String),
}

impl SyncError {
    /// Whether redelivering the same records may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::TransientCluster(_)
                | SyncError::Cancelled
                | SyncError::DeadlineExceeded(_)
                | SyncError::MappingLoad(_)
        )
    }

    /// Whether the failure is tied to the record content itself
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            SyncError::Decode(_)
                | SyncError::Identifier(_)
                | SyncError::InvalidIndexName(_)
                | SyncError::PermanentWrite { .. }
        )
    }

    /// Short stable label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            SyncError::Decode(_) => "decode",
            SyncError::Identifier(_) => "identifier",
            SyncError::InvalidIndexName(_) => "invalid_index_name",
            SyncError::TransientCluster(_) => "transient_cluster",
            SyncError::Cluster(_) => "cluster",
            SyncError::PermanentWrite { .. } => "permanent_write",
            SyncError::Cancelled => "cancelled",
            SyncError::DeadlineExceeded(_) => "deadline_exceeded",
            SyncError::Config(_) => "config",
            SyncError::MappingLoad(_) => "mapping_load",
        }
    }
}

impl From<SearchError> for SyncError {
    fn from(err: SearchError) -> Self {
        match err {
            err if err.is_retryable() => SyncError::TransientCluster(err),
            SearchError::Config(msg) => SyncError::Config(msg),
            other => SyncError::Cluster(other),
        }
    }
}

impl From<MappingError> for SyncError {
    fn from(err: MappingError) -> Self {
        SyncError::MappingLoad(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_classification() {
        let transient: SyncError = SearchError::Transient { status: 503 }.into();
        assert!(matches!(transient, SyncError::TransientCluster(_)));
        assert!(transient.is_retryable());

        let auth: SyncError = SearchError::Auth("denied".into()).into();
        assert!(matches!(auth, SyncError::Cluster(_)));
        assert!(!auth.is_retryable());

        let config: SyncError = SearchError::Config("bad".into()).into();
        assert!(matches!(config, SyncError::Config(_)));
    }

    #[test]
    fn test_permanent_errors() {
        let err = SyncError::PermanentWrite {
            index: "orders".into(),
            id: "A1".into(),
            status: 400,
            error_type: "mapper_parsing_exception".into(),
        };
        assert!(err.is_permanent());
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "permanent_write");
        assert!(SyncError::Decode(DecodeError::MissingSourceArn).is_permanent());
        assert!(SyncError::Cancelled.is_retryable());
    }
}
