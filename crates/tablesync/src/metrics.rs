//! Metric names emitted through the `metrics` facade.
//!
//! No recorder is installed here; the host process decides where metrics go.
//! Document ids derived without a key-schema mapping are counted by
//! `tablesync-core` under [`tablesync_core::FALLBACK_METRIC`].

/// Standard sync metric names
pub mod names {
    /// Documents indexed (insert or modify)
    pub const RECORDS_UPSERTED: &str = "tablesync_records_upserted_total";
    /// Documents deleted, including deletes of absent documents
    pub const RECORDS_DELETED: &str = "tablesync_records_deleted_total";
    /// Records that failed to apply
    pub const RECORDS_FAILED: &str = "tablesync_records_failed_total";
    /// Records rejected by the cluster for their content
    pub const RECORDS_PERMANENT_FAILURES: &str = "tablesync_records_permanent_failures_total";
    /// Indices created by this worker
    pub const INDEX_CREATED: &str = "tablesync_index_created_total";
    /// Index creations lost to a concurrent writer
    pub const INDEX_CREATE_CONFLICTS: &str = "tablesync_index_create_conflicts_total";
    /// Bulk requests sent, retries included
    pub const BULK_REQUESTS: &str = "tablesync_bulk_requests_total";
    /// Bulk requests resent after a transient failure
    pub const BULK_RETRIES: &str = "tablesync_bulk_retries_total";
    /// Bulk request latency
    pub const BULK_DURATION_MS: &str = "tablesync_bulk_duration_ms";
    /// Time from the source change to its acknowledgement by the cluster
    pub const REPLICATION_LAG_MS: &str = "tablesync_replication_lag_ms";
    /// Batches fully applied
    pub const BATCHES_COMMITTED: &str = "tablesync_batches_committed_total";
    /// Batches applied up to a failed record
    pub const BATCHES_PARTIAL: &str = "tablesync_batches_partial_total";
    /// Batches that failed as a whole
    pub const BATCHES_FAILED: &str = "tablesync_batches_failed_total";
}
