//! Applies one delivered batch to the search cluster.
//!
//! A batch goes through two phases:
//!
//! 1. **Prepare**: each record, in delivery order, is decoded, given a
//!    document id and turned into a bulk action. Upserts make sure their
//!    index exists first. Deletes never create an index: the cluster does
//!    not auto-create indices for bulk deletes, and a delete aimed at a
//!    missing index reports not found, which counts as applied.
//! 2. **Submit**: the actions go out in order as bulk requests of at most
//!    `max_bulk_actions`. Transient failures are retried from the first
//!    failed action, so writes to the same document never overtake each
//!    other.
//!
//! The first failure ends the batch. With [`FailurePolicy::FailFast`] the
//! whole batch is failed; with [`FailurePolicy::ReportFailedItems`] the
//! failed record and every record after it are reported for redelivery.
//! Cancellation and the batch deadline always fail the whole batch.

use crate::config::{FailurePolicy, RetrySettings, SyncConfig};
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::IndexLifecycleManager;
use crate::metrics::names;
use metrics::{counter, histogram};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tablesync_core::{
    decode_image, document_id, BatchResponse, Operation, SchemaMappingStore, StreamRecord,
};
use tablesync_search::{BulkItemResult, BulkOperation, Refresh, SearchEngine, SearchError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Engine error type for writes to an index that does not exist
const INDEX_NOT_FOUND: &str = "index_not_found_exception";

/// Knobs of the dispatcher, usually taken from [`SyncConfig`]
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub refresh: Refresh,
    pub failure_policy: FailurePolicy,
    pub max_bulk_actions: usize,
    pub batch_deadline: Duration,
    pub retry: RetrySettings,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            refresh: Refresh::False,
            failure_policy: FailurePolicy::FailFast,
            max_bulk_actions: 1_000,
            batch_deadline: Duration::from_secs(60),
            retry: RetrySettings::default(),
        }
    }
}

impl From<&SyncConfig> for DispatchSettings {
    fn from(config: &SyncConfig) -> Self {
        Self {
            refresh: config.sync.refresh.as_refresh(),
            failure_policy: config.sync.failure_policy,
            max_bulk_actions: config.sync.max_bulk_actions,
            batch_deadline: config.sync.batch_deadline(),
            retry: config.retry.clone(),
        }
    }
}

/// Result of a batch that was not failed as a whole
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records acknowledged by the cluster
    pub applied: usize,
    pub upserted: usize,
    pub deleted: usize,
    /// Sequence numbers of records to redeliver, in delivery order
    pub failed_items: Vec<String>,
}

impl BatchOutcome {
    pub fn is_complete(&self) -> bool {
        self.failed_items.is_empty()
    }

    /// Partial-failure response for the host
    pub fn into_response(self) -> BatchResponse {
        BatchResponse::from_identifiers(self.failed_items)
    }
}

/// A bulk action together with the delivery position of its record
#[derive(Debug)]
struct PreparedWrite {
    position: usize,
    operation: Operation,
    action: BulkOperation,
    /// Source change time in epoch seconds
    created_at: Option<f64>,
}

/// Where and why a batch stopped
#[derive(Debug)]
struct BatchFailure {
    position: usize,
    error: SyncError,
}

enum ItemVerdict {
    Applied,
    Transient(SearchError),
    Permanent(SyncError),
}

#[derive(Debug, Default)]
struct Applied {
    upserted: usize,
    deleted: usize,
}

/// Turns change-stream batches into ordered bulk writes
pub struct SyncDispatcher {
    engine: Arc<dyn SearchEngine>,
    lifecycle: Arc<IndexLifecycleManager>,
    mappings: Arc<SchemaMappingStore>,
    settings: DispatchSettings,
}

impl SyncDispatcher {
    pub fn new(
        engine: Arc<dyn SearchEngine>,
        lifecycle: Arc<IndexLifecycleManager>,
        mappings: Arc<SchemaMappingStore>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            mappings,
            settings,
        }
    }

    /// Apply `records` in delivery order.
    ///
    /// Returns `Err` when the whole batch has to be redelivered, otherwise
    /// the outcome with any records to redeliver.
    pub async fn dispatch(
        &self,
        records: &[StreamRecord],
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> SyncResult<BatchOutcome> {
        let mut writes = Vec::with_capacity(records.len());
        let mut failure = None;

        for (position, record) in records.iter().enumerate() {
            self.check_interrupted(cancel, deadline)?;
            match self.prepare(position, record, cancel, deadline).await {
                Ok(write) => writes.push(write),
                Err(error) => {
                    failure = Some(BatchFailure { position, error });
                    break;
                }
            }
        }

        // Under fail-fast a prepare failure fails the batch before any write
        if failure.is_some() && self.settings.failure_policy == FailurePolicy::FailFast {
            writes.clear();
        }

        let mut applied = Applied::default();
        if !writes.is_empty() {
            self.check_interrupted(cancel, deadline)?;
        }
        for chunk in writes.chunks(self.settings.max_bulk_actions.max(1)) {
            if let Err(write_failure) = self
                .submit_chunk(chunk, &mut applied, cancel, deadline)
                .await
            {
                // A failed write comes before any prepare failure
                failure = Some(write_failure);
                break;
            }
        }

        let outcome = BatchOutcome {
            applied: applied.upserted + applied.deleted,
            upserted: applied.upserted,
            deleted: applied.deleted,
            failed_items: Vec::new(),
        };

        let Some(BatchFailure { position, error }) = failure else {
            return Ok(outcome);
        };

        if matches!(error, SyncError::Cancelled | SyncError::DeadlineExceeded(_)) {
            counter!(names::RECORDS_FAILED).increment(records.len() as u64);
            return Err(error);
        }

        match self.settings.failure_policy {
            FailurePolicy::FailFast => {
                warn!(
                    position,
                    records = records.len(),
                    error_kind = error.kind(),
                    error = %error,
                    "Batch failed, whole batch will be redelivered"
                );
                counter!(names::RECORDS_FAILED).increment(records.len() as u64);
                Err(error)
            }
            FailurePolicy::ReportFailedItems => {
                let failed_items = records[position..]
                    .iter()
                    .map(|record| record.sequence_number().map(str::to_string))
                    .collect::<Option<Vec<_>>>();
                let Some(failed_items) = failed_items else {
                    warn!(
                        position,
                        error = %error,
                        "Record without sequence number, failing whole batch"
                    );
                    counter!(names::RECORDS_FAILED).increment(records.len() as u64);
                    return Err(error);
                };

                warn!(
                    position,
                    applied = outcome.applied,
                    redelivered = failed_items.len(),
                    error_kind = error.kind(),
                    error = %error,
                    "Batch stopped at failed record"
                );
                counter!(names::RECORDS_FAILED).increment(failed_items.len() as u64);
                Ok(BatchOutcome {
                    failed_items,
                    ..outcome
                })
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // Prepare
    // ─────────────────────────────────────────────────────────────────

    async fn prepare(
        &self,
        position: usize,
        record: &StreamRecord,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> SyncResult<PreparedWrite> {
        let change = record.to_change_record()?;
        let mapping = self.mappings.get(&change.source_table);
        let id = document_id(&change.source_table, &change.keys, mapping)?.into_string();
        let index = self.lifecycle.index_for_table(&change.source_table)?;

        let action = if change.operation.is_upsert() {
            let document = decode_image(change.upsert_image()?)?;
            self.guarded(self.lifecycle.ensure_index(&index), cancel, deadline)
                .await?;
            BulkOperation::Index {
                index,
                id,
                document,
            }
        } else {
            BulkOperation::Delete { index, id }
        };

        Ok(PreparedWrite {
            position,
            operation: change.operation,
            action,
            created_at: record.change.approximate_creation_date_time,
        })
    }

    // ─────────────────────────────────────────────────────────────────
    // Submit
    // ─────────────────────────────────────────────────────────────────

    /// Send one chunk, retrying transient failures from the first failed
    /// action onward.
    async fn submit_chunk(
        &self,
        chunk: &[PreparedWrite],
        applied: &mut Applied,
        cancel: &CancellationToken,
        deadline: Instant,
    ) -> Result<(), BatchFailure> {
        let retry = &self.settings.retry;
        let mut pending = chunk;
        let mut attempt = 0u32;

        loop {
            let head = pending[0].position;
            let fail = |error: SyncError| BatchFailure {
                position: head,
                error,
            };
            let operations: Vec<BulkOperation> =
                pending.iter().map(|w| w.action.clone()).collect();

            counter!(names::BULK_REQUESTS).increment(1);
            let started = std::time::Instant::now();
            let result = self
                .guarded(
                    async {
                        self.engine
                            .bulk(&operations, self.settings.refresh)
                            .await
                            .map_err(SyncError::from)
                    },
                    cancel,
                    deadline,
                )
                .await;
            histogram!(names::BULK_DURATION_MS).record(started.elapsed().as_secs_f64() * 1000.0);

            let transient = match result {
                Ok(response) => {
                    if response.items.len() != pending.len() {
                        return Err(fail(SyncError::Cluster(SearchError::Serialization(
                            format!(
                                "bulk response has {} items for {} actions",
                                response.items.len(),
                                pending.len()
                            ),
                        ))));
                    }

                    let first_failure = response.first_failure().unwrap_or(pending.len());
                    for write in &pending[..first_failure] {
                        self.record_applied(write, applied);
                    }

                    let mut stopped = None;
                    for (offset, (write, item)) in pending
                        .iter()
                        .zip(&response.items)
                        .enumerate()
                        .skip(first_failure)
                    {
                        match self.classify(write, item) {
                            ItemVerdict::Applied => {
                                self.record_applied(write, applied);
                            }
                            ItemVerdict::Transient(error) => {
                                stopped = Some((offset, error));
                                break;
                            }
                            ItemVerdict::Permanent(error) => {
                                return Err(BatchFailure {
                                    position: write.position,
                                    error,
                                });
                            }
                        }
                    }

                    match stopped {
                        None => return Ok(()),
                        Some((offset, error)) => {
                            pending = &pending[offset..];
                            error
                        }
                    }
                }
                Err(SyncError::TransientCluster(error)) => error,
                Err(error) => return Err(fail(error)),
            };

            let head = pending[0].position;
            if attempt >= retry.max_retries {
                warn!(
                    position = head,
                    attempts = attempt + 1,
                    error = %transient,
                    "Giving up on transient bulk failure"
                );
                return Err(BatchFailure {
                    position: head,
                    error: SyncError::TransientCluster(transient),
                });
            }

            let mut delay =
                calculate_backoff(attempt, retry.initial_backoff_ms, retry.max_backoff_ms);
            if let SearchError::RateLimited {
                retry_after_secs: Some(secs),
            } = &transient
            {
                delay = delay.max(Duration::from_secs(*secs));
            }
            if Instant::now() + delay >= deadline {
                warn!(
                    position = head,
                    delay_ms = delay.as_millis() as u64,
                    error = %transient,
                    "No time left in batch deadline to retry"
                );
                return Err(BatchFailure {
                    position: head,
                    error: SyncError::TransientCluster(transient),
                });
            }

            attempt += 1;
            counter!(names::BULK_RETRIES).increment(1);
            warn!(
                position = head,
                remaining = pending.len(),
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %transient,
                "Transient bulk failure, retrying"
            );

            self.guarded(
                async {
                    tokio::time::sleep(delay).await;
                    Ok(())
                },
                cancel,
                deadline,
            )
            .await
            .map_err(|error| BatchFailure {
                position: head,
                error,
            })?;

            // Indices reported missing were forgotten; recreate before resending
            for write in pending {
                if let BulkOperation::Index { index, .. } = &write.action {
                    if !self.lifecycle.is_known(index) {
                        self.guarded(self.lifecycle.ensure_index(index), cancel, deadline)
                            .await
                            .map_err(|error| BatchFailure {
                                position: write.position,
                                error,
                            })?;
                    }
                }
            }
        }
    }

    fn classify(&self, write: &PreparedWrite, item: &BulkItemResult) -> ItemVerdict {
        let index = write.action.index();
        let doc_id = write.action.id();

        if item.is_success() {
            return ItemVerdict::Applied;
        }

        if item.is_not_found() {
            if let BulkOperation::Delete { .. } = write.action {
                debug!(index, doc_id, "Document already absent");
                return ItemVerdict::Applied;
            }
            if item.error_type.as_deref() == Some(INDEX_NOT_FOUND) {
                warn!(index, doc_id, "Index disappeared, will recreate");
                self.lifecycle.forget(index);
                return ItemVerdict::Transient(SearchError::Transient { status: 404 });
            }
        }

        let error = SearchError::from_status(item.status, item.error_type.clone());
        if error.is_retryable() {
            debug!(index, doc_id, status = item.status, "Transient item failure");
            return ItemVerdict::Transient(error);
        }

        let error_type = item.error_type.clone().unwrap_or_else(|| "unknown".to_string());
        error!(
            index,
            doc_id,
            operation = write.operation.as_str(),
            status = item.status,
            error_type = %error_type,
            poison_pill = true,
            "Cluster rejected document"
        );
        if let Some(reason) = &item.reason {
            debug!(index, doc_id, reason = %reason, "Rejection reason");
        }
        counter!(names::RECORDS_PERMANENT_FAILURES).increment(1);

        ItemVerdict::Permanent(SyncError::PermanentWrite {
            index: index.to_string(),
            id: doc_id.to_string(),
            status: item.status,
            error_type,
        })
    }

    fn record_applied(&self, write: &PreparedWrite, applied: &mut Applied) {
        let index = write.action.index();
        let doc_id = write.action.id();
        match write.action {
            BulkOperation::Index { .. } => {
                applied.upserted += 1;
                counter!(names::RECORDS_UPSERTED).increment(1);
            }
            BulkOperation::Delete { .. } => {
                applied.deleted += 1;
                counter!(names::RECORDS_DELETED).increment(1);
            }
        }
        let lag_ms = write
            .created_at
            .and_then(|created| replication_lag_ms(created, SystemTime::now()));
        if let Some(lag_ms) = lag_ms {
            histogram!(names::REPLICATION_LAG_MS).record(lag_ms);
        }
        debug!(operation = write.operation.as_str(), index, doc_id, "Applied write");
    }

    // ─────────────────────────────────────────────────────────────────
    // Cancellation and deadline
    // ─────────────────────────────────────────────────────────────────

    fn check_interrupted(&self, cancel: &CancellationToken, deadline: Instant) -> SyncResult<()> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(SyncError::DeadlineExceeded(self.settings.batch_deadline));
        }
        Ok(())
    }

    /// Run `fut` unless the batch is cancelled or its deadline passes first
    async fn guarded<T, F>(&self, fut: F, cancel: &CancellationToken, deadline: Instant) -> SyncResult<T>
    where
        F: Future<Output = SyncResult<T>>,
    {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(SyncError::Cancelled),
            result = tokio::time::timeout_at(deadline, fut) => match result {
                Ok(inner) => inner,
                Err(_) => Err(SyncError::DeadlineExceeded(self.settings.batch_deadline)),
            },
        }
    }
}

/// Milliseconds between a change created at `created_secs` (epoch seconds)
/// and `now`. Clock skew never yields a negative lag.
fn replication_lag_ms(created_secs: f64, now: SystemTime) -> Option<f64> {
    let now_secs = now.duration_since(UNIX_EPOCH).ok()?.as_secs_f64();
    created_secs
        .is_finite()
        .then(|| ((now_secs - created_secs) * 1000.0).max(0.0))
}

/// Exponential backoff with jitter (prevents thundering herd).
fn calculate_backoff(attempt: u32, initial_ms: u64, max_ms: u64) -> Duration {
    let exp = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    let capped = initial_ms.saturating_mul(exp).min(max_ms);
    let jitter = rand::thread_rng().gen_range(0..=(capped / 4).max(1));
    Duration::from_millis(capped.saturating_add(jitter).min(max_ms.max(1)))
}
