//! Per-partition worker: owns the cluster client and mapping store across
//! batches.
//!
//! State is created on first use and reused for every later batch handled
//! by the same worker. Concurrent first calls wait on a single
//! initialization; a failed initialization is retried by the next batch.

use crate::config::SyncConfig;
use crate::dispatcher::{DispatchSettings, SyncDispatcher};
use crate::error::{SyncError, SyncResult};
use crate::lifecycle::IndexLifecycleManager;
use crate::mapping_source::load_mappings;
use crate::metrics::names;
use metrics::counter;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tablesync_core::{BatchResponse, SchemaMappingStore, StreamEvent};
use tablesync_search::SearchEngine;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};

/// Long-lived state shared by all batches of a worker
struct WorkerState {
    engine: Arc<dyn SearchEngine>,
    dispatcher: SyncDispatcher,
}

/// Applies change-stream batches to the search cluster
pub struct Worker {
    config: SyncConfig,
    engine: Option<Arc<dyn SearchEngine>>,
    state: OnceCell<Arc<WorkerState>>,
}

impl Worker {
    /// Worker that connects to the configured cluster on first use
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            engine: None,
            state: OnceCell::new(),
        }
    }

    /// Worker that writes through `engine` instead of the configured cluster.
    /// Mappings are still loaded from the configured source on first use.
    pub fn with_engine(config: SyncConfig, engine: Arc<dyn SearchEngine>) -> Self {
        Self {
            config,
            engine: Some(engine),
            state: OnceCell::new(),
        }
    }

    /// Fully initialized worker with a preloaded mapping store
    pub fn with_parts(
        config: SyncConfig,
        engine: Arc<dyn SearchEngine>,
        mappings: SchemaMappingStore,
    ) -> Self {
        let state = build_state(&config, engine.clone(), mappings);
        Self {
            config,
            engine: Some(engine),
            state: OnceCell::new_with(Some(state)),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.state.initialized()
    }

    async fn state(&self) -> SyncResult<&Arc<WorkerState>> {
        self.state.get_or_try_init(|| self.init()).await
    }

    async fn init(&self) -> SyncResult<Arc<WorkerState>> {
        let engine: Arc<dyn SearchEngine> = match &self.engine {
            Some(engine) => engine.clone(),
            None => Arc::new(self.config.cluster.build_client()?),
        };
        let mappings = load_mappings(&self.config.mapping).await?;
        info!(
            engine = engine.name(),
            endpoint = %self.config.cluster.endpoint,
            tables = mappings.len(),
            "Worker initialized"
        );
        Ok(build_state(&self.config, engine, mappings))
    }

    /// Apply one delivered batch.
    ///
    /// `Ok` carries the records to redeliver (none when the batch was fully
    /// applied); `Err` means the whole batch has to be redelivered.
    pub async fn handle(
        &self,
        event: &StreamEvent,
        cancel: &CancellationToken,
    ) -> SyncResult<BatchResponse> {
        let batch_id = generate_batch_id();
        let records = event.records.len();
        let span = tracing::info_span!("batch", batch_id = %batch_id, records);

        async {
            let budget = self.config.sync.batch_deadline();
            let deadline = Instant::now() + budget;

            if event.records.is_empty() {
                return Ok(BatchResponse::default());
            }

            let state = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(SyncError::Cancelled),
                state = tokio::time::timeout_at(deadline, self.state()) => {
                    state.unwrap_or(Err(SyncError::DeadlineExceeded(budget)))
                }
            };
            let state = match state {
                Ok(state) => state,
                Err(e) => {
                    error!(error_kind = e.kind(), error = %e, "Worker initialization failed");
                    counter!(names::BATCHES_FAILED).increment(1);
                    return Err(e);
                }
            };

            match state.dispatcher.dispatch(&event.records, cancel, deadline).await {
                Ok(outcome) if outcome.is_complete() => {
                    info!(
                        upserted = outcome.upserted,
                        deleted = outcome.deleted,
                        "Batch committed"
                    );
                    counter!(names::BATCHES_COMMITTED).increment(1);
                    Ok(outcome.into_response())
                }
                Ok(outcome) => {
                    warn!(
                        applied = outcome.applied,
                        redelivered = outcome.failed_items.len(),
                        "Batch partially applied"
                    );
                    counter!(names::BATCHES_PARTIAL).increment(1);
                    Ok(outcome.into_response())
                }
                Err(e) => {
                    error!(
                        error_kind = e.kind(),
                        retryable = e.is_retryable(),
                        error = %e,
                        "Batch failed"
                    );
                    counter!(names::BATCHES_FAILED).increment(1);
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Check the cluster is reachable with the configured credentials
    pub async fn check(&self) -> SyncResult<()> {
        let state = self.state().await?;
        state.engine.ping().await?;
        Ok(())
    }

    /// Release the client and caches
    pub fn shutdown(self) {
        let initialized = self.state.initialized();
        drop(self.state);
        info!(initialized, "Worker shut down");
    }
}

fn build_state(
    config: &SyncConfig,
    engine: Arc<dyn SearchEngine>,
    mappings: SchemaMappingStore,
) -> Arc<WorkerState> {
    let lifecycle = Arc::new(
        IndexLifecycleManager::new(engine.clone(), config.index.settings())
            .with_lowercase_names(config.index.lowercase_names),
    );
    let dispatcher = SyncDispatcher::new(
        engine.clone(),
        lifecycle,
        Arc::new(mappings),
        DispatchSettings::from(config),
    );
    Arc::new(WorkerState { engine, dispatcher })
}

/// Generate a batch ID for structured logging correlation.
fn generate_batch_id() -> String {
    let micros = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros();
    format!("tablesync-{}-{}", std::process::id(), micros)
}
