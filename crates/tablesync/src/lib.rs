//! # tablesync: Change Stream to Search Index Sync
//!
//! Applies batches of table change records to an Elasticsearch / OpenSearch
//! cluster so that each table is mirrored into an index of the same name.
//!
//! ## Pipeline
//!
//! ```text
//! StreamEvent ──▶ decode + document id ──▶ ensure index ──▶ _bulk ──▶ BatchResponse
//!                 (tablesync-core)          (lifecycle)      (dispatcher)
//! ```
//!
//! - [`worker::Worker`]: lazily initialized client and mapping store,
//!   one `handle` call per delivered batch
//! - [`dispatcher::SyncDispatcher`]: ordered bulk writes, retry, failure
//!   policy, cancellation and deadline
//! - [`lifecycle::IndexLifecycleManager`]: on-demand index creation
//! - [`mapping_source`]: key-schema mapping artifact from a file or S3
//! - [`config::SyncConfig`]: YAML configuration with env expansion
//!
//! ## Example
//!
//! ```rust,no_run
//! use tablesync::{SyncConfig, Worker};
//! use tablesync_core::StreamEvent;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example(event: StreamEvent) -> anyhow::Result<()> {
//! let config = SyncConfig::from_file("tablesync.yaml")?;
//! tablesync::telemetry::init_logging(&config.logging)?;
//!
//! let worker = Worker::new(config);
//! let response = worker.handle(&event, &CancellationToken::new()).await?;
//! println!("{}", serde_json::to_string(&response)?);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod mapping_source;
pub mod metrics;
pub mod telemetry;
pub mod worker;

pub use config::{
    ClusterAuth, ClusterConfig, FailurePolicy, IndexConfig, LoggingConfig, MappingConfig,
    MappingSource, RefreshMode, RetrySettings, SensitiveString, SyncConfig, SyncSettings,
};
pub use dispatcher::{BatchOutcome, DispatchSettings, SyncDispatcher};
pub use error::{SyncError, SyncResult};
pub use lifecycle::IndexLifecycleManager;
pub use mapping_source::load_mappings;
pub use worker::Worker;
