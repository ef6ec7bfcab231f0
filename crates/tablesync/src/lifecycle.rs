//! Target index management.
//!
//! Every source table maps to one index of the same name. Indices are
//! created on first write with numeric coercion enabled, since numbers
//! inside mixed lists reach the cluster as strings.

use crate::error::{SyncError, SyncResult};
use crate::metrics::names;
use dashmap::DashSet;
use metrics::counter;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tablesync_search::{IndexSettings, SearchEngine, SearchError};
use tracing::{debug, info};

static INDEX_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_-]+$").expect("invalid index name regex"));

/// Creates target indices on demand and remembers which ones exist.
///
/// Safe to share between concurrent batches; two callers racing to create
/// the same index both succeed.
pub struct IndexLifecycleManager {
    engine: Arc<dyn SearchEngine>,
    settings: IndexSettings,
    lowercase_names: bool,
    known: DashSet<String>,
}

impl IndexLifecycleManager {
    pub fn new(engine: Arc<dyn SearchEngine>, settings: IndexSettings) -> Self {
        Self {
            engine,
            settings,
            lowercase_names: false,
            known: DashSet::new(),
        }
    }

    /// Lowercase table names when deriving index names
    pub fn with_lowercase_names(mut self, lowercase: bool) -> Self {
        self.lowercase_names = lowercase;
        self
    }

    /// Index name for a source table
    pub fn index_for_table(&self, table: &str) -> SyncResult<String> {
        let name = if self.lowercase_names {
            table.to_lowercase()
        } else {
            table.to_string()
        };
        validate_index_name(&name)?;
        Ok(name)
    }

    /// Make sure `index` exists, creating it when absent.
    pub async fn ensure_index(&self, index: &str) -> SyncResult<()> {
        validate_index_name(index)?;
        if self.known.contains(index) {
            return Ok(());
        }

        if self.engine.index_exists(index).await? {
            self.known.insert(index.to_string());
            return Ok(());
        }

        match self.engine.create_index(index, &self.settings).await {
            Ok(()) => {
                info!(index, "Created index");
                counter!(names::INDEX_CREATED).increment(1);
            }
            Err(SearchError::IndexAlreadyExists(_)) => {
                debug!(index, "Index created concurrently by another writer");
                counter!(names::INDEX_CREATE_CONFLICTS).increment(1);
            }
            Err(e) => return Err(e.into()),
        }

        self.known.insert(index.to_string());
        Ok(())
    }

    /// Drop `index` from the cache, e.g. after the cluster reported it missing
    pub fn forget(&self, index: &str) {
        if self.known.remove(index).is_some() {
            debug!(index, "Forgot cached index");
        }
    }

    pub fn is_known(&self, index: &str) -> bool {
        self.known.contains(index)
    }
}

fn validate_index_name(name: &str) -> SyncResult<()> {
    if INDEX_NAME_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(SyncError::InvalidIndexName(name.to_string()))
    }
}
