//! In-memory [`SearchEngine`] for tests.
//!
//! Behaves like a cluster with automatic index creation disabled: writes to
//! a missing index fail with `index_not_found_exception`. Faults can be
//! queued per request or per document id to exercise retry and failure
//! policies.

use crate::engine::{
    BulkItemResult, BulkOperation, BulkResponse, IndexSettings, Refresh, SearchEngine,
};
use crate::error::{SearchError, SearchResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap, VecDeque};

#[derive(Debug, Default)]
struct MemoryIndex {
    settings: IndexSettings,
    documents: BTreeMap<String, Map<String, Value>>,
}

#[derive(Debug, Default)]
struct State {
    indices: HashMap<String, MemoryIndex>,
    creations: usize,
    create_conflicts: usize,
    bulk_requests: Vec<(Vec<BulkOperation>, Refresh)>,
    request_faults: VecDeque<SearchError>,
    item_faults: HashMap<String, VecDeque<BulkItemResult>>,
    index_faults: VecDeque<SearchError>,
}

/// Thread-safe in-memory search engine
#[derive(Debug, Default)]
pub struct InMemorySearchEngine {
    state: Mutex<State>,
}

impl InMemorySearchEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Engine that already has the given indices
    pub fn with_indices<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let engine = Self::new();
        {
            let mut state = engine.state.lock();
            for name in names {
                state.indices.insert(name.to_string(), MemoryIndex::default());
            }
        }
        engine
    }

    /// Fail the next bulk request with `error` (queued, first in first out)
    pub fn fail_next_bulk(&self, error: SearchError) {
        self.state.lock().request_faults.push_back(error);
    }

    /// Fail the next write of document `id` with `status` and `error_type`
    pub fn fail_item(&self, id: &str, status: u16, error_type: &str) {
        self.state
            .lock()
            .item_faults
            .entry(id.to_string())
            .or_default()
            .push_back(BulkItemResult::failed(status, error_type));
    }

    /// Fail the next index existence check or creation with `error`
    pub fn fail_next_index_call(&self, error: SearchError) {
        self.state.lock().index_faults.push_back(error);
    }

    pub fn document(&self, index: &str, id: &str) -> Option<Map<String, Value>> {
        self.state
            .lock()
            .indices
            .get(index)
            .and_then(|i| i.documents.get(id).cloned())
    }

    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map_or(0, |i| i.documents.len())
    }

    pub fn has_index(&self, index: &str) -> bool {
        self.state.lock().indices.contains_key(index)
    }

    pub fn index_settings(&self, index: &str) -> Option<IndexSettings> {
        self.state
            .lock()
            .indices
            .get(index)
            .map(|i| i.settings.clone())
    }

    /// Number of successful index creations
    pub fn creations(&self) -> usize {
        self.state.lock().creations
    }

    /// Number of creations rejected because the index existed
    pub fn create_conflicts(&self) -> usize {
        self.state.lock().create_conflicts
    }

    /// Every bulk request received, in order, with its refresh mode
    pub fn bulk_requests(&self) -> Vec<(Vec<BulkOperation>, Refresh)> {
        self.state.lock().bulk_requests.clone()
    }

    /// Total number of actions received across bulk requests
    pub fn actions_received(&self) -> usize {
        self.state
            .lock()
            .bulk_requests
            .iter()
            .map(|(ops, _)| ops.len())
            .sum()
    }
}

fn apply(state: &mut State, op: &BulkOperation) -> BulkItemResult {
    if let Some(fault) = state
        .item_faults
        .get_mut(op.id())
        .and_then(VecDeque::pop_front)
    {
        return fault;
    }

    let Some(index) = state.indices.get_mut(op.index()) else {
        return BulkItemResult::failed(404, "index_not_found_exception");
    };

    match op {
        BulkOperation::Index { id, document, .. } => {
            match index.documents.insert(id.clone(), document.clone()) {
                Some(_) => BulkItemResult::ok(200, "updated"),
                None => BulkItemResult::ok(201, "created"),
            }
        }
        BulkOperation::Delete { id, .. } => match index.documents.remove(id) {
            Some(_) => BulkItemResult::ok(200, "deleted"),
            None => BulkItemResult::ok(404, "not_found"),
        },
    }
}

#[async_trait]
impl SearchEngine for InMemorySearchEngine {
    fn name(&self) -> &str {
        "in-memory"
    }

    async fn ping(&self) -> SearchResult<()> {
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> SearchResult<bool> {
        let exists = {
            let mut state = self.state.lock();
            if let Some(fault) = state.index_faults.pop_front() {
                return Err(fault);
            }
            state.indices.contains_key(index)
        };
        // Let concurrent callers observe the same answer before anyone creates
        tokio::task::yield_now().await;
        Ok(exists)
    }

    async fn create_index(&self, index: &str, settings: &IndexSettings) -> SearchResult<()> {
        let mut state = self.state.lock();
        if let Some(fault) = state.index_faults.pop_front() {
            return Err(fault);
        }
        if state.indices.contains_key(index) {
            state.create_conflicts += 1;
            return Err(SearchError::IndexAlreadyExists(index.to_string()));
        }
        state.indices.insert(
            index.to_string(),
            MemoryIndex {
                settings: settings.clone(),
                documents: BTreeMap::new(),
            },
        );
        state.creations += 1;
        Ok(())
    }

    async fn bulk(
        &self,
        operations: &[BulkOperation],
        refresh: Refresh,
    ) -> SearchResult<BulkResponse> {
        let mut state = self.state.lock();
        state.bulk_requests.push((operations.to_vec(), refresh));
        if let Some(fault) = state.request_faults.pop_front() {
            return Err(fault);
        }
        let items = operations.iter().map(|op| apply(&mut state, op)).collect();
        Ok(BulkResponse { took_ms: 0, items })
    }
}
