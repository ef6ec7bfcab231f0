//! # tablesync-search: Search Engine Client
//!
//! A narrow async interface to Elasticsearch / OpenSearch clusters.
//!
//! - [`SearchEngine`]: the seam the sync engine writes through
//! - [`opensearch::OpenSearchClient`]: REST implementation (reqwest)
//! - [`testing::InMemorySearchEngine`]: in-process engine with fault
//!   injection (feature `testing`)
//!
//! ## Authentication
//!
//! | Mode | Feature |
//! |:-----|:--------|
//! | None | none |
//! | Basic | none |
//! | AWS SigV4 (ambient credentials) | `aws` (default) |

pub mod engine;
pub mod error;
pub mod opensearch;

#[cfg(feature = "aws")]
mod sigv4;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use engine::{
    BulkItemResult, BulkOperation, BulkResponse, IndexSettings, Refresh, SearchEngine,
};
pub use error::{SearchError, SearchResult};
pub use opensearch::{Auth, OpenSearchClient, OpenSearchClientBuilder};
