//! # Document Store
//!
//! Backend-agnostic access to raw and consolidated documents.
//!
//! ## Architecture
//!
//! ```text
//! DocumentStore (trait, object safe)
//!   ├── InMemoryDocumentStore   <- tests and local runs
//!   └── PgDocumentStore         <- JSONB table with (seq_no, primary_term) guards
//! ```
//!
//! Every write goes through [`DocumentStore::bulk`]. Each non-create action
//! carries the [`VersionToken`] read at load time; a mismatch comes back as a
//! [`BulkItemStatus::Conflict`] outcome rather than an error, so callers can tell
//! "someone else wrote first" apart from a broken store.

mod errors;
pub mod in_memory;
pub mod postgres;
mod types;

use async_trait::async_trait;

pub use errors::{StoreError, StoreResult};
pub use in_memory::{InMemoryDocumentStore, StoreStats};
pub use postgres::PgDocumentStore;
pub use types::{
    location_matches, BulkAction, BulkItemOutcome, BulkItemStatus, BulkOperation, DocumentRef,
    RangeFilter, SearchQuery, SortOrder, StoredDocument, VersionToken,
};

#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Fetch documents by id from every location matching `location`
    ///
    /// Ids that do not exist are simply absent from the result.
    async fn get_many(&self, location: &str, ids: &[String]) -> StoreResult<Vec<StoredDocument>>;

    async fn search(&self, query: &SearchQuery) -> StoreResult<Vec<StoredDocument>>;

    /// Run several searches in one round trip
    ///
    /// Default implementation runs them sequentially; backends override it
    /// when they can batch.
    async fn multi_search(&self, queries: &[SearchQuery]) -> StoreResult<Vec<Vec<StoredDocument>>> {
        let mut results = Vec::with_capacity(queries.len());
        for query in queries {
            results.push(self.search(query).await?);
        }
        Ok(results)
    }

    /// Submit a batch of write actions
    ///
    /// Returns one outcome per action, in no particular order.
    async fn bulk(&self, actions: Vec<BulkAction>) -> StoreResult<Vec<BulkItemOutcome>>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
