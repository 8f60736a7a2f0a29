//! Document store abstraction and its backends.
//!
//! The engine only needs a handful of primitives from the store: paged scans with filter and
//! projection, bulk point writes, best effort index creation and a grouping facility used by
//! the aggregation path. [`DocumentStore`] captures exactly these so the engine can run
//! against the in-process [`memory::MemoryStore`] or a Postgres database through
//! [`postgres::PostgresStore`].

use std::future::Future;

use serde_json::Value;

use crate::document::Document;
use crate::error::MergeResult;
use crate::key::JoinKey;

pub mod filter;
pub mod memory;
pub mod postgres;

pub use filter::Filter;

/// One page of a keyset paginated scan ordered by `_id`.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub filter: Filter,
    /// Fields to return besides `_id`. `None` returns whole documents.
    pub projection: Option<Vec<String>>,
    /// Only documents whose `_id` sorts after this key are returned.
    pub after: Option<JoinKey>,
    pub limit: usize,
}

impl PageQuery {
    pub fn first(filter: Filter, projection: Option<Vec<String>>, limit: usize) -> Self {
        Self {
            filter,
            projection,
            after: None,
            limit,
        }
    }
}

/// A single write applied by [`DocumentStore::bulk_write`].
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Inserts a document. Documents without `_id` receive a generated one.
    Insert(Document),
    /// Sets each `(path, value)` on the document with the given `_id`.
    UpdateSet { id: Value, fields: Vec<(String, Value)> },
    /// Replaces the document with the given `_id`.
    Replace { id: Value, document: Document },
    /// Deletes the document with the given `_id`.
    Delete { id: Value },
}

/// Failure of a single item of a bulk write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteItemError {
    /// Position of the failed operation in the submitted batch.
    pub index: usize,
    pub message: String,
}

/// Outcome of a bulk write as reported by the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: u64,
    /// Update, replace and delete operations that found their document.
    pub matched: u64,
    /// Update, replace and delete operations whose document does not exist.
    pub unmatched: u64,
    pub errors: Vec<WriteItemError>,
}

impl BulkWriteResult {
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// How a grouped field is accumulated from the members of a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accumulator {
    /// Value of the first member carrying the field, or null.
    First,
    /// Values of all members carrying the field, in insertion order.
    Push,
}

/// Grouping of a collection by one field.
///
/// Each output document has the group key under `_id` and one field per accumulated field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupSpec {
    pub key_field: String,
    pub fields: Vec<(String, Accumulator)>,
}

/// Access to a collection oriented document store.
///
/// Every method is a single round trip to the store. Implementations must order scans by
/// `_id` with a total order so that keyset pagination visits every document once.
pub trait DocumentStore {
    /// Counts documents matching `filter`.
    fn count(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = MergeResult<u64>> + Send;

    /// Returns one page of documents ordered by `_id`.
    fn find_page(
        &self,
        collection: &str,
        query: &PageQuery,
    ) -> impl Future<Output = MergeResult<Vec<Document>>> + Send;

    /// Returns every document matching `filter`, ordered by `_id`.
    fn find_all(
        &self,
        collection: &str,
        filter: &Filter,
    ) -> impl Future<Output = MergeResult<Vec<Document>>> + Send;

    /// Creates an ascending index on `field` if it does not exist yet.
    fn ensure_index(
        &self,
        collection: &str,
        field: &str,
    ) -> impl Future<Output = MergeResult<()>> + Send;

    /// Applies a batch of writes in one request.
    ///
    /// Item failures are reported in [`BulkWriteResult::errors`] when the backend continues past
    /// them; backends applying batches atomically fail the whole call instead.
    fn bulk_write(
        &self,
        collection: &str,
        ops: Vec<WriteOp>,
    ) -> impl Future<Output = MergeResult<BulkWriteResult>> + Send;

    /// Drops a collection. Dropping a missing collection succeeds.
    fn drop_collection(&self, collection: &str) -> impl Future<Output = MergeResult<()>> + Send;

    /// Returns one page of groups ordered by group key, starting after `after`.
    ///
    /// Documents without the key field are ignored.
    fn group_page(
        &self,
        collection: &str,
        spec: &GroupSpec,
        after: Option<&JoinKey>,
        limit: usize,
    ) -> impl Future<Output = MergeResult<Vec<Document>>> + Send;
}
