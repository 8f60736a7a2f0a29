//! Helpers shared by unit and integration tests.
//!
//! Provides the canonical fixtures, collection snapshots and a store wrapper injecting write
//! failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde_json::{Value, json};

use crate::bail;
use crate::document::Document;
use crate::error::{ErrorKind, MergeResult};
use crate::fixture::{dump_collections, load_fixture};
use crate::key::JoinKey;
use crate::store::memory::MemoryStore;
use crate::store::{BulkWriteResult, DocumentStore, Filter, GroupSpec, PageQuery, WriteOp};

/// People referencing genders by `_id`, plus one person without a gender.
pub fn people_fixture() -> Value {
    json!({
        "people": [
            {"_id": 11, "name": "Ann", "gender": 1},
            {"_id": 22, "name": "Bob", "gender": 2},
            {"_id": 33, "name": "Cid"}
        ],
        "gender": [
            {"_id": 1, "name": "Male"},
            {"_id": 2, "name": "Female"}
        ]
    })
}

/// Owners and the pets referencing them through `owner`.
///
/// Owner 44 has no pets and pet 5 references a missing owner.
pub fn owner_fixture() -> Value {
    json!({
        "owner": [
            {"_id": 11, "name": "Charlie"},
            {"_id": 22, "name": "Penny"},
            {"_id": 44, "name": "Jon"}
        ],
        "pet": [
            {"_id": 1, "owner": 11, "name": "Snoopy"},
            {"_id": 2, "owner": 22, "name": "Snoopy"},
            {"_id": 3, "owner": 11, "name": "Garfield"},
            {"_id": 4, "owner": 22, "name": "Flipper"},
            {"_id": 5, "owner": 99, "name": "Stray"},
            {"_id": 6, "name": "Wild"}
        ]
    })
}

/// Creates a memory store holding `fixture`.
pub async fn store_with(fixture: &Value) -> MemoryStore {
    let store = MemoryStore::new();
    load_fixture(&store, fixture)
        .await
        .expect("fixture should load");
    store
}

/// Snapshot of the given collections, comparable across stores and runs.
pub async fn snapshot(store: &MemoryStore, collections: &[&str]) -> Value {
    dump_collections(store, collections).await
}

/// Converts JSON objects into documents.
pub fn documents(values: Vec<Value>) -> Vec<Document> {
    values
        .into_iter()
        .map(|value| match value {
            Value::Object(document) => document,
            other => panic!("expected a document, got {other}"),
        })
        .collect()
}

/// Store wrapper failing bulk writes into one collection after a number of successful ones.
#[derive(Debug, Clone)]
pub struct FailingWriteStore<S> {
    inner: S,
    collection: String,
    fail_after: usize,
    writes: Arc<AtomicUsize>,
}

impl<S> FailingWriteStore<S> {
    /// Wraps `inner`, letting `fail_after` bulk writes into `collection` succeed.
    pub fn wrap(inner: S, collection: &str, fail_after: usize) -> Self {
        Self {
            inner,
            collection: collection.to_string(),
            fail_after,
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    /// Bulk writes attempted into the failing collection.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl<S> DocumentStore for FailingWriteStore<S>
where
    S: DocumentStore + Sync,
{
    async fn count(&self, collection: &str, filter: &Filter) -> MergeResult<u64> {
        self.inner.count(collection, filter).await
    }

    async fn find_page(&self, collection: &str, query: &PageQuery) -> MergeResult<Vec<Document>> {
        self.inner.find_page(collection, query).await
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> MergeResult<Vec<Document>> {
        self.inner.find_all(collection, filter).await
    }

    async fn ensure_index(&self, collection: &str, field: &str) -> MergeResult<()> {
        self.inner.ensure_index(collection, field).await
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> MergeResult<BulkWriteResult> {
        if collection == self.collection {
            let attempt = self.writes.fetch_add(1, Ordering::SeqCst);
            if attempt >= self.fail_after {
                bail!(
                    ErrorKind::StoreQueryFailed,
                    "Injected bulk write failure",
                    format!("collection `{collection}`, write {attempt}")
                );
            }
        }

        self.inner.bulk_write(collection, ops).await
    }

    async fn drop_collection(&self, collection: &str) -> MergeResult<()> {
        self.inner.drop_collection(collection).await
    }

    async fn group_page(
        &self,
        collection: &str,
        spec: &GroupSpec,
        after: Option<&JoinKey>,
        limit: usize,
    ) -> MergeResult<Vec<Document>> {
        self.inner.group_page(collection, spec, after, limit).await
    }
}
