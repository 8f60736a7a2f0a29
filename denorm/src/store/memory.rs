use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::bail;
use crate::document::{Document, ID_FIELD, document_id, get_path, project, set_path};
use crate::error::{ErrorKind, MergeResult};
use crate::key::JoinKey;
use crate::store::{
    Accumulator, BulkWriteResult, DocumentStore, Filter, GroupSpec, PageQuery, WriteItemError,
    WriteOp,
};

#[derive(Debug, Clone)]
struct StoredDocument {
    /// Insertion sequence, used to keep grouped members in insertion order.
    seq: u64,
    document: Document,
}

#[derive(Debug, Default)]
struct Collection {
    documents: BTreeMap<JoinKey, StoredDocument>,
    indexes: BTreeSet<String>,
    next_seq: u64,
}

impl Collection {
    fn insert(&mut self, mut document: Document) -> Result<(), String> {
        let id = match document_id(&document) {
            Some(id) => id.clone(),
            None => {
                let id = Value::String(uuid::Uuid::new_v4().to_string());
                document.insert(ID_FIELD.to_string(), id.clone());
                id
            }
        };

        let key = JoinKey::new(id);
        if self.documents.contains_key(&key) {
            return Err(format!("duplicate key: {key}"));
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.documents.insert(key, StoredDocument { seq, document });

        Ok(())
    }

    fn matching<'a>(&'a self, filter: &'a Filter) -> impl Iterator<Item = &'a Document> + 'a {
        self.documents
            .values()
            .map(|stored| &stored.document)
            .filter(move |document| filter.matches(document))
    }
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, Collection>,
}

/// In-process document store.
///
/// Collections are kept ordered by `_id`. Bulk writes continue past failing items and report
/// them, so a batch may be partially applied. Cloning the store shares its contents.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts documents directly, bypassing bulk write reporting.
    ///
    /// Fails on the first duplicate `_id`.
    pub async fn insert_many(
        &self,
        collection: &str,
        documents: impl IntoIterator<Item = Document>,
    ) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        let collection_state = inner.collections.entry(collection.to_string()).or_default();

        for document in documents {
            if let Err(message) = collection_state.insert(document) {
                bail!(
                    ErrorKind::WriteBatchFailed,
                    "Document could not be inserted",
                    format!("collection `{collection}`: {message}")
                );
            }
        }

        Ok(())
    }

    /// Returns all documents of a collection ordered by `_id`.
    pub async fn documents(&self, collection: &str) -> Vec<Document> {
        let inner = self.inner.lock().await;
        inner
            .collections
            .get(collection)
            .map(|state| {
                state
                    .documents
                    .values()
                    .map(|stored| stored.document.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns the names of all collections, sorted.
    pub async fn collection_names(&self) -> Vec<String> {
        let inner = self.inner.lock().await;
        let mut names: Vec<String> = inner.collections.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the indexed fields of a collection.
    pub async fn indexes(&self, collection: &str) -> Vec<String> {
        let inner = self.inner.lock().await;
        inner
            .collections
            .get(collection)
            .map(|state| state.indexes.iter().cloned().collect())
            .unwrap_or_default()
    }
}

impl DocumentStore for MemoryStore {
    async fn count(&self, collection: &str, filter: &Filter) -> MergeResult<u64> {
        let inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get(collection)
            .map(|state| state.matching(filter).count() as u64)
            .unwrap_or(0))
    }

    async fn find_page(&self, collection: &str, query: &PageQuery) -> MergeResult<Vec<Document>> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let candidates: Box<dyn Iterator<Item = &StoredDocument>> = match &query.after {
            Some(after) => Box::new(
                state
                    .documents
                    .range((std::ops::Bound::Excluded(after), std::ops::Bound::Unbounded))
                    .map(|(_, stored)| stored),
            ),
            None => Box::new(state.documents.values()),
        };

        let page = candidates
            .map(|stored| &stored.document)
            .filter(|document| query.filter.matches(document))
            .take(query.limit)
            .map(|document| match &query.projection {
                Some(fields) => project(document, fields),
                None => document.clone(),
            })
            .collect();

        Ok(page)
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> MergeResult<Vec<Document>> {
        let inner = self.inner.lock().await;

        Ok(inner
            .collections
            .get(collection)
            .map(|state| state.matching(filter).cloned().collect())
            .unwrap_or_default())
    }

    async fn ensure_index(&self, collection: &str, field: &str) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        inner
            .collections
            .entry(collection.to_string())
            .or_default()
            .indexes
            .insert(field.to_string());

        Ok(())
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> MergeResult<BulkWriteResult> {
        let mut inner = self.inner.lock().await;
        let state = inner.collections.entry(collection.to_string()).or_default();
        let mut result = BulkWriteResult::default();

        debug!(collection, ops = ops.len(), "applying bulk write");

        for (index, op) in ops.into_iter().enumerate() {
            match op {
                WriteOp::Insert(document) => match state.insert(document) {
                    Ok(()) => result.inserted += 1,
                    Err(message) => result.errors.push(WriteItemError { index, message }),
                },
                WriteOp::UpdateSet { id, fields } => {
                    let Some(stored) = state.documents.get_mut(&JoinKey::new(id)) else {
                        result.unmatched += 1;
                        continue;
                    };

                    // Fields are applied to a copy so a failing path leaves the document intact.
                    let mut updated = stored.document.clone();
                    let failed_path = fields.into_iter().find_map(|(path, value)| {
                        (!set_path(&mut updated, &path, value)).then_some(path)
                    });

                    match failed_path {
                        Some(path) => result.errors.push(WriteItemError {
                            index,
                            message: format!("cannot set `{path}`: a parent segment is not an object"),
                        }),
                        None => {
                            stored.document = updated;
                            result.matched += 1;
                        }
                    }
                }
                WriteOp::Replace { id, mut document } => {
                    let key = JoinKey::new(id.clone());
                    let Some(stored) = state.documents.get_mut(&key) else {
                        result.unmatched += 1;
                        continue;
                    };

                    document.insert(ID_FIELD.to_string(), id);
                    stored.document = document;
                    result.matched += 1;
                }
                WriteOp::Delete { id } => match state.documents.remove(&JoinKey::new(id)) {
                    Some(_) => result.matched += 1,
                    None => result.unmatched += 1,
                },
            }
        }

        Ok(result)
    }

    async fn drop_collection(&self, collection: &str) -> MergeResult<()> {
        let mut inner = self.inner.lock().await;
        inner.collections.remove(collection);

        Ok(())
    }

    async fn group_page(
        &self,
        collection: &str,
        spec: &GroupSpec,
        after: Option<&JoinKey>,
        limit: usize,
    ) -> MergeResult<Vec<Document>> {
        let inner = self.inner.lock().await;
        let Some(state) = inner.collections.get(collection) else {
            return Ok(Vec::new());
        };

        let mut members: Vec<&StoredDocument> = state.documents.values().collect();
        members.sort_by_key(|stored| stored.seq);

        let mut groups: BTreeMap<JoinKey, Document> = BTreeMap::new();
        for stored in members {
            let Some(key) = get_path(&stored.document, &spec.key_field) else {
                continue;
            };
            let key = JoinKey::new(key.clone());
            if after.is_some_and(|after| key <= *after) {
                continue;
            }

            let group = groups
                .entry(key.clone())
                .or_insert_with(|| new_group(key.into_value(), spec));

            for (field, accumulator) in &spec.fields {
                let Some(value) = get_path(&stored.document, field) else {
                    continue;
                };

                match accumulator {
                    Accumulator::First => {
                        if group.get(field).is_some_and(Value::is_null) {
                            group.insert(field.clone(), value.clone());
                        }
                    }
                    Accumulator::Push => {
                        if let Some(Value::Array(values)) = group.get_mut(field) {
                            values.push(value.clone());
                        }
                    }
                }
            }
        }

        Ok(groups.into_values().take(limit).collect())
    }
}

fn new_group(key: Value, spec: &GroupSpec) -> Document {
    let mut group = Document::new();
    group.insert(ID_FIELD.to_string(), key);

    for (field, accumulator) in &spec.fields {
        let initial = match accumulator {
            Accumulator::First => Value::Null,
            Accumulator::Push => Value::Array(Vec::new()),
        };
        group.insert(field.clone(), initial);
    }

    group
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    async fn store_with(collection: &str, documents: Vec<Value>) -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(collection, documents.into_iter().map(doc))
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn pages_follow_id_order() {
        let store = store_with(
            "people",
            vec![json!({"_id": 3}), json!({"_id": 1}), json!({"_id": 2})],
        )
        .await;

        let mut query = PageQuery::first(Filter::All, None, 2);
        let first = store.find_page("people", &query).await.unwrap();
        assert_eq!(first, vec![doc(json!({"_id": 1})), doc(json!({"_id": 2}))]);

        query.after = Some(JoinKey::new(json!(2)));
        let second = store.find_page("people", &query).await.unwrap();
        assert_eq!(second, vec![doc(json!({"_id": 3}))]);
    }

    #[tokio::test]
    async fn bulk_write_continues_past_failing_items() {
        let store = store_with("people", vec![json!({"_id": 1, "a": 5})]).await;

        let result = store
            .bulk_write(
                "people",
                vec![
                    WriteOp::Insert(doc(json!({"_id": 1}))),
                    WriteOp::UpdateSet {
                        id: json!(1),
                        fields: vec![("a.b".to_string(), json!(1))],
                    },
                    WriteOp::UpdateSet {
                        id: json!(1),
                        fields: vec![("name".to_string(), json!("Joe"))],
                    },
                    WriteOp::UpdateSet {
                        id: json!(9),
                        fields: vec![("name".to_string(), json!("Nobody"))],
                    },
                ],
            )
            .await
            .unwrap();

        assert_eq!(result.matched, 1);
        assert_eq!(result.unmatched, 1);
        assert_eq!(
            result.errors.iter().map(|e| e.index).collect::<Vec<_>>(),
            vec![0, 1]
        );
        assert_eq!(
            store.documents("people").await,
            vec![doc(json!({"_id": 1, "a": 5, "name": "Joe"}))]
        );
    }

    #[tokio::test]
    async fn inserted_documents_without_id_get_one() {
        let store = MemoryStore::new();
        store
            .bulk_write("scratch", vec![WriteOp::Insert(doc(json!({"x": 1})))])
            .await
            .unwrap();

        let documents = store.documents("scratch").await;
        assert!(documents[0].get(ID_FIELD).is_some_and(Value::is_string));
    }

    #[tokio::test]
    async fn grouping_keeps_insertion_order() {
        let store = store_with(
            "scratch",
            vec![
                json!({"_id": "c", "parent_id": 22, "pet": {"_id": 3}}),
                json!({"_id": "a", "parent_id": 22, "pet": {"_id": 2}}),
                json!({"_id": "b", "parent_id": 11, "gender": {"_id": 1}}),
            ],
        )
        .await;

        let spec = GroupSpec {
            key_field: "parent_id".to_string(),
            fields: vec![
                ("gender".to_string(), Accumulator::First),
                ("pet".to_string(), Accumulator::Push),
            ],
        };

        let groups = store.group_page("scratch", &spec, None, 10).await.unwrap();
        assert_eq!(
            groups,
            vec![
                doc(json!({"_id": 11, "gender": {"_id": 1}, "pet": []})),
                doc(json!({"_id": 22, "gender": null, "pet": [{"_id": 3}, {"_id": 2}]})),
            ]
        );

        let after = JoinKey::new(json!(11));
        let rest = store
            .group_page("scratch", &spec, Some(&after), 10)
            .await
            .unwrap();
        assert_eq!(rest.len(), 1);
    }
}
