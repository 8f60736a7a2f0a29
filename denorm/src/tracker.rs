//! Merge stamps recording which descriptors are already merged.
//!
//! A stamp is a document in the bookkeeping collection:
//!
//! ```json
//! {"_id": "people:one:gender:gender._id", "merged": ["people", "one", "gender", "gender", "_id"]}
//! ```
//!
//! Its presence is the only record of a completed merge. Stamps are written once every pending
//! descriptor of a run has been merged, so an aborted run leaves none behind.

use serde_json::{Value, json};
use tracing::info;

use crate::document::{Document, ID_FIELD};
use crate::error::{ErrorKind, MergeResult};
use crate::merge_error;
use crate::spec::JoinDescriptor;
use crate::store::{DocumentStore, Filter, WriteOp};
use crate::writer::into_outcome;

/// Field holding the stamp record.
pub const STAMP_FIELD: &str = "merged";

/// Record of a completed merge of one descriptor into a parent collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeStamp {
    pub parent_collection: String,
    pub descriptor: JoinDescriptor,
}

impl MergeStamp {
    pub fn new(parent_collection: &str, descriptor: &JoinDescriptor) -> Self {
        Self {
            parent_collection: parent_collection.to_string(),
            descriptor: descriptor.clone(),
        }
    }

    /// Stable document id derived from the parent and the canonical descriptor.
    pub fn id(&self) -> String {
        format!("{}:{}", self.parent_collection, self.descriptor)
    }

    /// The `[parent, cardinality, field, collection, key]` record.
    pub fn record(&self) -> Value {
        json!([
            self.parent_collection,
            self.descriptor.cardinality.as_static_str(),
            self.descriptor.parent_field,
            self.descriptor.child_collection,
            self.descriptor.child_key,
        ])
    }

    pub fn to_document(&self) -> Document {
        let mut document = Document::new();
        document.insert(ID_FIELD.to_string(), Value::String(self.id()));
        document.insert(STAMP_FIELD.to_string(), self.record());
        document
    }

    fn filter(&self) -> Filter {
        Filter::equals(STAMP_FIELD, self.record())
    }
}

/// Reads and writes merge stamps in the bookkeeping collection.
#[derive(Debug)]
pub struct RunTracker<'a, S> {
    store: &'a S,
    collection: &'a str,
}

impl<'a, S> RunTracker<'a, S>
where
    S: DocumentStore,
{
    pub fn new(store: &'a S, collection: &'a str) -> Self {
        Self { store, collection }
    }

    pub async fn is_stamped(&self, stamp: &MergeStamp) -> MergeResult<bool> {
        Ok(self.store.count(self.collection, &stamp.filter()).await? > 0)
    }

    /// Splits `descriptors` into pending and already stamped ones, preserving order.
    pub async fn partition(
        &self,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<(Vec<JoinDescriptor>, Vec<JoinDescriptor>)> {
        let mut pending = Vec::new();
        let mut stamped = Vec::new();

        for descriptor in descriptors {
            let stamp = MergeStamp::new(parent_collection, descriptor);
            if self.is_stamped(&stamp).await? {
                info!(
                    descriptor = %descriptor,
                    collection = self.collection,
                    "merge skipped, already stamped"
                );
                stamped.push(descriptor.clone());
            } else {
                pending.push(descriptor.clone());
            }
        }

        Ok((pending, stamped))
    }

    /// Inserts one stamp per descriptor in a single write.
    pub async fn stamp(
        &self,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<()> {
        if descriptors.is_empty() {
            return Ok(());
        }

        let ops = descriptors
            .iter()
            .map(|descriptor| WriteOp::Insert(MergeStamp::new(parent_collection, descriptor).to_document()))
            .collect();

        let result = self
            .store
            .bulk_write(self.collection, ops)
            .await
            .map_err(|err| {
                merge_error!(
                    ErrorKind::WriteBatchFailed,
                    "Merge stamps could not be written",
                    format!("collection `{}`", self.collection),
                    source: err
                )
            })?;
        into_outcome(self.collection, result)?;

        info!(
            stamps = descriptors.len(),
            collection = self.collection,
            "merge stamped"
        );

        Ok(())
    }

    /// Removes the stamps of `descriptors`, returning how many were removed.
    pub async fn unstamp(
        &self,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<u64> {
        let mut ops = Vec::new();
        for descriptor in descriptors {
            let stamp = MergeStamp::new(parent_collection, descriptor);
            let documents = self.store.find_all(self.collection, &stamp.filter()).await?;
            ops.extend(
                documents
                    .into_iter()
                    .filter_map(|document| document.get(ID_FIELD).cloned())
                    .map(|id| WriteOp::Delete { id }),
            );
        }

        if ops.is_empty() {
            return Ok(0);
        }

        let result = self.store.bulk_write(self.collection, ops).await?;
        let removed = into_outcome(self.collection, result)?.applied;
        info!(removed, collection = self.collection, "merge stamps removed");

        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    #[test]
    fn stamp_document_layout() {
        let descriptor = JoinDescriptor::one_to_many("pet", "pet", "owner");
        let stamp = MergeStamp::new("owner", &descriptor);

        assert_eq!(
            Value::Object(stamp.to_document()),
            json!({
                "_id": "owner:many:pet:pet.owner",
                "merged": ["owner", "many", "pet", "pet", "owner"]
            })
        );
    }

    #[tokio::test]
    async fn stamped_descriptors_are_partitioned_out() {
        let store = MemoryStore::new();
        let tracker = RunTracker::new(&store, "merged");
        let gender = JoinDescriptor::one_to_one("gender", "gender", "_id");
        let pet = JoinDescriptor::one_to_many("pet", "pet", "people");

        tracker.stamp("people", std::slice::from_ref(&gender)).await.unwrap();

        let (pending, stamped) = tracker
            .partition("people", &[gender.clone(), pet.clone()])
            .await
            .unwrap();
        assert_eq!(pending, vec![pet]);
        assert_eq!(stamped, vec![gender.clone()]);

        assert_eq!(tracker.unstamp("people", &[gender.clone()]).await.unwrap(), 1);
        assert!(!tracker.is_stamped(&MergeStamp::new("people", &gender)).await.unwrap());
        assert_eq!(tracker.unstamp("people", &[gender]).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stamps_are_per_parent_collection() {
        let store = MemoryStore::new();
        let tracker = RunTracker::new(&store, "merged");
        let gender = JoinDescriptor::one_to_one("gender", "gender", "_id");

        tracker.stamp("people", std::slice::from_ref(&gender)).await.unwrap();

        assert!(!tracker.is_stamped(&MergeStamp::new("staff", &gender)).await.unwrap());
    }
}
