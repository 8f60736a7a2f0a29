//! Batched point updates of parent documents.

use metrics::counter;
use serde_json::Value;
use tracing::debug;

use crate::error::{ErrorKind, MergeError, MergeResult};
use crate::merge_error;
use crate::metrics::{DENORM_DOCUMENTS_MERGED_TOTAL, PARENT_COLLECTION_LABEL};
use crate::progress::WriteOutcome;
use crate::store::{BulkWriteResult, DocumentStore, WriteOp};

/// Writes merged fields into parent documents, one store request per call.
#[derive(Debug)]
pub struct BulkWriter<'a, S> {
    store: &'a S,
    collection: &'a str,
}

impl<'a, S> BulkWriter<'a, S>
where
    S: DocumentStore,
{
    pub fn new(store: &'a S, collection: &'a str) -> Self {
        Self { store, collection }
    }

    /// Sets `field = value` on each parent identified by its `_id`.
    pub async fn apply(&self, updates: Vec<(Value, String, Value)>) -> MergeResult<WriteOutcome> {
        let ops = updates
            .into_iter()
            .map(|(id, field, value)| WriteOp::UpdateSet {
                id,
                fields: vec![(field, value)],
            })
            .collect();

        self.write(ops).await
    }

    /// Sets several fields on each parent identified by its `_id`.
    pub async fn apply_fields(
        &self,
        updates: Vec<(Value, Vec<(String, Value)>)>,
    ) -> MergeResult<WriteOutcome> {
        let ops = updates
            .into_iter()
            .map(|(id, fields)| WriteOp::UpdateSet { id, fields })
            .collect();

        self.write(ops).await
    }

    async fn write(&self, ops: Vec<WriteOp>) -> MergeResult<WriteOutcome> {
        if ops.is_empty() {
            return Ok(WriteOutcome::default());
        }

        let submitted = ops.len();
        let result = self
            .store
            .bulk_write(self.collection, ops)
            .await
            .map_err(|err| {
                merge_error!(
                    ErrorKind::WriteBatchFailed,
                    "Bulk write of parent documents failed",
                    format!("collection `{}`, {submitted} updates", self.collection),
                    source: err
                )
            })?;

        let outcome = into_outcome(self.collection, result)?;
        counter!(DENORM_DOCUMENTS_MERGED_TOTAL, PARENT_COLLECTION_LABEL => self.collection.to_string())
            .increment(outcome.applied);
        debug!(
            collection = self.collection,
            applied = outcome.applied,
            skipped = outcome.skipped,
            "bulk write applied"
        );

        Ok(outcome)
    }
}

/// Converts a store result, failing with [`ErrorKind::WriteBatchFailed`] on item errors.
pub(crate) fn into_outcome(collection: &str, result: BulkWriteResult) -> MergeResult<WriteOutcome> {
    if !result.is_ok() {
        let errors: Vec<MergeError> = result
            .errors
            .into_iter()
            .map(|item| {
                merge_error!(
                    ErrorKind::WriteBatchFailed,
                    "Bulk write item failed",
                    format!("collection `{collection}`, item {}: {}", item.index, item.message)
                )
            })
            .collect();

        return Err(MergeError::from(errors));
    }

    Ok(WriteOutcome {
        applied: result.matched + result.inserted,
        skipped: result.unmatched,
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::document::Document;
    use crate::store::memory::MemoryStore;

    async fn people() -> MemoryStore {
        let store = MemoryStore::new();
        let people: Vec<Document> = [json!({"_id": 11, "gender": 1}), json!({"_id": 22, "gender": 2})]
            .into_iter()
            .map(|p| p.as_object().cloned().unwrap())
            .collect();
        store.insert_many("people", people).await.unwrap();
        store
    }

    #[tokio::test]
    async fn reports_applied_and_skipped() {
        let store = people().await;
        let writer = BulkWriter::new(&store, "people");

        let outcome = writer
            .apply(vec![
                (json!(11), "gender".to_string(), json!({"_id": 1})),
                (json!(99), "gender".to_string(), json!({"_id": 2})),
            ])
            .await
            .unwrap();

        assert_eq!(
            outcome,
            WriteOutcome {
                applied: 1,
                skipped: 1
            }
        );
        assert_eq!(store.documents("people").await[0]["gender"], json!({"_id": 1}));
    }

    #[tokio::test]
    async fn empty_input_is_a_no_op() {
        let store = MemoryStore::new();
        let writer = BulkWriter::new(&store, "people");

        assert_eq!(writer.apply(Vec::new()).await.unwrap(), WriteOutcome::default());
        assert!(store.collection_names().await.is_empty());
    }

    #[tokio::test]
    async fn item_failures_fail_the_batch() {
        let store = people().await;
        let writer = BulkWriter::new(&store, "people");

        let err = writer
            .apply(vec![(json!(11), "gender.code".to_string(), json!(1))])
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::WriteBatchFailed);
    }
}
