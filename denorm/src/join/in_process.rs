use std::collections::BTreeSet;
use std::pin::pin;
use std::time::Instant;

use futures::StreamExt;
use serde_json::Value;
use tracing::info;

use super::{JoinSettings, Joiner, parent_ids, record_batch, resolve_one_to_one};
use crate::document::Document;
use crate::error::MergeResult;
use crate::index::ChildIndexBuilder;
use crate::key::JoinKey;
use crate::pipeline;
use crate::progress::{DescriptorReport, JoinReport, WriteOutcome};
use crate::spec::{Cardinality, JoinDescriptor};
use crate::store::{DocumentStore, Filter};
use crate::writer::BulkWriter;

/// Joins descriptors one after the other, resolving keys against in-memory child indexes.
#[derive(Debug, Clone, Default)]
pub struct InProcessJoiner {
    settings: JoinSettings,
}

impl InProcessJoiner {
    pub fn new(settings: JoinSettings) -> Self {
        Self { settings }
    }

    async fn join_descriptor<S>(
        &self,
        store: &S,
        parent_collection: &str,
        descriptor: &JoinDescriptor,
    ) -> MergeResult<(DescriptorReport, WriteOutcome)>
    where
        S: DocumentStore,
    {
        let mut index = ChildIndexBuilder::new(
            store,
            descriptor,
            &self.settings.index,
            &self.settings.group_sort_field,
        )
        .await?;

        let mut report = DescriptorReport::new(descriptor);
        report.strategy = Some(index.strategy());
        report.child_count = index.child_count();

        let writer = BulkWriter::new(store, parent_collection);
        let mut write = WriteOutcome::default();

        let query = self.settings.parent_query(descriptor);
        let mut batches = pin!(pipeline::batches(
            store,
            parent_collection,
            query,
            self.settings.batch.size
        ));

        while let Some(batch) = batches.next().await {
            let batch = batch?;
            let started = Instant::now();

            let (updates, loaded) = match descriptor.cardinality {
                Cardinality::OneToOne => {
                    let (resolved, loaded) = resolve_one_to_one(
                        store,
                        &mut index,
                        descriptor,
                        &batch,
                        self.settings.unresolved,
                        &mut report,
                    )
                    .await?;
                    let updates = resolved
                        .into_iter()
                        .map(|(id, child)| (id, descriptor.parent_field.clone(), child))
                        .collect::<Vec<_>>();

                    (updates, loaded)
                }
                Cardinality::OneToMany => {
                    self.resolve_one_to_many(store, &mut index, descriptor, &batch, &mut report)
                        .await?
                }
            };

            let outcome = writer.apply(updates).await?;
            write.add(outcome);

            report.batches += 1;
            report.documents_read += batch.len() as u64;
            report.children_loaded += loaded as u64;

            info!(
                descriptor = %descriptor,
                batch = report.batches,
                parents = batch.len(),
                progress = %format!("<{loaded} >{}", outcome.applied),
                "batch merged"
            );
            record_batch(
                parent_collection,
                descriptor,
                index.strategy().as_static_str(),
                batch.len(),
                started.elapsed(),
            );
        }

        report.index_stats = index.stats().clone();

        Ok((report, write))
    }

    /// Looks up the children of every parent in the batch.
    ///
    /// Parents without children keep the field absent.
    async fn resolve_one_to_many<S>(
        &self,
        store: &S,
        index: &mut ChildIndexBuilder,
        descriptor: &JoinDescriptor,
        batch: &[Document],
        report: &mut DescriptorReport,
    ) -> MergeResult<(Vec<(Value, String, Value)>, usize)>
    where
        S: DocumentStore,
    {
        let ids = parent_ids(batch);
        let keys: BTreeSet<JoinKey> = ids.iter().cloned().map(JoinKey::new).collect();
        let loaded = index.prepare(store, &keys).await?;

        let mut updates = Vec::new();
        for id in ids {
            let key = JoinKey::new(id);
            if let Some(children) = index.lookup_many(&key) {
                updates.push((
                    key.as_value().clone(),
                    descriptor.parent_field.clone(),
                    Value::Array(children.to_vec()),
                ));
                report.resolved += 1;
            }
        }

        Ok((updates, loaded))
    }
}

impl Joiner for InProcessJoiner {
    async fn join<S>(
        &self,
        store: &S,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<JoinReport>
    where
        S: DocumentStore,
    {
        let parent_count = store.count(parent_collection, &Filter::All).await?;
        info!(parent = parent_collection, count = parent_count, "parent collection");

        let mut report = JoinReport::default();
        for descriptor in descriptors {
            info!(descriptor = %descriptor, "joining descriptor");

            let (descriptor_report, write) = self
                .join_descriptor(store, parent_collection, descriptor)
                .await?;
            report.write.add(write);
            report.descriptors.push(descriptor_report);
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use denorm_config::shared::{IndexConfig, UnresolvedKeyPolicy};
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;
    use crate::index::IndexStrategy;
    use crate::store::memory::MemoryStore;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|value| value.as_object().cloned().unwrap())
            .collect()
    }

    async fn people_and_genders() -> MemoryStore {
        let store = MemoryStore::new();
        store
            .insert_many(
                "people",
                docs(vec![
                    json!({"_id": 11, "gender": 1}),
                    json!({"_id": 22, "gender": 2}),
                    json!({"_id": 33, "gender": 3}),
                ]),
            )
            .await
            .unwrap();
        store
            .insert_many(
                "gender",
                docs(vec![
                    json!({"_id": 1, "name": "male"}),
                    json!({"_id": 2, "name": "female"}),
                ]),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn small_batches_use_a_full_index() {
        let store = people_and_genders().await;
        let settings = JoinSettings {
            batch: denorm_config::shared::BatchConfig {
                page_size: 2,
                size: 1,
            },
            ..JoinSettings::default()
        };
        let joiner = InProcessJoiner::new(settings);
        let descriptor = JoinDescriptor::one_to_one("gender", "gender", "_id");

        let report = joiner
            .join(&store, "people", std::slice::from_ref(&descriptor))
            .await
            .unwrap();

        let descriptor_report = &report.descriptors[0];
        assert_eq!(descriptor_report.strategy, Some(IndexStrategy::Full));
        assert_eq!(descriptor_report.batches, 3);
        assert_eq!(descriptor_report.resolved, 2);
        assert_eq!(descriptor_report.unresolved, 1);
        assert_eq!(descriptor_report.index_stats.builds, 1);
        assert_eq!(report.write.applied, 2);

        let people = store.documents("people").await;
        assert_eq!(people[0]["gender"], json!({"_id": 1, "name": "male"}));
        assert_eq!(people[2]["gender"], json!(3));
    }

    #[tokio::test]
    async fn abort_policy_fails_on_the_first_unresolved_key() {
        let store = people_and_genders().await;
        let settings = JoinSettings {
            unresolved: UnresolvedKeyPolicy::Abort,
            index: IndexConfig { threshold: 0 },
            ..JoinSettings::default()
        };
        let joiner = InProcessJoiner::new(settings);
        let descriptor = JoinDescriptor::one_to_one("gender", "gender", "_id");

        let err = joiner.join(&store, "people", &[descriptor]).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnresolvedForeignKey);
    }

    #[tokio::test]
    async fn parents_without_children_keep_the_field_absent() {
        let store = MemoryStore::new();
        store
            .insert_many("owner", docs(vec![json!({"_id": 1}), json!({"_id": 2})]))
            .await
            .unwrap();
        store
            .insert_many(
                "pet",
                docs(vec![
                    json!({"_id": "b", "owner": 1, "name": "Rex"}),
                    json!({"_id": "a", "owner": 1, "name": "Tom"}),
                ]),
            )
            .await
            .unwrap();

        let joiner = InProcessJoiner::default();
        let descriptor = JoinDescriptor::one_to_many("pet", "pet", "owner");
        let report = joiner.join(&store, "owner", &[descriptor]).await.unwrap();

        assert_eq!(report.descriptors[0].resolved, 1);
        let owners = store.documents("owner").await;
        assert_eq!(
            owners[0]["pet"],
            json!([
                {"_id": "a", "owner": 1, "name": "Tom"},
                {"_id": "b", "owner": 1, "name": "Rex"}
            ])
        );
        assert!(owners[1].get("pet").is_none());
    }
}
