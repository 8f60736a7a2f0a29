use std::collections::HashSet;
use std::pin::pin;
use std::time::Instant;

use futures::StreamExt;
use serde_json::{Map, Value};
use tracing::{debug, info};

use super::{JoinSettings, Joiner, parent_ids, record_batch, resolve_one_to_one};
use crate::document::{Document, ID_FIELD, document_id, get_path};
use crate::error::{ErrorKind, MergeResult};
use crate::grouper::sort_members;
use crate::index::{ChildIndexBuilder, prepare_child_collection};
use crate::key::JoinKey;
use crate::merge_error;
use crate::pipeline;
use crate::progress::{DescriptorReport, JoinReport, WriteOutcome};
use crate::spec::{Cardinality, JoinDescriptor};
use crate::store::{Accumulator, DocumentStore, Filter, GroupSpec, PageQuery, WriteOp};
use crate::writer::{BulkWriter, into_outcome};

/// Suffix of the scratch collection staging values before grouping.
const SCRATCH_SUFFIX: &str = "_merge_temp";

/// Field of a staged document holding the parent `_id`.
const PARENT_ID_FIELD: &str = "parent_id";

const STRATEGY: &str = "aggregation";

/// Name of the scratch collection used when merging into `parent_collection`.
pub fn scratch_collection(parent_collection: &str) -> String {
    format!("{parent_collection}{SCRATCH_SUFFIX}")
}

/// Staged field carrying the values of the descriptor at `position`.
///
/// Parent fields may be dotted paths, so staged values use positional names instead.
fn staged_field(position: usize) -> String {
    format!("field_{position}")
}

/// Stages every resolved value in a scratch collection and applies store-side groups.
///
/// One-to-one values are resolved through the child index exactly like the in-process path.
/// One-to-many values are staged straight from the child collection, keyed by the child key.
#[derive(Debug, Clone, Default)]
pub struct AggregationJoiner {
    settings: JoinSettings,
}

impl AggregationJoiner {
    pub fn new(settings: JoinSettings) -> Self {
        Self { settings }
    }

    async fn stage_one_to_one<S>(
        &self,
        store: &S,
        parent_collection: &str,
        scratch: &str,
        descriptor: &JoinDescriptor,
        field: &str,
    ) -> MergeResult<DescriptorReport>
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

            let (resolved, loaded) = resolve_one_to_one(
                store,
                &mut index,
                descriptor,
                &batch,
                self.settings.unresolved,
                &mut report,
            )
            .await?;
            let staged = resolved.len();
            let documents = resolved
                .into_iter()
                .map(|(id, child)| staged_document(id, field, child))
                .collect();
            stage(store, scratch, documents).await?;

            report.batches += 1;
            report.documents_read += batch.len() as u64;
            report.children_loaded += loaded as u64;

            info!(
                descriptor = %descriptor,
                batch = report.batches,
                parents = batch.len(),
                progress = %format!("<{loaded} >{staged}"),
                "batch staged"
            );
            record_batch(
                parent_collection,
                descriptor,
                STRATEGY,
                batch.len(),
                started.elapsed(),
            );
        }

        report.index_stats = index.stats().clone();

        Ok(report)
    }

    async fn stage_one_to_many<S>(
        &self,
        store: &S,
        parent_collection: &str,
        scratch: &str,
        descriptor: &JoinDescriptor,
        field: &str,
    ) -> MergeResult<DescriptorReport>
    where
        S: DocumentStore,
    {
        let mut report = DescriptorReport::new(descriptor);
        report.child_count = prepare_child_collection(store, descriptor).await?;

        let query = PageQuery::first(
            Filter::not_null(descriptor.child_key.clone()),
            None,
            self.settings.batch.page_size,
        );
        let mut batches = pin!(pipeline::batches(
            store,
            &descriptor.child_collection,
            query,
            self.settings.batch.size
        ));

        while let Some(batch) = batches.next().await {
            let batch = batch?;
            let started = Instant::now();

            let documents: Vec<Document> = batch
                .iter()
                .filter_map(|child| {
                    let key = get_path(child, &descriptor.child_key)?.clone();
                    Some(staged_document(key, field, Value::Object(child.clone())))
                })
                .collect();
            let staged = documents.len();
            stage(store, scratch, documents).await?;

            report.batches += 1;
            report.documents_read += batch.len() as u64;
            report.children_loaded += batch.len() as u64;

            info!(
                descriptor = %descriptor,
                batch = report.batches,
                children = batch.len(),
                progress = %format!("<{} >{staged}", batch.len()),
                "batch staged"
            );
            record_batch(
                parent_collection,
                descriptor,
                STRATEGY,
                batch.len(),
                started.elapsed(),
            );
        }

        Ok(report)
    }

    /// Pages the grouped staging collection back and writes every group into its parent.
    ///
    /// Returns the write outcome and, per descriptor, how many parents received a value.
    async fn apply_groups<S>(
        &self,
        store: &S,
        parent_collection: &str,
        scratch: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<(WriteOutcome, Vec<u64>)>
    where
        S: DocumentStore,
    {
        let spec = GroupSpec {
            key_field: PARENT_ID_FIELD.to_string(),
            fields: descriptors
                .iter()
                .enumerate()
                .map(|(position, descriptor)| {
                    let accumulator = match descriptor.cardinality {
                        Cardinality::OneToOne => Accumulator::First,
                        Cardinality::OneToMany => Accumulator::Push,
                    };
                    (staged_field(position), accumulator)
                })
                .collect(),
        };

        let writer = BulkWriter::new(store, parent_collection);
        let mut write = WriteOutcome::default();
        let mut resolved = vec![0; descriptors.len()];
        let mut after: Option<JoinKey> = None;
        let page_size = self.settings.batch.page_size;

        loop {
            let groups = store
                .group_page(scratch, &spec, after.as_ref(), page_size)
                .await?;
            if groups.is_empty() {
                break;
            }

            let parents = self.existing_parents(store, parent_collection, &groups).await?;

            let mut updates = Vec::with_capacity(groups.len());
            for group in &groups {
                let Some(id) = document_id(group) else {
                    continue;
                };
                if !parents.contains(&JoinKey::new(id.clone())) {
                    continue;
                }

                let fields = self.group_fields(group, descriptors, &mut resolved);
                if !fields.is_empty() {
                    updates.push((id.clone(), fields));
                }
            }

            debug!(groups = groups.len(), updates = updates.len(), "group page read");

            let mut updates = updates.into_iter().peekable();
            while updates.peek().is_some() {
                let chunk: Vec<_> = updates.by_ref().take(self.settings.batch.size).collect();
                let outcome = writer.apply_fields(chunk).await?;
                info!(
                    parent = parent_collection,
                    progress = %format!(">{}", outcome.applied),
                    "groups applied"
                );
                write.add(outcome);
            }

            if groups.len() < page_size {
                break;
            }
            after = groups.last().and_then(document_id).cloned().map(JoinKey::new);
            if after.is_none() {
                break;
            }
        }

        Ok((write, resolved))
    }

    /// Parent fields of one group, in descriptor order.
    fn group_fields(
        &self,
        group: &Document,
        descriptors: &[JoinDescriptor],
        resolved: &mut [u64],
    ) -> Vec<(String, Value)> {
        let mut fields = Vec::new();
        for (position, descriptor) in descriptors.iter().enumerate() {
            let value = match (descriptor.cardinality, group.get(&staged_field(position))) {
                (Cardinality::OneToOne, Some(value)) if !value.is_null() => value.clone(),
                (Cardinality::OneToMany, Some(Value::Array(members))) if !members.is_empty() => {
                    let mut members = members.clone();
                    sort_members(&mut members, Some(&self.settings.group_sort_field));
                    Value::Array(members)
                }
                _ => continue,
            };

            fields.push((descriptor.parent_field.clone(), value));
            resolved[position] += 1;
        }

        fields
    }

    /// Ids of the parents a group page can be applied to: parents that exist and match the
    /// configured filter. Groups keyed by any other value are neither written nor counted.
    async fn existing_parents<S>(
        &self,
        store: &S,
        parent_collection: &str,
        groups: &[Document],
    ) -> MergeResult<HashSet<JoinKey>>
    where
        S: DocumentStore,
    {
        let filter = Filter::is_in(ID_FIELD, parent_ids(groups)).and(self.settings.parent_filter.clone());
        let query = PageQuery::first(filter, Some(Vec::new()), groups.len());
        let parents = store.find_page(parent_collection, &query).await?;

        Ok(parents
            .iter()
            .filter_map(document_id)
            .cloned()
            .map(JoinKey::new)
            .collect())
    }
}

impl Joiner for AggregationJoiner {
    async fn join<S>(
        &self,
        store: &S,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<JoinReport>
    where
        S: DocumentStore,
    {
        let scratch = scratch_collection(parent_collection);
        store.drop_collection(&scratch).await?;

        let parent_count = store.count(parent_collection, &Filter::All).await?;
        info!(parent = parent_collection, count = parent_count, "parent collection");

        let mut report = JoinReport::default();
        for (position, descriptor) in descriptors.iter().enumerate() {
            info!(descriptor = %descriptor, scratch = %scratch, "staging descriptor");

            let field = staged_field(position);
            let descriptor_report = match descriptor.cardinality {
                Cardinality::OneToOne => {
                    self.stage_one_to_one(store, parent_collection, &scratch, descriptor, &field)
                        .await?
                }
                Cardinality::OneToMany => {
                    self.stage_one_to_many(store, parent_collection, &scratch, descriptor, &field)
                        .await?
                }
            };
            report.descriptors.push(descriptor_report);
        }

        let (write, resolved) = self
            .apply_groups(store, parent_collection, &scratch, descriptors)
            .await?;
        report.write = write;
        for (descriptor_report, resolved) in report.descriptors.iter_mut().zip(resolved) {
            descriptor_report.resolved = resolved;
        }

        store.drop_collection(&scratch).await?;

        Ok(report)
    }
}

fn staged_document(parent_id: Value, field: &str, value: Value) -> Document {
    let mut document = Map::new();
    document.insert(PARENT_ID_FIELD.to_string(), parent_id);
    document.insert(field.to_string(), value);
    document
}

/// Inserts staged documents into the scratch collection.
async fn stage<S>(store: &S, scratch: &str, documents: Vec<Document>) -> MergeResult<()>
where
    S: DocumentStore,
{
    if documents.is_empty() {
        return Ok(());
    }

    let ops = documents.into_iter().map(WriteOp::Insert).collect();
    let result = store.bulk_write(scratch, ops).await.map_err(|err| {
        merge_error!(
            ErrorKind::WriteBatchFailed,
            "Staging documents could not be written",
            format!("collection `{scratch}`"),
            source: err
        )
    })?;
    into_outcome(scratch, result)?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::store::memory::MemoryStore;

    fn docs(values: Vec<Value>) -> Vec<Document> {
        values
            .into_iter()
            .map(|value| value.as_object().cloned().unwrap())
            .collect()
    }

    #[test]
    fn scratch_collection_is_derived_from_the_parent() {
        assert_eq!(scratch_collection("owner"), "owner_merge_temp");
    }

    #[tokio::test]
    async fn one_to_many_groups_are_applied_and_scratch_is_dropped() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "owner",
                docs(vec![json!({"_id": 1}), json!({"_id": 2}), json!({"_id": 3})]),
            )
            .await
            .unwrap();
        store
            .insert_many(
                "pet",
                docs(vec![
                    json!({"_id": 10, "owner": 2, "name": "Snoopy"}),
                    json!({"_id": 11, "owner": 1, "name": "Garfield"}),
                    json!({"_id": 12, "owner": 2, "name": "Flipper"}),
                    json!({"_id": 13, "name": "Stray"}),
                    json!({"_id": 14, "owner": 99, "name": "Orphan"}),
                ]),
            )
            .await
            .unwrap();

        let joiner = AggregationJoiner::new(JoinSettings {
            group_sort_field: "name".to_string(),
            ..JoinSettings::default()
        });
        let descriptor = JoinDescriptor::one_to_many("pet", "pet", "owner");
        let report = joiner.join(&store, "owner", &[descriptor]).await.unwrap();

        assert_eq!(report.descriptors[0].documents_read, 4);
        assert_eq!(report.descriptors[0].resolved, 2);
        assert_eq!(report.write.skipped, 0);
        assert_eq!(report.write.applied, 2);

        let owners = store.documents("owner").await;
        assert_eq!(owners[0]["pet"], json!([{"_id": 11, "owner": 1, "name": "Garfield"}]));
        assert_eq!(
            owners[1]["pet"],
            json!([
                {"_id": 12, "owner": 2, "name": "Flipper"},
                {"_id": 10, "owner": 2, "name": "Snoopy"}
            ])
        );
        assert!(owners[2].get("pet").is_none());
        assert!(
            !store
                .collection_names()
                .await
                .contains(&"owner_merge_temp".to_string())
        );
    }

    #[tokio::test]
    async fn groups_outside_the_parent_filter_are_not_applied() {
        let store = MemoryStore::new();
        store
            .insert_many(
                "owner",
                docs(vec![
                    json!({"_id": 1, "active": true}),
                    json!({"_id": 2, "active": false}),
                ]),
            )
            .await
            .unwrap();
        store
            .insert_many(
                "pet",
                docs(vec![
                    json!({"_id": 10, "owner": 1}),
                    json!({"_id": 11, "owner": 2}),
                ]),
            )
            .await
            .unwrap();

        let joiner = AggregationJoiner::new(JoinSettings {
            parent_filter: Filter::equals("active", json!(true)),
            ..JoinSettings::default()
        });
        let descriptor = JoinDescriptor::one_to_many("pet", "pet", "owner");
        joiner.join(&store, "owner", &[descriptor]).await.unwrap();

        let owners = store.documents("owner").await;
        assert_eq!(owners[0]["pet"], json!([{"_id": 10, "owner": 1}]));
        assert!(owners[1].get("pet").is_none());
    }
}
