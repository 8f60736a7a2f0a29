//! Joining child documents into parent documents.
//!
//! Two joiners produce the same final parent collection: [`InProcessJoiner`] resolves keys
//! against child indexes held in memory, [`AggregationJoiner`] stages resolved values in a
//! scratch collection and lets the store group them.

use std::collections::BTreeSet;
use std::future::Future;
use std::time::Duration;

use denorm_config::shared::{BatchConfig, IndexConfig, MergeConfig, UnresolvedKeyPolicy};
use metrics::{counter, histogram};
use serde_json::Value;
use tracing::warn;

use crate::bail;
use crate::document::{Document, ID_FIELD, document_id, get_path};
use crate::error::{ErrorKind, MergeResult};
use crate::index::ChildIndexBuilder;
use crate::key::{ForeignKeyValue, JoinKey};
use crate::metrics::{
    DENORM_BATCH_DURATION_SECONDS, DENORM_DOCUMENTS_PROCESSED_TOTAL, DENORM_UNRESOLVED_KEYS_TOTAL,
    DESCRIPTOR_LABEL, PARENT_COLLECTION_LABEL, STRATEGY_LABEL,
};
use crate::progress::{DescriptorReport, JoinReport};
use crate::spec::JoinDescriptor;
use crate::store::{DocumentStore, Filter, PageQuery};

mod aggregation;
mod in_process;

pub use aggregation::{AggregationJoiner, scratch_collection};
pub use in_process::InProcessJoiner;

/// Joins the children of every descriptor into the parent collection.
pub trait Joiner {
    fn join<S>(
        &self,
        store: &S,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> impl Future<Output = MergeResult<JoinReport>>
    where
        S: DocumentStore;
}

/// The parts of [`MergeConfig`] a joiner needs, with the parent filter already parsed.
#[derive(Debug, Clone)]
pub struct JoinSettings {
    pub batch: BatchConfig,
    pub index: IndexConfig,
    pub unresolved: UnresolvedKeyPolicy,
    /// Restricts which parents are merged. [`Filter::All`] merges every parent.
    pub parent_filter: Filter,
    /// Extra parent fields read alongside the join field.
    pub projection: Vec<String>,
    pub group_sort_field: String,
}

impl JoinSettings {
    pub fn from_config(config: &MergeConfig) -> MergeResult<Self> {
        let parent_filter = match &config.filter {
            Some(filter) => Filter::from_json(filter)?,
            None => Filter::All,
        };

        Ok(Self {
            batch: config.batch.clone(),
            index: config.index.clone(),
            unresolved: config.unresolved,
            parent_filter,
            projection: config.projection.clone().unwrap_or_default(),
            group_sort_field: config.group_sort_field.clone(),
        })
    }

    /// Query scanning the parents of `descriptor`.
    ///
    /// One-to-one joins only read parents carrying the join field, one-to-many joins read
    /// every parent. Both read `_id` plus the configured projection.
    fn parent_query(&self, descriptor: &JoinDescriptor) -> PageQuery {
        if descriptor.is_one_to_one() {
            let mut projection = vec![descriptor.parent_field.clone()];
            projection.extend(self.projection.iter().cloned());

            PageQuery::first(
                Filter::not_null(descriptor.parent_field.clone()).and(self.parent_filter.clone()),
                Some(projection),
                self.batch.page_size,
            )
        } else {
            PageQuery::first(
                self.parent_filter.clone(),
                Some(self.projection.clone()),
                self.batch.page_size,
            )
        }
    }
}

impl Default for JoinSettings {
    fn default() -> Self {
        let config = MergeConfig::default();
        Self {
            batch: config.batch,
            index: config.index,
            unresolved: config.unresolved,
            parent_filter: Filter::All,
            projection: Vec::new(),
            group_sort_field: config.group_sort_field,
        }
    }
}

/// Resolves the foreign keys of a batch of parents against the child index.
///
/// Returns `(parent id, child)` for every resolved key and the number of children loaded for
/// the batch. Unresolved keys follow `policy`.
async fn resolve_one_to_one<S>(
    store: &S,
    index: &mut ChildIndexBuilder,
    descriptor: &JoinDescriptor,
    batch: &[Document],
    policy: UnresolvedKeyPolicy,
    report: &mut DescriptorReport,
) -> MergeResult<(Vec<(Value, Value)>, usize)>
where
    S: DocumentStore,
{
    let mut pending = Vec::with_capacity(batch.len());
    for parent in batch {
        let Some(id) = document_id(parent) else {
            continue;
        };
        let Some(value) = get_path(parent, &descriptor.parent_field) else {
            continue;
        };
        if value.is_null() {
            continue;
        }

        let foreign_key = ForeignKeyValue::from_field(value, &descriptor.child_key)?;
        pending.push((id.clone(), foreign_key));
    }

    let keys: BTreeSet<JoinKey> = pending.iter().map(|(_, fk)| fk.key().clone()).collect();
    let loaded = index.prepare(store, &keys).await?;

    let mut resolved = Vec::with_capacity(pending.len());
    for (id, foreign_key) in pending {
        match index.lookup_one(foreign_key.key()) {
            Some(child) => {
                resolved.push((id, Value::Object(child.clone())));
                report.resolved += 1;
            }
            None => {
                report.unresolved += 1;
                counter!(
                    DENORM_UNRESOLVED_KEYS_TOTAL,
                    DESCRIPTOR_LABEL => descriptor.to_string()
                )
                .increment(1);

                match policy {
                    UnresolvedKeyPolicy::Warn => {
                        warn!(
                            descriptor = %descriptor,
                            parent = %id,
                            key = %foreign_key.key(),
                            "foreign key has no matching child, skipping"
                        );
                    }
                    UnresolvedKeyPolicy::Abort => {
                        bail!(
                            ErrorKind::UnresolvedForeignKey,
                            "Foreign key has no matching child",
                            format!(
                                "descriptor `{descriptor}`, parent {id}, key {}",
                                foreign_key.key()
                            )
                        );
                    }
                }
            }
        }
    }

    Ok((resolved, loaded))
}

/// `_id`s of a batch of parents.
fn parent_ids(batch: &[Document]) -> Vec<Value> {
    batch
        .iter()
        .filter_map(|parent| parent.get(ID_FIELD).cloned())
        .collect()
}

fn record_batch(
    parent_collection: &str,
    descriptor: &JoinDescriptor,
    strategy: &'static str,
    documents: usize,
    elapsed: Duration,
) {
    counter!(
        DENORM_DOCUMENTS_PROCESSED_TOTAL,
        PARENT_COLLECTION_LABEL => parent_collection.to_string(),
        DESCRIPTOR_LABEL => descriptor.to_string()
    )
    .increment(documents as u64);
    histogram!(
        DENORM_BATCH_DURATION_SECONDS,
        DESCRIPTOR_LABEL => descriptor.to_string(),
        STRATEGY_LABEL => strategy
    )
    .record(elapsed.as_secs_f64());
}
