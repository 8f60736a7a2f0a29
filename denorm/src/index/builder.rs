use std::collections::BTreeSet;

use denorm_config::shared::IndexConfig;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::document::Document;
use crate::error::MergeResult;
use crate::index::ChildIndex;
use crate::key::JoinKey;
use crate::spec::JoinDescriptor;
use crate::store::{DocumentStore, Filter};

/// How children are brought into memory for a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStrategy {
    /// The whole child collection is indexed once and reused for every batch.
    Full,
    /// Only the children needed by the current parent batch are fetched.
    Windowed,
}

impl IndexStrategy {
    pub fn as_static_str(&self) -> &'static str {
        match self {
            IndexStrategy::Full => "full",
            IndexStrategy::Windowed => "windowed",
        }
    }
}

/// Statistics about index use.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct IndexStats {
    /// Number of times an index was built from fetched children.
    pub builds: u64,
    /// Total children fetched across builds.
    pub children_loaded: u64,
    /// Number of lookups.
    pub lookups: u64,
    /// Number of lookups that found nothing.
    pub misses: u64,
}

/// Provides the child index for each parent batch of one descriptor.
#[derive(Debug)]
pub struct ChildIndexBuilder {
    descriptor: JoinDescriptor,
    strategy: IndexStrategy,
    child_count: u64,
    group_sort_field: String,
    index: Option<ChildIndex>,
    /// Keys the current windowed index was built for.
    window_keys: Option<BTreeSet<JoinKey>>,
    stats: IndexStats,
}

/// Counts the child collection and ensures an index on the child key.
///
/// Index creation is best effort: a failure is logged and the merge continues.
pub async fn prepare_child_collection<S: DocumentStore>(
    store: &S,
    descriptor: &JoinDescriptor,
) -> MergeResult<u64> {
    let child_count = store
        .count(&descriptor.child_collection, &Filter::All)
        .await?;
    info!(child = %descriptor.child_collection, count = child_count, "child collection");

    if let Err(err) = store
        .ensure_index(&descriptor.child_collection, &descriptor.child_key)
        .await
    {
        warn!(
            child = %descriptor.child_collection,
            key = %descriptor.child_key,
            error = %err,
            "could not create index on child key, continuing without it"
        );
    }

    Ok(child_count)
}

impl ChildIndexBuilder {
    /// Prepares the child collection and picks the strategy from its size.
    pub async fn new<S: DocumentStore>(
        store: &S,
        descriptor: &JoinDescriptor,
        config: &IndexConfig,
        group_sort_field: &str,
    ) -> MergeResult<Self> {
        let child_count = prepare_child_collection(store, descriptor).await?;

        let strategy = if child_count <= config.threshold {
            IndexStrategy::Full
        } else {
            IndexStrategy::Windowed
        };
        info!(
            strategy = strategy.as_static_str(),
            threshold = config.threshold,
            "child index strategy selected"
        );

        Ok(Self {
            descriptor: descriptor.clone(),
            strategy,
            child_count,
            group_sort_field: group_sort_field.to_string(),
            index: None,
            window_keys: None,
            stats: IndexStats::default(),
        })
    }

    pub fn strategy(&self) -> IndexStrategy {
        self.strategy
    }

    pub fn child_count(&self) -> u64 {
        self.child_count
    }

    pub fn stats(&self) -> &IndexStats {
        &self.stats
    }

    /// Makes the index ready for a parent batch needing `keys`.
    ///
    /// Returns the number of children fetched, which is zero when the current index is reused.
    pub async fn prepare<S: DocumentStore>(
        &mut self,
        store: &S,
        keys: &BTreeSet<JoinKey>,
    ) -> MergeResult<usize> {
        let filter = match self.strategy {
            IndexStrategy::Full => {
                if self.index.is_some() {
                    return Ok(0);
                }
                Filter::not_null(&self.descriptor.child_key)
            }
            IndexStrategy::Windowed => {
                if self.window_keys.as_ref() == Some(keys) {
                    return Ok(0);
                }
                let values: Vec<Value> = keys.iter().map(|key| key.as_value().clone()).collect();
                Filter::is_in(&self.descriptor.child_key, values)
            }
        };

        let children = store
            .find_all(&self.descriptor.child_collection, &filter)
            .await?;
        let loaded = children.len();
        self.rebuild(children);

        if self.strategy == IndexStrategy::Windowed {
            self.window_keys = Some(keys.clone());
        }

        debug!(
            child = %self.descriptor.child_collection,
            loaded,
            keys = self.index.as_ref().map(ChildIndex::len).unwrap_or(0),
            "child index built"
        );

        Ok(loaded)
    }

    fn rebuild(&mut self, children: Vec<Document>) {
        self.stats.builds += 1;
        self.stats.children_loaded += children.len() as u64;
        self.index = Some(ChildIndex::build(
            &self.descriptor,
            children,
            &self.group_sort_field,
        ));
    }

    /// Looks up the child of a one-to-one descriptor.
    pub fn lookup_one(&mut self, key: &JoinKey) -> Option<&Document> {
        self.stats.lookups += 1;
        let found = self.index.as_ref().and_then(|index| index.get_one(key));
        if found.is_none() {
            self.stats.misses += 1;
        }
        found
    }

    /// Looks up the ordered children of a one-to-many descriptor.
    pub fn lookup_many(&mut self, key: &JoinKey) -> Option<&[Value]> {
        self.stats.lookups += 1;
        let found = self.index.as_ref().and_then(|index| index.get_many(key));
        if found.is_none() {
            self.stats.misses += 1;
        }
        found
    }
}
