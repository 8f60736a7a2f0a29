use serde::Deserialize;

use crate::Config;
use crate::shared::{BatchConfig, StoreConfig, ValidationError};

/// Collection receiving merge stamps when none is configured.
const DEFAULT_STAMP_COLLECTION: &str = "merged";

/// Field used to order one-to-many groups when none is configured.
const DEFAULT_GROUP_SORT_FIELD: &str = "_id";

/// Settings for building child indexes.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct IndexConfig {
    /// Child collections with at most this many documents are indexed fully in memory; larger
    /// ones are looked up per parent batch.
    #[serde(default = "default_threshold")]
    pub threshold: u64,
}

impl IndexConfig {
    pub const DEFAULT_THRESHOLD: u64 = 80_000;
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
        }
    }
}

fn default_threshold() -> u64 {
    IndexConfig::DEFAULT_THRESHOLD
}

/// How descriptors are joined.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JoinStrategy {
    /// Children are looked up in an index held by the process.
    #[default]
    InProcess,
    /// Joined pairs are staged into a scratch collection and grouped by the store.
    Aggregation,
}

/// What to do when a one-to-one foreign key has no matching child.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedKeyPolicy {
    /// Leave the parent untouched and log a warning.
    #[default]
    Warn,
    /// Fail the run.
    Abort,
}

/// Configuration of a merge run.
#[derive(Clone, Debug, Deserialize)]
pub struct MergeConfig {
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub strategy: JoinStrategy,
    #[serde(default)]
    pub unresolved: UnresolvedKeyPolicy,
    /// Extra filter AND-ed into every parent scan, in the JSON filter syntax.
    #[serde(default)]
    pub filter: Option<serde_json::Value>,
    /// Extra parent fields fetched alongside the join fields.
    #[serde(default)]
    pub projection: Option<Vec<String>>,
    #[serde(default = "default_stamp_collection")]
    pub stamp_collection: String,
    /// Field that orders the members of one-to-many groups.
    #[serde(default = "default_group_sort_field")]
    pub group_sort_field: String,
}

impl MergeConfig {
    /// Validates the whole merge configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;
        self.store.validate()?;

        if self.stamp_collection.is_empty() {
            return Err(ValidationError::EmptyName("stamp_collection"));
        }

        if self.group_sort_field.is_empty() {
            return Err(ValidationError::EmptyName("group_sort_field"));
        }

        if let Some(filter) = &self.filter
            && !filter.is_object()
        {
            return Err(ValidationError::InvalidFilter(filter.to_string()));
        }

        Ok(())
    }
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            index: IndexConfig::default(),
            store: StoreConfig::default(),
            strategy: JoinStrategy::default(),
            unresolved: UnresolvedKeyPolicy::default(),
            filter: None,
            projection: None,
            stamp_collection: default_stamp_collection(),
            group_sort_field: default_group_sort_field(),
        }
    }
}

impl Config for MergeConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["projection"];
}

fn default_stamp_collection() -> String {
    DEFAULT_STAMP_COLLECTION.to_string()
}

fn default_group_sort_field() -> String {
    DEFAULT_GROUP_SORT_FIELD.to_string()
}
