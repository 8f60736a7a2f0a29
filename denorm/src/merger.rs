//! Orchestrates a merge run: spec parsing, stamp lookup, joining and stamping.

use std::time::Instant;

use denorm_config::shared::{JoinStrategy, MergeConfig};
use metrics::counter;
use tracing::{error, info};

use crate::error::MergeResult;
use crate::join::{AggregationJoiner, InProcessJoiner, JoinSettings, Joiner};
use crate::metrics::{DENORM_RUN_ERRORS_TOTAL, ERROR_KIND_LABEL, PARENT_COLLECTION_LABEL};
use crate::progress::{JoinReport, MergeOutcome, MergeSummary};
use crate::spec::{JoinDescriptor, parse_specs};
use crate::store::DocumentStore;
use crate::tracker::RunTracker;

/// Merges child collections into a parent collection according to merge specs.
///
/// A run joins every descriptor not stamped yet and stamps them once all of them succeeded.
/// A failed run leaves no stamp, so re-running the same command completes it.
#[derive(Debug)]
pub struct Merger<S> {
    store: S,
    config: MergeConfig,
    settings: JoinSettings,
}

impl<S> Merger<S>
where
    S: DocumentStore,
{
    /// Creates a merger after validating `config`.
    pub fn new(store: S, config: MergeConfig) -> MergeResult<Self> {
        config.validate()?;
        let settings = JoinSettings::from_config(&config)?;

        Ok(Self {
            store,
            config,
            settings,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    /// Parses `specs` and merges them into `parent_collection`.
    pub async fn merge<T>(&self, parent_collection: &str, specs: &[T]) -> MergeResult<MergeOutcome>
    where
        T: AsRef<str>,
    {
        let descriptors = parse_specs(specs, parent_collection)?;
        self.merge_descriptors(parent_collection, &descriptors).await
    }

    /// Merges already parsed descriptors into `parent_collection`.
    pub async fn merge_descriptors(
        &self,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<MergeOutcome> {
        let started = Instant::now();
        let tracker = RunTracker::new(&self.store, &self.config.stamp_collection);

        let (pending, skipped) = tracker.partition(parent_collection, descriptors).await?;
        if pending.is_empty() {
            info!(parent = parent_collection, "every descriptor already merged");
            return Ok(MergeOutcome::AlreadyMerged);
        }

        info!(
            parent = parent_collection,
            pending = pending.len(),
            skipped = skipped.len(),
            strategy = ?self.config.strategy,
            "starting merge"
        );

        let join = match self.join(parent_collection, &pending).await {
            Ok(join) => join,
            Err(err) => {
                counter!(
                    DENORM_RUN_ERRORS_TOTAL,
                    PARENT_COLLECTION_LABEL => parent_collection.to_string(),
                    ERROR_KIND_LABEL => err.kind().as_static_str()
                )
                .increment(1);
                error!(parent = parent_collection, error = %err, "merge failed, no stamp written");

                return Err(err);
            }
        };

        tracker.stamp(parent_collection, &pending).await?;

        let summary = MergeSummary {
            parent_collection: parent_collection.to_string(),
            join,
            skipped,
            elapsed: started.elapsed(),
        };
        info!(
            parent = parent_collection,
            processed = summary.documents_processed(),
            applied = summary.join.write.applied,
            unresolved = summary.join.unresolved(),
            real = %format!("{:.3}s", summary.elapsed.as_secs_f64()),
            docs_per_sec = %format!("{:.1}", summary.docs_per_sec()),
            "merge completed"
        );

        Ok(MergeOutcome::Completed(summary))
    }

    /// Removes the stamps of `specs`, so that the next run merges them again.
    pub async fn unstamp<T>(&self, parent_collection: &str, specs: &[T]) -> MergeResult<u64>
    where
        T: AsRef<str>,
    {
        let descriptors = parse_specs(specs, parent_collection)?;
        RunTracker::new(&self.store, &self.config.stamp_collection)
            .unstamp(parent_collection, &descriptors)
            .await
    }

    async fn join(
        &self,
        parent_collection: &str,
        descriptors: &[JoinDescriptor],
    ) -> MergeResult<JoinReport> {
        match self.config.strategy {
            JoinStrategy::InProcess => {
                InProcessJoiner::new(self.settings.clone())
                    .join(&self.store, parent_collection, descriptors)
                    .await
            }
            JoinStrategy::Aggregation => {
                AggregationJoiner::new(self.settings.clone())
                    .join(&self.store, parent_collection, descriptors)
                    .await
            }
        }
    }
}
