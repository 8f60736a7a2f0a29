//! Reports produced by joins and whole merge runs.

use std::time::Duration;

use crate::index::{IndexStats, IndexStrategy};
use crate::spec::JoinDescriptor;

/// Lower bound applied to elapsed time when computing throughput.
const MIN_ELAPSED_SECS: f64 = 1e-6;

/// Documents per second over `elapsed`.
pub fn docs_per_sec(documents: u64, elapsed: Duration) -> f64 {
    documents as f64 / elapsed.as_secs_f64().max(MIN_ELAPSED_SECS)
}

/// Result of writing a batch of parent updates.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Updates whose parent was found.
    pub applied: u64,
    /// Updates whose parent does not exist.
    pub skipped: u64,
}

impl WriteOutcome {
    pub fn add(&mut self, other: WriteOutcome) {
        self.applied += other.applied;
        self.skipped += other.skipped;
    }
}

/// What happened to one descriptor during a join.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptorReport {
    pub descriptor: JoinDescriptor,
    /// Strategy of the child index, when one was used.
    pub strategy: Option<IndexStrategy>,
    pub child_count: u64,
    /// Documents read while joining: parents, or children for staged one-to-many joins.
    pub documents_read: u64,
    pub children_loaded: u64,
    /// Parents that received a value for the field.
    pub resolved: u64,
    /// One-to-one keys without a matching child.
    pub unresolved: u64,
    pub batches: u64,
    pub index_stats: IndexStats,
}

impl DescriptorReport {
    pub fn new(descriptor: &JoinDescriptor) -> Self {
        Self {
            descriptor: descriptor.clone(),
            strategy: None,
            child_count: 0,
            documents_read: 0,
            children_loaded: 0,
            resolved: 0,
            unresolved: 0,
            batches: 0,
            index_stats: IndexStats::default(),
        }
    }
}

/// Result of joining every pending descriptor of a run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct JoinReport {
    pub descriptors: Vec<DescriptorReport>,
    pub write: WriteOutcome,
}

impl JoinReport {
    pub fn documents_read(&self) -> u64 {
        self.descriptors.iter().map(|d| d.documents_read).sum()
    }

    pub fn unresolved(&self) -> u64 {
        self.descriptors.iter().map(|d| d.unresolved).sum()
    }
}

/// Summary of a completed merge run.
#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub parent_collection: String,
    pub join: JoinReport,
    /// Descriptors skipped because they were already stamped.
    pub skipped: Vec<JoinDescriptor>,
    pub elapsed: Duration,
}

impl MergeSummary {
    pub fn documents_processed(&self) -> u64 {
        self.join.documents_read()
    }

    pub fn docs_per_sec(&self) -> f64 {
        docs_per_sec(self.documents_processed(), self.elapsed)
    }
}

/// Outcome of a merge run.
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    Completed(MergeSummary),
    /// Every descriptor was already stamped; nothing was touched.
    AlreadyMerged,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throughput_guards_against_zero_elapsed() {
        assert_eq!(docs_per_sec(0, Duration::ZERO), 0.0);
        assert!((docs_per_sec(10, Duration::ZERO) - 1.0e7).abs() < 1.0e-3);
        assert_eq!(docs_per_sec(10, Duration::from_secs(2)), 5.0);
    }

    #[test]
    fn write_outcomes_accumulate() {
        let mut total = WriteOutcome::default();
        total.add(WriteOutcome {
            applied: 2,
            skipped: 1,
        });
        total.add(WriteOutcome {
            applied: 3,
            skipped: 0,
        });

        assert_eq!(
            total,
            WriteOutcome {
                applied: 5,
                skipped: 1
            }
        );
    }
}
