//! Denormalization engine embedding child documents into parent documents.
//!
//! A merge spec such as `gender` or `pet:[pet.owner]` describes which child collection is
//! joined into which parent field. One-to-one specs replace a foreign key with the referenced
//! child document, one-to-many specs attach the ordered list of children referencing the
//! parent. Runs are idempotent and stamped in a bookkeeping collection so that repeating a
//! command does nothing.
//!
//! # Usage
//!
//! ```rust,no_run
//! use denorm::{MergeOutcome, Merger};
//! use denorm::store::memory::MemoryStore;
//! use denorm_config::shared::MergeConfig;
//!
//! # async fn example() -> denorm::error::MergeResult<()> {
//! let merger = Merger::new(MemoryStore::new(), MergeConfig::default())?;
//!
//! match merger.merge("owner", &["pet:[pet.owner]"]).await? {
//!     MergeOutcome::Completed(summary) => {
//!         println!("processed {} documents", summary.documents_processed())
//!     }
//!     MergeOutcome::AlreadyMerged => println!("nothing to do"),
//! }
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod error;
pub mod fixture;
pub mod grouper;
pub mod index;
pub mod join;
pub mod key;
mod macros;
mod merger;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod spec;
pub mod store;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod tracker;
pub mod writer;

pub use error::{ErrorKind, MergeError, MergeResult};
pub use merger::Merger;
pub use progress::{MergeOutcome, MergeSummary};
pub use spec::{Cardinality, JoinDescriptor, parse_spec, parse_specs};
