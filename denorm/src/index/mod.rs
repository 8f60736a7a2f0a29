//! Child indexes used to resolve join keys.
//!
//! A [`ChildIndexBuilder`] decides once per descriptor whether the child collection is small
//! enough to be held in memory as a whole, or whether children are fetched per parent batch.

mod builder;
mod child_index;

pub use builder::{ChildIndexBuilder, IndexStats, IndexStrategy, prepare_child_collection};
pub use child_index::ChildIndex;
