//! Shared configuration types for merge runs.

mod base;
mod batch;
mod connection;
mod merge;
mod store;

pub use base::ValidationError;
pub use batch::BatchConfig;
pub use connection::{MERGE_SESSION, PgConnectionConfig, SessionSettings, TlsConfig};
pub use merge::{IndexConfig, JoinStrategy, MergeConfig, UnresolvedKeyPolicy};
pub use store::StoreConfig;
