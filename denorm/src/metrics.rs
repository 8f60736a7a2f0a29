//! Metric names recorded by merge runs.

/// Label for the parent collection.
pub const PARENT_COLLECTION_LABEL: &str = "parent_collection";

/// Label for the canonical descriptor, e.g. `one:gender:gender._id`.
pub const DESCRIPTOR_LABEL: &str = "descriptor";

/// Label for the join strategy.
pub const STRATEGY_LABEL: &str = "strategy";

/// Label for the error kind.
pub const ERROR_KIND_LABEL: &str = "error_kind";

/// Counter of parent documents read by the join.
pub const DENORM_DOCUMENTS_PROCESSED_TOTAL: &str = "denorm_documents_processed_total";

/// Counter of parent documents updated with merged children.
pub const DENORM_DOCUMENTS_MERGED_TOTAL: &str = "denorm_documents_merged_total";

/// Counter of one-to-one foreign keys without a matching child.
pub const DENORM_UNRESOLVED_KEYS_TOTAL: &str = "denorm_unresolved_keys_total";

/// Histogram of the time taken to join and write one batch, in seconds.
pub const DENORM_BATCH_DURATION_SECONDS: &str = "denorm_batch_duration_seconds";

/// Counter of failed merge runs.
pub const DENORM_RUN_ERRORS_TOTAL: &str = "denorm_run_errors_total";
