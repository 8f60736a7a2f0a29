//! Logging and metrics setup shared by the denorm binaries and tests.

pub mod metrics;
pub mod tracing;
