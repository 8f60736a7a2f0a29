use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch sizing for reads and writes.
///
/// The page size controls how many documents the store returns per cursor advance, while the
/// batch size controls how many parent documents are joined and written together. The two are
/// independent: pages are re-chunked into batches.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Number of documents fetched from the store per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Number of parent documents joined and written per batch.
    #[serde(default = "default_batch_size")]
    pub size: usize,
}

impl BatchConfig {
    /// Default number of documents per store page.
    pub const DEFAULT_PAGE_SIZE: usize = 100_000;

    /// Default number of parent documents per join/write batch.
    pub const DEFAULT_SIZE: usize = 20_000;

    /// Validates batch configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.page_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            size: default_batch_size(),
        }
    }
}

fn default_page_size() -> usize {
    BatchConfig::DEFAULT_PAGE_SIZE
}

fn default_batch_size() -> usize {
    BatchConfig::DEFAULT_SIZE
}
