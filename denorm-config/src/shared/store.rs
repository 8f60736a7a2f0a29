use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError};

/// Schema used for collection tables when none is configured.
const DEFAULT_PG_SCHEMA: &str = "public";

fn default_pg_schema() -> String {
    DEFAULT_PG_SCHEMA.to_string()
}

/// Which document store backs the collections.
///
/// This intentionally does not implement `Serialize` so the database password cannot leak
/// into serialized output.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store. Useful with fixtures and in tests.
    #[default]
    Memory,
    /// Postgres database storing each collection as a `jsonb` table.
    Postgres {
        connection: PgConnectionConfig,
        #[serde(default = "default_pg_schema")]
        schema: String,
    },
}

impl StoreConfig {
    /// Validates the store settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            StoreConfig::Memory => Ok(()),
            StoreConfig::Postgres { connection, schema } => {
                if schema.is_empty() {
                    return Err(ValidationError::EmptyName("store.schema"));
                }

                connection.validate()
            }
        }
    }
}
