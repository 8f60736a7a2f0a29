//! Loading collections from JSON fixtures and dumping them back.
//!
//! A fixture is a JSON object mapping collection names to arrays of documents:
//! `{"people": [{"_id": 11, "gender": 1}], "gender": [{"_id": 1, "name": "male"}]}`.

use std::path::Path;

use serde_json::{Map, Value};
use tracing::info;

use crate::bail;
use crate::document::Document;
use crate::error::{ErrorKind, MergeResult};
use crate::store::memory::MemoryStore;

/// Inserts every collection of `fixture` into `store`, returning the number of documents.
pub async fn load_fixture(store: &MemoryStore, fixture: &Value) -> MergeResult<usize> {
    let Some(collections) = fixture.as_object() else {
        bail!(
            ErrorKind::DeserializationError,
            "Fixture must be an object of collections"
        );
    };

    let mut loaded = 0;
    for (collection, documents) in collections {
        let Some(documents) = documents.as_array() else {
            bail!(
                ErrorKind::DeserializationError,
                "Fixture collection must be an array of documents",
                format!("collection `{collection}`")
            );
        };

        let mut batch: Vec<Document> = Vec::with_capacity(documents.len());
        for (position, document) in documents.iter().enumerate() {
            let Some(document) = document.as_object() else {
                bail!(
                    ErrorKind::DeserializationError,
                    "Fixture document must be an object",
                    format!("collection `{collection}`, document {position}")
                );
            };
            batch.push(document.clone());
        }

        loaded += batch.len();
        info!(collection = %collection, documents = batch.len(), "fixture collection loaded");
        store.insert_many(collection, batch).await?;
    }

    Ok(loaded)
}

/// Reads a fixture file and loads it into `store`.
pub async fn load_fixture_file(store: &MemoryStore, path: &Path) -> MergeResult<usize> {
    let contents = tokio::fs::read_to_string(path).await?;
    let fixture: Value = serde_json::from_str(&contents)?;

    load_fixture(store, &fixture).await
}

/// Returns the named collections of `store` in fixture layout.
pub async fn dump_collections<T>(store: &MemoryStore, collections: &[T]) -> Value
where
    T: AsRef<str>,
{
    let mut dump = Map::new();
    for collection in collections {
        let documents = store
            .documents(collection.as_ref())
            .await
            .into_iter()
            .map(Value::Object)
            .collect();
        dump.insert(collection.as_ref().to_string(), Value::Array(documents));
    }

    Value::Object(dump)
}
