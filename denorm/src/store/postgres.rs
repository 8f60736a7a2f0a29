use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use denorm_config::shared::{MERGE_SESSION, PgConnectionConfig};
use pg_escape::{quote_identifier, quote_literal};
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder, Row};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bail;
use crate::document::{Document, ID_FIELD, PATH_SEPARATOR, top_level_field};
use crate::error::{ErrorKind, MergeResult};
use crate::key::JoinKey;
use crate::store::{
    Accumulator, BulkWriteResult, DocumentStore, Filter, GroupSpec, PageQuery, WriteOp,
};

/// Maximum number of connections in the pool. Merges issue one statement at a time.
const MAX_POOL_CONNECTIONS: u32 = 2;

/// Duration after which idle connections are closed.
const IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates a lazily connected pool. No connection is opened until the first query.
fn create_pool(config: &PgConnectionConfig) -> PgPool {
    let options = config.connect_options(&MERGE_SESSION);

    PgPoolOptions::new()
        .min_connections(0)
        .max_connections(MAX_POOL_CONNECTIONS)
        .idle_timeout(Some(IDLE_TIMEOUT))
        .connect_lazy_with(options)
}

/// Document store backed by Postgres.
///
/// Each collection is a table `(id jsonb primary key, seq bigserial, doc jsonb)` in the
/// configured schema, created on first use. Scans are ordered by `id` using `jsonb` ordering
/// and grouped members follow `seq`. Bulk writes run in one transaction: any failing item
/// rolls back the whole batch.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
    schema: String,
    /// Collections whose table is known to exist.
    tables: Arc<Mutex<HashSet<String>>>,
}

impl PostgresStore {
    pub fn new(config: &PgConnectionConfig, schema: impl Into<String>) -> Self {
        Self::from_pool(create_pool(config), schema)
    }

    pub fn from_pool(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
            tables: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    fn table_name(&self, collection: &str) -> String {
        format!(
            "{}.{}",
            quote_identifier(&self.schema),
            quote_identifier(collection)
        )
    }

    /// Creates the collection table if needed and returns its qualified name.
    async fn ensure_table(&self, collection: &str) -> MergeResult<String> {
        let table = self.table_name(collection);
        let mut tables = self.tables.lock().await;
        if tables.contains(collection) {
            return Ok(table);
        }

        let create_schema = format!(
            "create schema if not exists {}",
            quote_identifier(&self.schema)
        );
        sqlx::query(&create_schema).execute(&self.pool).await?;

        let create_table = format!(
            "create table if not exists {table} (
                id jsonb primary key,
                seq bigserial not null,
                doc jsonb not null
            )"
        );
        sqlx::query(&create_table).execute(&self.pool).await?;

        info!(collection, schema = %self.schema, "collection table ready");
        tables.insert(collection.to_string());

        Ok(table)
    }
}

impl DocumentStore for PostgresStore {
    async fn count(&self, collection: &str, filter: &Filter) -> MergeResult<u64> {
        let table = self.ensure_table(collection).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("select count(*) from {table} where "));
        push_filter(&mut builder, filter);

        let count: i64 = builder.build().fetch_one(&self.pool).await?.try_get(0)?;

        Ok(count.max(0) as u64)
    }

    async fn find_page(&self, collection: &str, query: &PageQuery) -> MergeResult<Vec<Document>> {
        let table = self.ensure_table(collection).await?;

        let mut builder = QueryBuilder::<Postgres>::new("select ");
        match &query.projection {
            Some(fields) => push_projection(&mut builder, fields),
            None => {
                builder.push("doc");
            }
        }
        builder.push(format!(" as doc from {table} where "));
        push_filter(&mut builder, &query.filter);
        if let Some(after) = &query.after {
            builder.push(" and id > ");
            builder.push_bind(Json(after.as_value().clone()));
            builder.push("::jsonb");
        }
        builder.push(" order by id limit ");
        builder.push_bind(limit_to_i64(query.limit));

        debug!(collection, limit = query.limit, "fetching page");
        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn find_all(&self, collection: &str, filter: &Filter) -> MergeResult<Vec<Document>> {
        let table = self.ensure_table(collection).await?;

        let mut builder = QueryBuilder::<Postgres>::new(format!("select doc from {table} where "));
        push_filter(&mut builder, filter);
        builder.push(" order by id");

        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(row_to_document).collect()
    }

    async fn ensure_index(&self, collection: &str, field: &str) -> MergeResult<()> {
        let table = self.ensure_table(collection).await?;

        let index_name = quote_identifier(&format!("{collection}_{field}_idx")).into_owned();
        let path = quote_literal(&text_array_literal(field));
        let statement = format!(
            "create index if not exists {index_name} on {table} ((doc #> {path}::text[]))"
        );
        sqlx::query(&statement).execute(&self.pool).await?;

        Ok(())
    }

    async fn bulk_write(&self, collection: &str, ops: Vec<WriteOp>) -> MergeResult<BulkWriteResult> {
        let table = self.ensure_table(collection).await?;
        let mut result = BulkWriteResult::default();

        debug!(collection, ops = ops.len(), "applying bulk write in one transaction");

        let mut tx = self.pool.begin().await?;
        for op in ops {
            match op {
                WriteOp::Insert(mut document) => {
                    let id = match document.get(ID_FIELD) {
                        Some(id) => id.clone(),
                        None => {
                            let id = Value::String(uuid::Uuid::new_v4().to_string());
                            document.insert(ID_FIELD.to_string(), id.clone());
                            id
                        }
                    };

                    let mut builder =
                        QueryBuilder::<Postgres>::new(format!("insert into {table} (id, doc) values ("));
                    builder.push_bind(Json(id));
                    builder.push(", ");
                    builder.push_bind(Json(Value::Object(document)));
                    builder.push(")");
                    builder.build().execute(&mut *tx).await?;

                    result.inserted += 1;
                }
                WriteOp::UpdateSet { id, fields } => {
                    if fields.is_empty() {
                        continue;
                    }

                    let mut affected = 0;
                    for (path, value) in fields {
                        affected = sqlx::query(&set_field_statement(&table, &path))
                            .bind(Json(value))
                            .bind(Json(id.clone()))
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    }
                    count_match(&mut result, affected);
                }
                WriteOp::Replace { id, mut document } => {
                    document.insert(ID_FIELD.to_string(), id.clone());

                    let mut builder =
                        QueryBuilder::<Postgres>::new(format!("update {table} set doc = "));
                    builder.push_bind(Json(Value::Object(document)));
                    builder.push("::jsonb where id = ");
                    builder.push_bind(Json(id));
                    builder.push("::jsonb");

                    let affected = builder.build().execute(&mut *tx).await?.rows_affected();
                    count_match(&mut result, affected);
                }
                WriteOp::Delete { id } => {
                    let mut builder =
                        QueryBuilder::<Postgres>::new(format!("delete from {table} where id = "));
                    builder.push_bind(Json(id));
                    builder.push("::jsonb");

                    let affected = builder.build().execute(&mut *tx).await?.rows_affected();
                    count_match(&mut result, affected);
                }
            }
        }
        tx.commit().await?;

        Ok(result)
    }

    async fn drop_collection(&self, collection: &str) -> MergeResult<()> {
        let table = self.table_name(collection);
        let mut tables = self.tables.lock().await;

        sqlx::query(&format!("drop table if exists {table}"))
            .execute(&self.pool)
            .await?;
        tables.remove(collection);

        Ok(())
    }

    async fn group_page(
        &self,
        collection: &str,
        spec: &GroupSpec,
        after: Option<&JoinKey>,
        limit: usize,
    ) -> MergeResult<Vec<Document>> {
        let table = self.ensure_table(collection).await?;

        let mut builder = QueryBuilder::<Postgres>::new("select jsonb_build_object('_id', group_key");
        for (field, accumulator) in &spec.fields {
            builder.push(", ");
            builder.push(quote_literal(field));
            builder.push(", ");
            match accumulator {
                Accumulator::First => {
                    builder.push("(array_agg(doc #> ");
                    builder.push_bind(path_segments(field));
                    builder.push("::text[] order by seq) filter (where doc #> ");
                    builder.push_bind(path_segments(field));
                    builder.push("::text[] is not null))[1]");
                }
                Accumulator::Push => {
                    builder.push("coalesce(jsonb_agg(doc #> ");
                    builder.push_bind(path_segments(field));
                    builder.push("::text[] order by seq) filter (where doc #> ");
                    builder.push_bind(path_segments(field));
                    builder.push("::text[] is not null), '[]'::jsonb)");
                }
            }
        }
        builder.push(") as doc from (select doc #> ");
        builder.push_bind(path_segments(&spec.key_field));
        builder.push(format!("::text[] as group_key, seq, doc from {table}) staged"));
        builder.push(" where group_key is not null");
        if let Some(after) = after {
            builder.push(" and group_key > ");
            builder.push_bind(Json(after.as_value().clone()));
            builder.push("::jsonb");
        }
        builder.push(" group by group_key order by group_key limit ");
        builder.push_bind(limit_to_i64(limit));

        let rows = builder.build().fetch_all(&self.pool).await?;

        rows.iter().map(row_to_document).collect()
    }
}

fn count_match(result: &mut BulkWriteResult, affected: u64) {
    if affected == 0 {
        result.unmatched += 1;
    } else {
        result.matched += 1;
    }
}

fn limit_to_i64(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn path_segments(path: &str) -> Vec<String> {
    path.split(PATH_SEPARATOR).map(str::to_string).collect()
}

/// Renders an update setting one possibly nested field, `$1` being the value and `$2` the id.
///
/// `jsonb_set` only creates the last path element, so every missing parent object is built
/// from the stored document first. A parent that exists but is not an object fails the
/// statement.
fn set_field_statement(table: &str, path: &str) -> String {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();

    let mut value = "$1::jsonb".to_string();
    for depth in (1..segments.len()).rev() {
        let prefix = quote_literal(&segments_literal(&segments[..depth]));
        let key = quote_literal(&segments_literal(&segments[depth..=depth]));
        value = format!(
            "jsonb_set(coalesce(doc #> {prefix}::text[], '{{}}'::jsonb), {key}::text[], {value}, true)"
        );
    }

    let head = quote_literal(&segments_literal(&segments[..1]));
    format!(
        "update {table} set doc = jsonb_set(doc, {head}::text[], {value}, true) where id = $2::jsonb"
    )
}

/// Renders a path as a Postgres text array literal such as `{"address","city"}`.
fn text_array_literal(path: &str) -> String {
    let segments: Vec<&str> = path.split(PATH_SEPARATOR).collect();
    segments_literal(&segments)
}

fn segments_literal(segments: &[&str]) -> String {
    let elements: Vec<String> = segments
        .iter()
        .map(|segment| {
            let escaped = segment.replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{escaped}\"")
        })
        .collect();

    format!("{{{}}}", elements.join(","))
}

fn push_projection(builder: &mut QueryBuilder<'_, Postgres>, fields: &[String]) {
    let mut keys = vec![ID_FIELD.to_string()];
    keys.extend(fields.iter().map(|field| top_level_field(field).to_string()));

    builder.push(
        "(select coalesce(jsonb_object_agg(key, value), '{}'::jsonb) from jsonb_each(doc) where key = any(",
    );
    builder.push_bind(keys);
    builder.push("::text[]))");
}

fn push_filter(builder: &mut QueryBuilder<'_, Postgres>, filter: &Filter) {
    match filter {
        Filter::All => {
            builder.push("true");
        }
        Filter::Exists { field, exists } => {
            builder.push("(doc #> ");
            builder.push_bind(path_segments(field));
            builder.push(if *exists {
                "::text[]) is not null"
            } else {
                "::text[]) is null"
            });
        }
        Filter::NotNull(field) => {
            builder.push("coalesce(doc #> ");
            builder.push_bind(path_segments(field));
            builder.push("::text[], 'null'::jsonb) <> 'null'::jsonb");
        }
        Filter::Eq(field, value) => {
            builder.push("(doc #> ");
            builder.push_bind(path_segments(field));
            builder.push("::text[]) = ");
            builder.push_bind(Json(value.clone()));
            builder.push("::jsonb");
        }
        Filter::In(field, values) => {
            builder.push("(doc #> ");
            builder.push_bind(path_segments(field));
            builder.push("::text[]) in (select jsonb_array_elements(");
            builder.push_bind(Json(Value::Array(values.values().to_vec())));
            builder.push("::jsonb))");
        }
        Filter::And(filters) => {
            if filters.is_empty() {
                builder.push("true");
                return;
            }

            builder.push("(");
            for (index, filter) in filters.iter().enumerate() {
                if index > 0 {
                    builder.push(" and ");
                }
                push_filter(builder, filter);
            }
            builder.push(")");
        }
    }
}

fn row_to_document(row: &PgRow) -> MergeResult<Document> {
    let Json(value): Json<Value> = row.try_get("doc")?;

    match value {
        Value::Object(document) => Ok(document),
        other => bail!(
            ErrorKind::DeserializationError,
            "Stored document is not a JSON object",
            other.to_string()
        ),
    }
}
