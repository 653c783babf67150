//! CRUD Executor (§4.8): `createTable`/`alterTable`/`insert`/`batchInsert`/
//! `load`/`update`/`batchUpdate`/`batchDelete`/`clearTable`/`dropTable`,
//! built atop the Pool Adapter, Retry Engine, Batch Splitter, and Type
//! Adapter.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tokio_postgres::types::ToSql;
use tokio_postgres::Row;

use crate::batch;
use crate::ddl::{self, AsyncDdlOptions};
use crate::error::{Result, StorageError};
use crate::identifier::quote_identifier;
use crate::pool::{DbClient, DsqlPool};
use crate::retry::{self, RetryError, RetryPolicy};
use crate::schema_registry;
use crate::types::{
    shadow_column_name, ColumnDescriptor, ColumnType, TableSchema, SPANS_TABLE, WORKFLOW_SNAPSHOT_TABLE,
};
use crate::value::{self, BoundValue, Record};

/// One `(column, value)` equality condition, as used by `load`, `update`,
/// `batchUpdate`, and `batchDelete`.
pub type Keys = Vec<(String, JsonValue)>;

async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    op: &'static str,
    table: &str,
    record_count: Option<usize>,
    body: F,
) -> Result<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match retry::retry(body, policy.to_options()).await {
        Ok(outcome) => Ok(outcome.result),
        Err(RetryError::InvalidOptions(e)) => Err(e),
        Err(RetryError::Exhausted(e)) => Err(StorageError::operation(op, table, record_count, e)),
    }
}

async fn exec(client: &dyn DbClient, sql: &str, params: &[BoundValue]) -> Result<()> {
    let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();
    client.none(sql, &refs).await
}

fn column_binding(schema: &TableSchema, key: &str, value: &JsonValue) -> Result<BoundValue> {
    if let Some(descriptor) = schema.columns.get(key) {
        return value::prepare_value(key, descriptor.column_type, value);
    }
    if schema.timestamp_columns().iter().any(|c| shadow_column_name(c) == key) {
        return value::prepare_timestamptz_value(key, value);
    }
    Err(StorageError::Config {
        message: format!("column {key:?} is not declared in the schema"),
    })
}

fn column_definition(name: &str, descriptor: &ColumnDescriptor) -> Result<String> {
    let quoted = quote_identifier(name)?;
    let mut parts = vec![quoted, descriptor.column_type.sql_type().to_string()];
    if let Some(default_clause) = descriptor.column_type.default_clause(descriptor.nullable) {
        parts.push(default_clause.to_string());
    }
    if !descriptor.nullable {
        parts.push("NOT NULL".to_string());
    }
    Ok(parts.join(" "))
}

fn shadow_column_definition(timestamp_column: &str) -> Result<String> {
    let quoted = quote_identifier(&shadow_column_name(timestamp_column))?;
    Ok(format!("{quoted} TIMESTAMPTZ DEFAULT NOW()"))
}

fn build_insert(qualified: &str, schema: &TableSchema, record: &Record) -> Result<(String, Vec<BoundValue>)> {
    let mut columns = Vec::with_capacity(record.len());
    let mut params = Vec::with_capacity(record.len());
    for (key, value) in record.iter() {
        columns.push(quote_identifier(key)?);
        params.push(column_binding(schema, key, value)?);
    }
    let placeholders: Vec<String> = (1..=params.len()).map(|i| format!("${i}")).collect();
    let sql = format!(
        "INSERT INTO {qualified} ({}) VALUES ({})",
        columns.join(", "),
        placeholders.join(", ")
    );
    Ok((sql, params))
}

fn build_update(qualified: &str, schema: &TableSchema, data: &Record, keys: &Keys) -> Result<(String, Vec<BoundValue>)> {
    let mut set_parts = Vec::with_capacity(data.len());
    let mut params = Vec::with_capacity(data.len() + keys.len());
    let mut idx = 1usize;
    for (key, value) in data.iter() {
        set_parts.push(format!("{} = ${idx}", quote_identifier(key)?));
        params.push(column_binding(schema, key, value)?);
        idx += 1;
    }
    let mut where_parts = Vec::with_capacity(keys.len());
    for (key, value) in keys {
        where_parts.push(format!("{} = ${idx}", quote_identifier(key)?));
        params.push(column_binding(schema, key, value)?);
        idx += 1;
    }
    let sql = format!(
        "UPDATE {qualified} SET {} WHERE {}",
        set_parts.join(", "),
        where_parts.join(" AND ")
    );
    Ok((sql, params))
}

fn build_delete(qualified: &str, schema: &TableSchema, keys: &Keys) -> Result<(String, Vec<BoundValue>)> {
    let mut where_parts = Vec::with_capacity(keys.len());
    let mut params = Vec::with_capacity(keys.len());
    for (i, (key, value)) in keys.iter().enumerate() {
        where_parts.push(format!("{} = ${}", quote_identifier(key)?, i + 1));
        params.push(column_binding(schema, key, value)?);
    }
    let sql = format!("DELETE FROM {qualified} WHERE {}", where_parts.join(" AND "));
    Ok((sql, params))
}

fn column_value_from_row(row: &Row, name: &str, column_type: ColumnType) -> Result<JsonValue> {
    let wrap = |e: tokio_postgres::Error| StorageError::operation("DSQL_ROW_DECODE_FAILED", "<row>", None, e);
    Ok(match column_type {
        ColumnType::Text | ColumnType::Jsonb => row
            .try_get::<_, Option<String>>(name)
            .map_err(wrap)?
            .map(JsonValue::String)
            .unwrap_or(JsonValue::Null),
        ColumnType::Integer => row
            .try_get::<_, Option<i32>>(name)
            .map_err(wrap)?
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        ColumnType::Bigint => row
            .try_get::<_, Option<i64>>(name)
            .map_err(wrap)?
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        ColumnType::Boolean => row
            .try_get::<_, Option<bool>>(name)
            .map_err(wrap)?
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        ColumnType::Uuid => row
            .try_get::<_, Option<uuid::Uuid>>(name)
            .map_err(wrap)?
            .map(|v| JsonValue::String(v.to_string()))
            .unwrap_or(JsonValue::Null),
        ColumnType::Timestamp => row
            .try_get::<_, Option<chrono::NaiveDateTime>>(name)
            .map_err(wrap)?
            .map(|v| JsonValue::String(value::now_iso8601(v.and_utc())))
            .unwrap_or(JsonValue::Null),
    })
}

fn row_to_record(schema: &TableSchema, row: &Row) -> Result<Record> {
    let wrap = |e: tokio_postgres::Error| StorageError::operation("DSQL_ROW_DECODE_FAILED", "<row>", None, e);
    let mut record = Record::new();
    for (name, descriptor) in &schema.columns {
        record.insert(name.clone(), column_value_from_row(row, name, descriptor.column_type)?);
    }
    for ts_column in schema.timestamp_columns() {
        let shadow = shadow_column_name(ts_column);
        let value = row
            .try_get::<_, Option<chrono::DateTime<Utc>>>(shadow.as_str())
            .map_err(wrap)?
            .map(|v| JsonValue::String(value::now_iso8601(v)))
            .unwrap_or(JsonValue::Null);
        record.insert(shadow, value);
    }
    Ok(record)
}

/// Implements every operation in §4.8 against one logical schema namespace.
pub struct CrudExecutor {
    pool: Arc<DsqlPool>,
    schema_name: String,
    retry_policy: RetryPolicy,
}

impl CrudExecutor {
    pub fn new(pool: Arc<DsqlPool>, schema_name: impl Into<String>) -> Self {
        Self {
            pool,
            schema_name: schema_name.into(),
            retry_policy: RetryPolicy::default(),
        }
    }

    fn qualified(&self, table: &str) -> Result<String> {
        Ok(format!("{}.{}", quote_identifier(&self.schema_name)?, quote_identifier(table)?))
    }

    pub async fn create_table(&self, schema: &TableSchema, table: &str) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let qualified = self.qualified(table)?;

        let mut column_defs = Vec::new();
        for (name, descriptor) in &schema.columns {
            column_defs.push(column_definition(name, descriptor)?);
            if descriptor.column_type == ColumnType::Timestamp {
                column_defs.push(shadow_column_definition(name)?);
            }
        }
        let pk_columns = schema.primary_key_columns();
        if !pk_columns.is_empty() {
            let quoted: Result<Vec<String>> = pk_columns.iter().map(|c| quote_identifier(c)).collect();
            column_defs.push(format!("PRIMARY KEY ({})", quoted?.join(", ")));
        }

        let sql = format!("CREATE TABLE IF NOT EXISTS {qualified} ({})", column_defs.join(", "));
        with_retry(self.retry_policy, "DSQL_CREATE_TABLE_FAILED", table, None, |_attempt| {
            let sql = &sql;
            async move { self.pool.none(sql, &[]).await }
        })
        .await?;

        if table == WORKFLOW_SNAPSHOT_TABLE {
            if let Err(error) = self.ensure_workflow_snapshot_unique_index(&qualified).await {
                tracing::warn!(
                    table,
                    reason = %error,
                    "unique index creation on workflow snapshot did not complete; async job may still converge"
                );
            }
        }

        let shadow_columns: Vec<String> = schema.timestamp_columns().into_iter().map(shadow_column_name).collect();
        if !shadow_columns.is_empty() {
            self.alter_table(schema, table, &shadow_columns).await?;
        }

        if table == SPANS_TABLE {
            self.reconcile_nullable_columns(schema, table).await;
        }

        Ok(())
    }

    async fn ensure_workflow_snapshot_unique_index(&self, qualified: &str) -> Result<()> {
        let sql = format!(
            "CREATE UNIQUE INDEX ASYNC IF NOT EXISTS mastra_workflow_snapshot_workflow_name_run_id_idx \
             ON {qualified} (\"workflow_name\", \"run_id\")"
        );
        ddl::run_async_ddl(self.pool.as_ref(), &sql, &[], AsyncDdlOptions::default()).await
    }

    pub async fn alter_table(&self, schema: &TableSchema, table: &str, if_not_exists: &[String]) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let qualified = self.qualified(table)?;

        for column in if_not_exists {
            let (quoted, sql_type) = if let Some(descriptor) = schema.columns.get(column) {
                (quote_identifier(column)?, descriptor.column_type.sql_type().to_string())
            } else if schema.timestamp_columns().iter().any(|c| shadow_column_name(c) == *column) {
                (quote_identifier(column)?, "TIMESTAMPTZ DEFAULT NOW()".to_string())
            } else {
                return Err(StorageError::Config {
                    message: format!("column {column:?} is not declared in the schema"),
                });
            };

            let sql = format!("ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS {quoted} {sql_type}");
            with_retry(self.retry_policy, "DSQL_ALTER_TABLE_FAILED", table, None, |_attempt| {
                let sql = &sql;
                async move { self.pool.none(sql, &[]).await }
            })
            .await?;

            if let Some(descriptor) = schema.columns.get(column) {
                if descriptor.column_type == ColumnType::Timestamp {
                    let shadow_sql = format!(
                        "ALTER TABLE {qualified} ADD COLUMN IF NOT EXISTS {} TIMESTAMPTZ DEFAULT NOW()",
                        quote_identifier(&shadow_column_name(column))?
                    );
                    with_retry(self.retry_policy, "DSQL_ALTER_TABLE_FAILED", table, None, |_attempt| {
                        let shadow_sql = &shadow_sql;
                        async move { self.pool.none(shadow_sql, &[]).await }
                    })
                    .await?;
                }
            }
        }

        Ok(())
    }

    /// Best-effort nullable-column migration (§4.8, §9): adds any column the
    /// schema declares but the live table lacks. Never fails the caller;
    /// logs a warning and continues, matching §7 item 6.
    async fn reconcile_nullable_columns(&self, schema: &TableSchema, table: &str) {
        let existing = match self.existing_columns(table).await {
            Ok(columns) => columns,
            Err(error) => {
                tracing::warn!(table, reason = %error, "spans-table migration: could not read existing columns, skipping");
                return;
            }
        };

        let missing: Vec<String> = schema.columns.keys().filter(|name| !existing.contains(*name)).cloned().collect();
        if missing.is_empty() {
            return;
        }

        if let Err(error) = self.alter_table(schema, table, &missing).await {
            tracing::warn!(table, reason = %error, "spans-table migration: ALTER TABLE failed, continuing without blocking startup");
        }
    }

    async fn existing_columns(&self, table: &str) -> Result<HashSet<String>> {
        let rows = self
            .pool
            .many_or_none(
                "SELECT column_name FROM information_schema.columns WHERE table_schema = $1 AND table_name = $2",
                &[&self.schema_name, &table],
            )
            .await?;
        rows.into_iter()
            .map(|row| {
                row.try_get::<_, String>("column_name")
                    .map_err(|e| StorageError::operation("DSQL_SCHEMA_INTROSPECTION_FAILED", table, None, e))
            })
            .collect()
    }

    pub async fn insert(&self, schema: &TableSchema, table: &str, mut record: Record) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        value::apply_insert_timestamp_shim(&mut record);
        let qualified = self.qualified(table)?;
        let (sql, params) = build_insert(&qualified, schema, &record)?;

        with_retry(self.retry_policy, "DSQL_INSERT_FAILED", table, Some(1), |_attempt| {
            exec(self.pool.as_ref(), &sql, &params)
        })
        .await
    }

    pub async fn batch_insert(&self, schema: &TableSchema, table: &str, records: Vec<Record>) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let split = batch::split(&records, batch::DEFAULT_MAX_ROWS)?;
        let qualified = self.qualified(table)?;

        for chunk in split.batches {
            let mut prepared: Vec<Record> = chunk.to_vec();
            for record in &mut prepared {
                value::apply_insert_timestamp_shim(record);
            }
            let count = prepared.len();
            let schema = schema.clone();
            let qualified = qualified.clone();

            with_retry(self.retry_policy, "DSQL_BATCH_INSERT_FAILED", table, Some(count), |_attempt| {
                let prepared = prepared.clone();
                let schema = schema.clone();
                let qualified = qualified.clone();
                async move {
                    self.pool
                        .tx(move |tx| {
                            Box::pin(async move {
                                for record in &prepared {
                                    let (sql, params) = build_insert(&qualified, &schema, record)?;
                                    exec(tx, &sql, &params).await?;
                                }
                                Ok(())
                            })
                        })
                        .await
                }
            })
            .await?;
        }

        Ok(())
    }

    pub async fn load(&self, schema: &TableSchema, table: &str, keys: &Keys) -> Result<Option<Record>> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let qualified = self.qualified(table)?;
        let mut where_parts = Vec::new();
        let mut params: Vec<BoundValue> = Vec::new();
        for (i, (key, value)) in keys.iter().enumerate() {
            where_parts.push(format!("{} = ${}", quote_identifier(key)?, i + 1));
            params.push(column_binding(schema, key, value)?);
        }
        let where_clause = if where_parts.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_parts.join(" AND "))
        };
        let order_clause = if schema.columns.contains_key("createdAt") {
            "ORDER BY \"createdAt\" DESC"
        } else {
            ""
        };
        let sql = format!("SELECT * FROM {qualified} {where_clause} {order_clause} LIMIT 1");
        let refs: Vec<&(dyn ToSql + Sync)> = params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

        let row = with_retry(self.retry_policy, "DSQL_LOAD_FAILED", table, None, |_attempt| {
            self.pool.one_or_none(&sql, &refs)
        })
        .await?;

        let Some(row) = row else { return Ok(None) };
        let mut record = row_to_record(schema, &row)?;

        if table == WORKFLOW_SNAPSHOT_TABLE {
            if let Some(JsonValue::String(raw)) = record.get("snapshot").cloned() {
                if let Ok(parsed) = serde_json::from_str::<JsonValue>(&raw) {
                    record.insert("snapshot".to_string(), parsed);
                }
            }
        }

        Ok(Some(record))
    }

    pub async fn update(&self, schema: &TableSchema, table: &str, keys: &Keys, mut data: Record) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        value::apply_update_timestamp_shim(&mut data, Utc::now());
        let qualified = self.qualified(table)?;
        let (sql, params) = build_update(&qualified, schema, &data, keys)?;

        with_retry(self.retry_policy, "DSQL_UPDATE_FAILED", table, Some(1), |_attempt| {
            exec(self.pool.as_ref(), &sql, &params)
        })
        .await
    }

    pub async fn batch_update(&self, schema: &TableSchema, table: &str, updates: Vec<(Keys, Record)>) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let split = batch::split(&updates, batch::DEFAULT_MAX_ROWS)?;
        let qualified = self.qualified(table)?;

        for chunk in split.batches {
            let mut prepared: Vec<(Keys, Record)> = chunk.to_vec();
            let now = Utc::now();
            for (_, data) in &mut prepared {
                value::apply_update_timestamp_shim(data, now);
            }
            let count = prepared.len();
            let schema = schema.clone();
            let qualified = qualified.clone();

            with_retry(self.retry_policy, "DSQL_BATCH_UPDATE_FAILED", table, Some(count), |_attempt| {
                let prepared = prepared.clone();
                let schema = schema.clone();
                let qualified = qualified.clone();
                async move {
                    self.pool
                        .tx(move |tx| {
                            Box::pin(async move {
                                for (keys, data) in &prepared {
                                    let (sql, params) = build_update(&qualified, &schema, data, keys)?;
                                    exec(tx, &sql, &params).await?;
                                }
                                Ok(())
                            })
                        })
                        .await
                }
            })
            .await?;
        }

        Ok(())
    }

    pub async fn batch_delete(&self, schema: &TableSchema, table: &str, keys_list: Vec<Keys>) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let split = batch::split(&keys_list, batch::DEFAULT_MAX_ROWS)?;
        let qualified = self.qualified(table)?;

        for chunk in split.batches {
            let prepared: Vec<Keys> = chunk.to_vec();
            let count = prepared.len();
            let schema = schema.clone();
            let qualified = qualified.clone();

            with_retry(self.retry_policy, "DSQL_BATCH_DELETE_FAILED", table, Some(count), |_attempt| {
                let prepared = prepared.clone();
                let schema = schema.clone();
                let qualified = qualified.clone();
                async move {
                    self.pool
                        .tx(move |tx| {
                            Box::pin(async move {
                                for keys in &prepared {
                                    let (sql, params) = build_delete(&qualified, &schema, keys)?;
                                    exec(tx, &sql, &params).await?;
                                }
                                Ok(())
                            })
                        })
                        .await
                }
            })
            .await?;
        }

        Ok(())
    }

    pub async fn clear_table(&self, table: &str) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let qualified = self.qualified(table)?;
        let sql = format!("DELETE FROM {qualified}");
        with_retry(self.retry_policy, "DSQL_CLEAR_TABLE_FAILED", table, None, |_attempt| {
            let sql = &sql;
            async move { self.pool.none(sql, &[]).await }
        })
        .await
    }

    pub async fn drop_table(&self, table: &str) -> Result<()> {
        schema_registry::ensure_schema(self.pool.as_ref(), &self.schema_name).await?;
        let qualified = self.qualified(table)?;
        let sql = format!("DROP TABLE IF EXISTS {qualified}");
        with_retry(self.retry_policy, "DSQL_DROP_TABLE_FAILED", table, None, |_attempt| {
            let sql = &sql;
            async move { self.pool.none(sql, &[]).await }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ColumnDescriptor;
    use serde_json::json;

    fn threads_schema() -> TableSchema {
        TableSchema::new()
            .column("id", ColumnDescriptor::new(ColumnType::Uuid).primary_key())
            .column("resourceId", ColumnDescriptor::new(ColumnType::Text).not_null())
            .column("createdAt", ColumnDescriptor::new(ColumnType::Timestamp))
    }

    #[test]
    fn column_binding_resolves_shadow_columns_not_in_the_declared_schema() {
        let schema = threads_schema();
        let bound = column_binding(&schema, "createdAtZ", &json!("2024-01-01T00:00:00.000Z")).unwrap();
        assert!(matches!(bound, BoundValue::TimestampTz(_)));
    }

    #[test]
    fn column_binding_rejects_unknown_columns() {
        let schema = threads_schema();
        assert!(column_binding(&schema, "nope", &json!(1)).is_err());
    }

    #[test]
    fn build_insert_orders_columns_and_placeholders_together() {
        let schema = threads_schema();
        let mut record = Record::new();
        record.insert("resourceId".to_string(), json!("r-1"));
        let (sql, params) = build_insert("\"public\".\"mastra_threads\"", &schema, &record).unwrap();
        assert!(sql.starts_with("INSERT INTO \"public\".\"mastra_threads\" (\"resourceId\") VALUES ($1)"));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn build_update_numbers_set_then_where_placeholders_sequentially() {
        let schema = threads_schema();
        let mut data = Record::new();
        data.insert("resourceId".to_string(), json!("r-2"));
        let keys: Keys = vec![("id".to_string(), json!("3b1b4f0a-0000-4000-8000-000000000000"))];
        let (sql, params) = build_update("\"public\".\"mastra_threads\"", &schema, &data, &keys).unwrap();
        assert!(sql.contains("SET \"resourceId\" = $1"));
        assert!(sql.contains("WHERE \"id\" = $2"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn build_delete_builds_one_condition_per_key() {
        let schema = threads_schema();
        let keys: Keys = vec![
            ("id".to_string(), json!("3b1b4f0a-0000-4000-8000-000000000000")),
            ("resourceId".to_string(), json!("r-1")),
        ];
        let (sql, params) = build_delete("\"public\".\"mastra_threads\"", &schema, &keys).unwrap();
        assert!(sql.contains("WHERE \"id\" = $1 AND \"resourceId\" = $2"));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn column_definition_adds_not_null_and_default_clauses() {
        let col = column_definition("payload", &ColumnDescriptor::new(ColumnType::Jsonb).not_null()).unwrap();
        assert_eq!(col, "\"payload\" TEXT DEFAULT '{}' NOT NULL");
    }

    #[test]
    fn nullable_jsonb_column_carries_no_default() {
        let col = column_definition("payload", &ColumnDescriptor::new(ColumnType::Jsonb)).unwrap();
        assert_eq!(col, "\"payload\" TEXT");
    }

    #[test]
    fn shadow_column_definition_is_always_nullable_with_now_default() {
        let col = shadow_column_definition("createdAt").unwrap();
        assert_eq!(col, "\"createdAtZ\" TIMESTAMPTZ DEFAULT NOW()");
    }
}
