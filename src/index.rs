//! Index Manager (§4.9): `createIndex`/`dropIndex`/`listIndexes`/
//! `describeIndex`, normalizing caller-supplied index options to what DSQL
//! actually accepts (unordered, non-partial, async).

use std::sync::Arc;

use tokio_postgres::Row;

use crate::ddl::{self, AsyncDdlOptions};
use crate::error::{Result, StorageError};
use crate::identifier::quote_identifier;
use crate::pool::{DbClient, DsqlPool};

/// Mirrors the external `CreateIndexOptions` shape (§4.9). `where_clause`
/// and `tablespace` are accepted for API compatibility but ignored: DSQL has
/// no partial-index or tablespace support.
#[derive(Debug, Clone)]
pub struct CreateIndexOptions {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub where_clause: Option<String>,
    pub method: String,
    pub opclass: Option<String>,
    pub storage: Option<String>,
    pub tablespace: Option<String>,
}

impl CreateIndexOptions {
    pub fn new(name: impl Into<String>, table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns,
            unique: false,
            where_clause: None,
            method: "btree".to_string(),
            opclass: None,
            storage: None,
            tablespace: None,
        }
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }
}

#[derive(Debug, Clone)]
pub struct IndexSummary {
    pub name: String,
    pub table: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub size_bytes: u64,
    pub definition: String,
}

#[derive(Debug, Clone)]
pub struct IndexDescription {
    pub summary: IndexSummary,
    pub method: String,
    pub scans: i64,
    pub tuples_read: i64,
    pub tuples_fetched: i64,
}

/// Strips a single trailing `ASC`/`DESC` sort token (case-insensitive), per
/// DSQL's unordered-index rule (§4.9, §9).
fn strip_sort_suffix(column: &str) -> &str {
    let trimmed = column.trim();
    match trimmed.rsplit_once(char::is_whitespace) {
        Some((head, tail)) if tail.eq_ignore_ascii_case("asc") || tail.eq_ignore_ascii_case("desc") => head.trim_end(),
        _ => trimmed,
    }
}

/// DSQL reports its b-tree implementation as `btree_index`; normalize back
/// to `btree` for API consistency (§4.9).
fn normalize_method_name(method: &str) -> String {
    if method == "btree_index" {
        "btree".to_string()
    } else {
        method.to_string()
    }
}

fn row_to_index_summary(row: &Row) -> Result<IndexSummary> {
    let wrap = |e: tokio_postgres::Error| StorageError::operation("DSQL_INDEX_INTROSPECTION_FAILED", "<index>", None, e);
    Ok(IndexSummary {
        name: row.try_get::<_, String>("name").map_err(wrap)?,
        table: row.try_get::<_, String>("table_name").map_err(wrap)?,
        columns: row.try_get::<_, Vec<String>>("columns").map_err(wrap)?,
        unique: row.try_get::<_, bool>("is_unique").map_err(wrap)?,
        size_bytes: row.try_get::<_, i64>("size_bytes").map_err(wrap)? as u64,
        definition: row.try_get::<_, String>("definition").map_err(wrap)?,
    })
}

pub struct IndexManager {
    pool: Arc<DsqlPool>,
    schema_name: String,
}

impl IndexManager {
    pub fn new(pool: Arc<DsqlPool>, schema_name: impl Into<String>) -> Self {
        Self {
            pool,
            schema_name: schema_name.into(),
        }
    }

    fn qualified_table(&self, table: &str) -> Result<String> {
        Ok(format!("{}.{}", quote_identifier(&self.schema_name)?, quote_identifier(table)?))
    }

    async fn index_exists(&self, name: &str) -> Result<bool> {
        let row = self
            .pool
            .one_or_none(
                "SELECT 1 FROM pg_indexes WHERE schemaname = $1 AND indexname = $2",
                &[&self.schema_name, &name],
            )
            .await?;
        Ok(row.is_some())
    }

    /// Creates `options.name` if it does not already exist, stripping
    /// `ASC`/`DESC` column suffixes and driving the async DDL job to
    /// completion.
    pub async fn create_index(&self, options: &CreateIndexOptions) -> Result<()> {
        if self.index_exists(&options.name).await? {
            return Ok(());
        }

        let qualified_table = self.qualified_table(&options.table)?;
        let columns: Result<Vec<String>> = options.columns.iter().map(|c| quote_identifier(strip_sort_suffix(c))).collect();
        let columns = columns?.join(", ");

        let unique = if options.unique { "UNIQUE " } else { "" };
        let method = if options.method.is_empty() { "btree" } else { options.method.as_str() };
        let index_name = quote_identifier(&options.name)?;

        let mut sql = format!("CREATE {unique}INDEX ASYNC {index_name} ON {qualified_table} USING {method} ({columns})");
        if let Some(storage) = &options.storage {
            sql.push_str(&format!(" WITH ({storage})"));
        }
        // `where_clause`, `opclass`, and `tablespace` are intentionally not
        // rendered: DSQL accepts none of them.

        ddl::run_async_ddl(self.pool.as_ref(), &sql, &[], AsyncDdlOptions::default()).await
    }

    pub async fn drop_index(&self, name: &str) -> Result<()> {
        if !self.index_exists(name).await? {
            return Ok(());
        }
        let quoted = quote_identifier(name)?;
        self.pool.none(&format!("DROP INDEX IF EXISTS {quoted}"), &[]).await
    }

    pub async fn list_indexes(&self, table: Option<&str>) -> Result<Vec<IndexSummary>> {
        let sql = "SELECT i.indexname AS name, i.tablename AS table_name, \
                   array_agg(a.attname ORDER BY array_position(ix.indkey, a.attnum)) AS columns, \
                   ix.indisunique AS is_unique, pg_relation_size(c.oid) AS size_bytes, i.indexdef AS definition \
                   FROM pg_indexes i \
                   JOIN pg_class c ON c.relname = i.indexname \
                   JOIN pg_index ix ON ix.indexrelid = c.oid \
                   JOIN pg_attribute a ON a.attrelid = ix.indrelid AND a.attnum = ANY(ix.indkey) \
                   WHERE i.schemaname = $1 AND ($2::text IS NULL OR i.tablename = $2) \
                   GROUP BY i.indexname, i.tablename, ix.indisunique, c.oid, i.indexdef";

        let rows = self.pool.many_or_none(sql, &[&self.schema_name, &table]).await?;
        rows.iter().map(row_to_index_summary).collect()
    }

    async fn find_index_summary(&self, name: &str) -> Result<Option<IndexSummary>> {
        Ok(self.list_indexes(None).await?.into_iter().find(|i| i.name == name))
    }

    pub async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        let Some(summary) = self.find_index_summary(name).await? else {
            return Ok(None);
        };

        let row = self
            .pool
            .one_or_none(
                "SELECT am.amname AS method, s.idx_scan AS scans, s.idx_tup_read AS tuples_read, \
                 s.idx_tup_fetch AS tuples_fetched \
                 FROM pg_class c \
                 JOIN pg_am am ON am.oid = c.relam \
                 LEFT JOIN pg_stat_user_indexes s ON s.indexrelid = c.oid \
                 WHERE c.relname = $1",
                &[&name],
            )
            .await?;

        let (method, scans, tuples_read, tuples_fetched): (String, i64, i64, i64) = match row {
            Some(row) => (
                row.try_get::<_, String>("method").map(|m| normalize_method_name(&m)).unwrap_or_else(|_| "btree".to_string()),
                row.try_get::<_, i64>("scans").unwrap_or(0),
                row.try_get::<_, i64>("tuples_read").unwrap_or(0),
                row.try_get::<_, i64>("tuples_fetched").unwrap_or(0),
            ),
            None => ("btree".to_string(), 0, 0, 0),
        };

        Ok(Some(IndexDescription {
            summary,
            method,
            scans,
            tuples_read,
            tuples_fetched,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_trailing_asc_desc_case_insensitively() {
        assert_eq!(strip_sort_suffix("createdAt DESC"), "createdAt");
        assert_eq!(strip_sort_suffix("createdAt asc"), "createdAt");
        assert_eq!(strip_sort_suffix("createdAt"), "createdAt");
        assert_eq!(strip_sort_suffix("  createdAt   desc  "), "createdAt");
    }

    #[test]
    fn does_not_strip_a_column_that_merely_contains_asc_as_a_substring() {
        assert_eq!(strip_sort_suffix("ascendingId"), "ascendingId");
    }

    #[test]
    fn normalizes_dsql_btree_index_method_name() {
        assert_eq!(normalize_method_name("btree_index"), "btree");
        assert_eq!(normalize_method_name("gin"), "gin");
    }

    #[test]
    fn create_index_options_builder_defaults_to_btree_and_non_unique() {
        let options = CreateIndexOptions::new("idx", "mastra_threads", vec!["resourceId".to_string()]);
        assert_eq!(options.method, "btree");
        assert!(!options.unique);
    }
}
