//! Logical column types and per-table schema descriptors.
//!
//! The core only ever sees these seven logical types; it must not assume
//! any others exist (§3).

use std::collections::BTreeMap;

/// A logical column type, mapped to a concrete DSQL SQL type by
/// [`ColumnType::sql_type`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Integer,
    Bigint,
    Boolean,
    Uuid,
    Timestamp,
    Jsonb,
}

impl ColumnType {
    /// The DSQL SQL type this logical type is materialized as.
    pub fn sql_type(self) -> &'static str {
        match self {
            Self::Text => "TEXT",
            Self::Integer => "INTEGER",
            Self::Bigint => "BIGINT",
            Self::Boolean => "BOOLEAN",
            Self::Uuid => "UUID",
            // The base column stores the naive timestamp; the *Z sibling
            // carries TIMESTAMPTZ and the actual DEFAULT NOW().
            Self::Timestamp => "TIMESTAMP",
            // DSQL's DDL support for native JSONB defaults is incomplete;
            // store as TEXT and cast at filter time (§4.7).
            Self::Jsonb => "TEXT",
        }
    }

    /// The `DEFAULT` clause DSQL should carry for a column of this type, if
    /// any (§4.7). A non-nullable `jsonb` column defaults to `'{}'`; a
    /// nullable one defaults to SQL `NULL` like everything else (§3
    /// invariant 2). Only the `*Z` shadow column carries the timestamp
    /// default; the base `timestamp` column itself has none.
    pub fn default_clause(self, nullable: bool) -> Option<&'static str> {
        match self {
            Self::Jsonb if !nullable => Some("DEFAULT '{}'"),
            _ => None,
        }
    }
}

/// Describes one column in a logical table schema.
#[derive(Debug, Clone)]
pub struct ColumnDescriptor {
    pub column_type: ColumnType,
    pub nullable: bool,
    pub primary_key: bool,
}

impl ColumnDescriptor {
    pub fn new(column_type: ColumnType) -> Self {
        Self {
            column_type,
            nullable: true,
            primary_key: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }
}

/// A table's full schema: an ordered map from column name to descriptor.
/// `BTreeMap` keeps `CREATE TABLE` column order deterministic across runs,
/// which keeps generated DDL (and test fixtures) stable.
#[derive(Debug, Clone, Default)]
pub struct TableSchema {
    pub columns: BTreeMap<String, ColumnDescriptor>,
}

impl TableSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn column(mut self, name: impl Into<String>, descriptor: ColumnDescriptor) -> Self {
        self.columns.insert(name.into(), descriptor);
        self
    }

    /// Names of every `timestamp`-typed column, in column order.
    pub fn timestamp_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, d)| d.column_type == ColumnType::Timestamp)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names of every column declared `jsonb`.
    pub fn jsonb_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, d)| d.column_type == ColumnType::Jsonb)
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Names of every primary-key column, in column order.
    pub fn primary_key_columns(&self) -> Vec<&str> {
        self.columns
            .iter()
            .filter(|(_, d)| d.primary_key)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// The shadow `TIMESTAMPTZ` column name for a `timestamp` column, e.g.
/// `createdAt` -> `createdAtZ`.
pub fn shadow_column_name(column: &str) -> String {
    format!("{column}Z")
}

/// Well-known table name requiring the async unique index on
/// `(workflow_name, run_id)` (§3 invariant 4).
pub const WORKFLOW_SNAPSHOT_TABLE: &str = "mastra_workflow_snapshot";

/// Well-known table name carrying the best-effort nullable-column
/// migration described in §4.8.
pub const SPANS_TABLE: &str = "mastra_ai_spans";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_mapping_matches_the_table_in_section_4_7() {
        assert_eq!(ColumnType::Text.sql_type(), "TEXT");
        assert_eq!(ColumnType::Integer.sql_type(), "INTEGER");
        assert_eq!(ColumnType::Bigint.sql_type(), "BIGINT");
        assert_eq!(ColumnType::Boolean.sql_type(), "BOOLEAN");
        assert_eq!(ColumnType::Uuid.sql_type(), "UUID");
        assert_eq!(ColumnType::Timestamp.sql_type(), "TIMESTAMP");
        assert_eq!(ColumnType::Jsonb.sql_type(), "TEXT");
    }

    #[test]
    fn only_non_nullable_jsonb_carries_a_default() {
        assert_eq!(ColumnType::Jsonb.default_clause(false), Some("DEFAULT '{}'"));
        assert_eq!(ColumnType::Jsonb.default_clause(true), None);
        assert_eq!(ColumnType::Timestamp.default_clause(false), None);
        assert_eq!(ColumnType::Text.default_clause(false), None);
    }

    #[test]
    fn shadow_column_name_appends_z() {
        assert_eq!(shadow_column_name("createdAt"), "createdAtZ");
        assert_eq!(shadow_column_name("updated_at"), "updated_atZ");
    }

    #[test]
    fn schema_reports_timestamp_and_jsonb_columns() {
        let schema = TableSchema::new()
            .column("id", ColumnDescriptor::new(ColumnType::Uuid).primary_key())
            .column("createdAt", ColumnDescriptor::new(ColumnType::Timestamp))
            .column("payload", ColumnDescriptor::new(ColumnType::Jsonb).not_null());

        assert_eq!(schema.timestamp_columns(), vec!["createdAt"]);
        assert_eq!(schema.jsonb_columns(), vec!["payload"]);
        assert_eq!(schema.primary_key_columns(), vec!["id"]);
    }
}
