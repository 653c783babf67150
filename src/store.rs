//! `DsqlStore`: the top-level object a domain client holds. Owns one
//! `DbClient` (via its pool) and delegates to the CRUD Executor and Index
//! Manager; the schema-setup registry itself is process-wide (§3
//! "Ownership") and lives in [`crate::schema_registry`], not here.

use std::sync::Arc;

use crate::config::{DsqlConfig, ResolvedConfig};
use crate::crud::{CrudExecutor, Keys};
use crate::error::Result;
use crate::index::{CreateIndexOptions, IndexDescription, IndexManager, IndexSummary};
use crate::pool::{DbClient, DsqlPool, TokenProvider};
use crate::types::TableSchema;
use crate::value::Record;

/// Ties the Pool Adapter to the CRUD Executor and Index Manager for one
/// configured schema namespace. Cheap to clone (every field is an `Arc` or
/// a small owned string), so callers may share one store across tasks.
#[derive(Clone)]
pub struct DsqlStore {
    pool: Arc<DsqlPool>,
    crud: Arc<CrudExecutor>,
    index: Arc<IndexManager>,
}

impl DsqlStore {
    /// Shape (c) of §4.1: validates `config`, builds a pool internally.
    pub fn connect(config: DsqlConfig, token_provider: Arc<dyn TokenProvider>) -> Result<Self> {
        let resolved = config.validate()?;
        Ok(Self::with_pool(Arc::new(DsqlPool::new(resolved.clone(), token_provider)), resolved.schema_name))
    }

    /// Shape (b) of §4.1: an already-built pool.
    pub fn with_pool(pool: Arc<DsqlPool>, schema_name: impl Into<String>) -> Self {
        let schema_name = schema_name.into();
        Self {
            pool: pool.clone(),
            crud: Arc::new(CrudExecutor::new(pool.clone(), schema_name.clone())),
            index: Arc::new(IndexManager::new(pool, schema_name)),
        }
    }

    /// The configuration the pool was built from, when constructed via
    /// [`Self::connect`]. Exposed for diagnostics; the store itself never
    /// needs to re-read it.
    pub fn resolved_config(config: &DsqlConfig) -> Result<ResolvedConfig> {
        config.validate()
    }

    /// Access to the raw `DbClient` contract for advanced callers running
    /// custom SQL (§6).
    pub fn client(&self) -> &dyn DbClient {
        self.pool.as_ref()
    }

    pub async fn create_table(&self, schema: &TableSchema, table: &str) -> Result<()> {
        self.crud.create_table(schema, table).await
    }

    pub async fn alter_table(&self, schema: &TableSchema, table: &str, if_not_exists: &[String]) -> Result<()> {
        self.crud.alter_table(schema, table, if_not_exists).await
    }

    pub async fn insert(&self, schema: &TableSchema, table: &str, record: Record) -> Result<()> {
        self.crud.insert(schema, table, record).await
    }

    pub async fn batch_insert(&self, schema: &TableSchema, table: &str, records: Vec<Record>) -> Result<()> {
        self.crud.batch_insert(schema, table, records).await
    }

    pub async fn load(&self, schema: &TableSchema, table: &str, keys: &Keys) -> Result<Option<Record>> {
        self.crud.load(schema, table, keys).await
    }

    pub async fn update(&self, schema: &TableSchema, table: &str, keys: &Keys, data: Record) -> Result<()> {
        self.crud.update(schema, table, keys, data).await
    }

    pub async fn batch_update(&self, schema: &TableSchema, table: &str, updates: Vec<(Keys, Record)>) -> Result<()> {
        self.crud.batch_update(schema, table, updates).await
    }

    pub async fn batch_delete(&self, schema: &TableSchema, table: &str, keys_list: Vec<Keys>) -> Result<()> {
        self.crud.batch_delete(schema, table, keys_list).await
    }

    pub async fn clear_table(&self, table: &str) -> Result<()> {
        self.crud.clear_table(table).await
    }

    pub async fn drop_table(&self, table: &str) -> Result<()> {
        self.crud.drop_table(table).await
    }

    pub async fn create_index(&self, options: &CreateIndexOptions) -> Result<()> {
        self.index.create_index(options).await
    }

    pub async fn drop_index(&self, name: &str) -> Result<()> {
        self.index.drop_index(name).await
    }

    pub async fn list_indexes(&self, table: Option<&str>) -> Result<Vec<IndexSummary>> {
        self.index.list_indexes(table).await
    }

    pub async fn describe_index(&self, name: &str) -> Result<Option<IndexDescription>> {
        self.index.describe_index(name).await
    }

    /// Creates every default index (§4.9) that does not already exist.
    /// Callers pass the subset relevant to their own managed-tables filter.
    pub async fn ensure_default_indexes(&self, indexes: &[CreateIndexOptions]) -> Result<()> {
        for options in indexes {
            self.index.create_index(options).await?;
        }
        Ok(())
    }
}
