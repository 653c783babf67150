//! Schema Bootstrap Coordinator (§4.5): a process-wide, deduplicated
//! `CREATE SCHEMA IF NOT EXISTS`, shared across every `DsqlStore` instance
//! in the process that points at the same database.

use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use tokio::sync::{Mutex, OnceCell};

use crate::error::{Result, StorageError};
use crate::identifier::quote_identifier;
use crate::pool::DbClient;

/// The default schema never needs bootstrapping.
pub const DEFAULT_SCHEMA: &str = "public";

/// `tokio::sync::OnceCell::get_or_try_init` already gives us exactly the
/// semantics §4.5 describes by hand (in-flight future shared by
/// concurrent waiters; on error, the cell stays uninitialized so the next
/// caller retries) — no separate `completed` flag is needed.
static REGISTRY: Lazy<Mutex<HashMap<String, Arc<OnceCell<()>>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

async fn schema_exists(client: &dyn DbClient, schema: &str) -> Result<bool> {
    let row = client
        .one_or_none(
            "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1",
            &[&schema],
        )
        .await?;
    Ok(row.is_some())
}

/// Ensures `schema` exists, creating it at most once per process across all
/// concurrent callers and all `DsqlStore` instances. A no-op for
/// [`DEFAULT_SCHEMA`].
pub async fn ensure_schema(client: &dyn DbClient, schema: &str) -> Result<()> {
    if schema == DEFAULT_SCHEMA {
        return Ok(());
    }
    quote_identifier(schema)?;

    let cell = {
        let mut registry = REGISTRY.lock().await;
        registry.entry(schema.to_string()).or_insert_with(|| Arc::new(OnceCell::new())).clone()
    };

    cell.get_or_try_init(|| async {
        if schema_exists(client, schema).await? {
            return Ok(());
        }
        tracing::info!(schema, "bootstrapping schema");
        let quoted = quote_identifier(schema)?;
        client
            .none(&format!("CREATE SCHEMA IF NOT EXISTS {quoted}"), &[])
            .await
            .map_err(|err| StorageError::SchemaBootstrap {
                schema: schema.to_string(),
                source: Box::new(err),
            })
    })
    .await?;

    Ok(())
}
