//! Pool Adapter (§4.2): wraps a `tokio-postgres` connection pool with an
//! IAM-token-aware client factory and exposes the uniform `DbClient`
//! contract (`none`, `one`, `oneOrNone`, `manyOrNone`, `tx`).
//!
//! No connection-pooling crate appears anywhere in the reference corpus
//! this core was built against, so the pool below is hand-rolled the same
//! way the teacher's `RuntimeDb` hand-rolls a single pooled connection
//! (`db.rs`) — generalized here to `N` connections with age-based rotation.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio_postgres::types::ToSql;
use tokio_postgres::{Client, NoTls, Row, Transaction};

use crate::config::ResolvedConfig;
use crate::error::{Result, StorageError};

/// Supplies the IAM auth token minted for each new physical connection.
/// Token acquisition itself (the `dsql:DbConnect` AWS call) lives entirely
/// outside this crate (§6); the pool only calls this once per new
/// connection and hands the result to `tokio-postgres` as the password.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed password, for local/test databases that don't speak IAM auth.
pub struct StaticPassword(pub String);

#[async_trait]
impl TokenProvider for StaticPassword {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// The uniform query surface shared by the pool and by an open transaction
/// (§4.2). Identifiers in `sql` must already be validated and quoted by the
/// caller; `params` are always bound positionally.
#[async_trait]
pub trait DbClient: Send + Sync {
    /// Executes `sql`, discarding any returned rows.
    async fn none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()>;
    /// Executes `sql`, expecting exactly one row.
    async fn one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row>;
    /// Executes `sql`, expecting at most one row.
    async fn one_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<Row>>;
    /// Executes `sql`, returning zero or more rows.
    async fn many_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>>;
}

fn wrap_driver_error(source: tokio_postgres::Error) -> StorageError {
    StorageError::operation("DSQL_QUERY_FAILED", "<adhoc>", None, source)
}

struct PooledConnection {
    client: Client,
    established_at: Instant,
    poisoned: AtomicBool,
}

/// A connection pool for Aurora DSQL: mints an IAM token per new physical
/// connection, caps concurrent checkouts at `config.pool.max`, and retires
/// idle connections once they approach `config.pool.max_lifetime_seconds`
/// (well inside DSQL's hard 3,600s limit).
pub struct DsqlPool {
    config: ResolvedConfig,
    token_provider: std::sync::Arc<dyn TokenProvider>,
    semaphore: std::sync::Arc<Semaphore>,
    idle: Mutex<Vec<PooledConnection>>,
}

impl DsqlPool {
    pub fn new(config: ResolvedConfig, token_provider: std::sync::Arc<dyn TokenProvider>) -> Self {
        let max = config.pool.max.max(1) as usize;
        Self {
            semaphore: std::sync::Arc::new(Semaphore::new(max)),
            idle: Mutex::new(Vec::with_capacity(max)),
            config,
            token_provider,
        }
    }

    fn is_expired(&self, conn: &PooledConnection) -> bool {
        conn.poisoned.load(Ordering::Relaxed)
            || conn.established_at.elapsed() >= Duration::from_secs(self.config.pool.max_lifetime_seconds)
    }

    async fn dial(&self) -> Result<PooledConnection> {
        let token = self.token_provider.token().await?;
        let conn_str = format!(
            "host={} user={} dbname={} password={} connect_timeout={}",
            self.config.host,
            self.config.user,
            self.config.database,
            token,
            self.config.pool.connect_timeout_ms / 1000,
        );

        let connect_fut = tokio_postgres::connect(&conn_str, NoTls);
        let (client, connection) =
            tokio::time::timeout(Duration::from_millis(self.config.pool.connect_timeout_ms), connect_fut)
                .await
                .map_err(|_| StorageError::Config {
                    message: "connection attempt timed out".to_string(),
                })?
                .map_err(wrap_driver_error)?;

        tokio::spawn(async move {
            if let Err(error) = connection.await {
                tracing::error!(reason = %error, "dsql pool connection closed with error");
            }
        });

        Ok(PooledConnection {
            client,
            established_at: Instant::now(),
            poisoned: AtomicBool::new(false),
        })
    }

    /// Checks out a connection, rotating out anything past its lifetime.
    async fn checkout(&self) -> Result<(PooledConnection, OwnedSemaphorePermit)> {
        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("pool semaphore is never closed");

        let candidate = {
            let mut idle = self.idle.lock().await;
            idle.pop()
        };

        let conn = match candidate {
            Some(conn) if !self.is_expired(&conn) => conn,
            Some(_expired) => self.dial().await?,
            None => self.dial().await?,
        };

        Ok((conn, permit))
    }

    async fn checkin(&self, conn: PooledConnection, _permit: OwnedSemaphorePermit) {
        if !self.is_expired(&conn) {
            self.idle.lock().await.push(conn);
        }
        // otherwise drop: closes the physical connection, permit is
        // released when `_permit` goes out of scope either way.
    }

    /// Runs `f` against one checked-out connection, returning it to the
    /// pool afterward (even on error).
    async fn with_connection<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Client) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let (mut conn, permit) = self.checkout().await?;
        let result = f(&conn.client).await;
        if result.is_err() {
            conn.poisoned.store(true, Ordering::Relaxed);
        }
        self.checkin(conn, permit).await;
        result
    }

    /// Opens a transaction pinned to one connection for the lifetime of
    /// `f`. Commits on `Ok`, relies on `tokio-postgres`'s drop-triggered
    /// rollback on `Err` (mirroring `credit/store.rs`'s
    /// `tx.commit().await?` pattern, generalized to arbitrary callers).
    ///
    /// The callback is boxed rather than a plain generic closure so it can
    /// borrow the transaction handle across `.await` points without
    /// fighting higher-ranked lifetime inference at every call site.
    pub async fn tx<T>(
        &self,
        f: impl for<'c> FnOnce(&'c Transaction<'c>) -> Pin<Box<dyn Future<Output = Result<T>> + Send + 'c>> + Send,
    ) -> Result<T>
    where
        T: Send + 'static,
    {
        let (mut conn, permit) = self.checkout().await?;
        let transaction = conn
            .client
            .transaction()
            .await
            .map_err(wrap_driver_error)?;

        let result = f(&transaction).await;

        let final_result = match result {
            Ok(value) => transaction
                .commit()
                .await
                .map(|()| value)
                .map_err(wrap_driver_error),
            Err(err) => {
                // Transaction drops here without a commit; tokio-postgres
                // sends ROLLBACK on the underlying connection.
                drop(transaction);
                Err(err)
            }
        };

        if final_result.is_err() {
            conn.poisoned.store(true, Ordering::Relaxed);
        }
        self.checkin(conn, permit).await;
        final_result
    }
}

#[async_trait]
impl DbClient for DsqlPool {
    async fn none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        self.with_connection(|client| async move {
            client.execute(sql, params).await.map(|_| ()).map_err(wrap_driver_error)
        })
        .await
    }

    async fn one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        self.with_connection(|client| async move {
            client.query_one(sql, params).await.map_err(wrap_driver_error)
        })
        .await
    }

    async fn one_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<Row>> {
        self.with_connection(|client| async move {
            client.query_opt(sql, params).await.map_err(wrap_driver_error)
        })
        .await
    }

    async fn many_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.with_connection(|client| async move {
            client.query(sql, params).await.map_err(wrap_driver_error)
        })
        .await
    }
}

#[async_trait]
impl DbClient for Transaction<'_> {
    async fn none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<()> {
        self.execute(sql, params).await.map(|_| ()).map_err(wrap_driver_error)
    }

    async fn one(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Row> {
        self.query_one(sql, params).await.map_err(wrap_driver_error)
    }

    async fn one_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Option<Row>> {
        self.query_opt(sql, params).await.map_err(wrap_driver_error)
    }

    async fn many_or_none(&self, sql: &str, params: &[&(dyn ToSql + Sync)]) -> Result<Vec<Row>> {
        self.query(sql, params).await.map_err(wrap_driver_error)
    }
}
