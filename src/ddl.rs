//! Async DDL / Job Driver (§4.6): Aurora DSQL's `CREATE INDEX ASYNC`
//! pattern returns a `job_uuid`; this driver polls
//! `SELECT sys.wait_for_job($1, 1)` until the job reaches a terminal state
//! and surfaces the whole thing as one ordinary `await`-able call.

use std::time::{Duration, Instant};

use tokio_postgres::types::ToSql;

use crate::error::{Result, StorageError};
use crate::pool::DbClient;

/// Tuning for [`run_async_ddl`]. `poll_interval` is reserved for callers
/// that want to reason about expected latency; the actual `sys.wait_for_job`
/// call always waits the literal 1 second DSQL expects (§6).
#[derive(Debug, Clone, Copy)]
pub struct AsyncDdlOptions {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for AsyncDdlOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Issues `sql` (expected to return a `job_uuid` column, e.g.
/// `CREATE [UNIQUE] INDEX ASYNC ...`) and waits for the resulting job to
/// complete.
pub async fn run_async_ddl(
    client: &dyn DbClient,
    sql: &str,
    params: &[&(dyn ToSql + Sync)],
    options: AsyncDdlOptions,
) -> Result<()> {
    let row = client.one(sql, params).await?;
    let job_id: String = row.try_get("job_uuid").map_err(|e| {
        StorageError::operation("DSQL_ASYNC_DDL_NO_JOB_ID", "<ddl>", None, e)
    })?;
    wait_for_job(client, &job_id, options).await
}

/// Polls `sys.wait_for_job($1, 1)` until `COMPLETED`, `FAILED`, or
/// `options.timeout` elapses. The `1`-second wait is DSQL's own pacing for
/// the call, not `options.poll_interval` (§6: this statement must appear
/// verbatim).
pub async fn wait_for_job(client: &dyn DbClient, job_id: &str, options: AsyncDdlOptions) -> Result<()> {
    let start = Instant::now();

    loop {
        let row = client.one("SELECT sys.wait_for_job($1, 1) AS status", &[&job_id]).await?;
        let status: String = row.try_get("status").map_err(|e| {
            StorageError::operation("DSQL_ASYNC_DDL_BAD_STATUS", "<ddl>", None, e)
        })?;

        match status.as_str() {
            "COMPLETED" => return Ok(()),
            "FAILED" => {
                return Err(StorageError::AsyncJobFailed {
                    reason: format!("job {job_id} reported FAILED"),
                });
            }
            _ if start.elapsed() >= options.timeout => {
                return Err(StorageError::AsyncJobTimeout {
                    job_id: job_id.to_string(),
                    elapsed_ms: start.elapsed().as_millis() as u64,
                });
            }
            _ => continue, // RUNNING: the call above already paced us ~poll_interval
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_options_match_section_4_6() {
        let options = AsyncDdlOptions::default();
        assert_eq!(options.poll_interval, Duration::from_secs(1));
        assert_eq!(options.timeout, Duration::from_secs(60));
    }
}
