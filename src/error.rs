//! The one error type returned by this crate.

/// Errors raised by the Aurora DSQL storage core.
///
/// Every I/O-adjacent variant carries a stable `code()` so callers can
/// branch on failure kind without parsing messages, and the original
/// driver error as `#[source]` for diagnostics.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// A configuration value failed validation before any connection was made.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid value.
        message: String,
    },

    /// A caller-supplied identifier (table, column, index, or schema name)
    /// failed the strict identifier grammar.
    #[error("invalid identifier {identifier:?}: {reason}")]
    InvalidIdentifier {
        /// The rejected identifier.
        identifier: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The retry engine's options were invalid (validated before any attempt).
    #[error("invalid retry options: {message}")]
    InvalidRetryOptions {
        /// Description of the invalid option.
        message: String,
    },

    /// The batch splitter was given `maxRows <= 0`.
    #[error("maxRows must be a positive number")]
    InvalidBatchSize,

    /// A CRUD or DDL operation exhausted retries or hit a non-retriable
    /// driver error.
    #[error("{op} failed on table {table:?}: {source}")]
    Operation {
        /// Stable identifier for the failing operation, e.g. `DSQL_INSERT_FAILED`.
        op: &'static str,
        /// The logical table involved.
        table: String,
        /// Number of records in the batch, when applicable.
        record_count: Option<usize>,
        /// The underlying driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// An async DDL job (`CREATE INDEX ASYNC`, etc.) reported `FAILED`.
    #[error("async DDL job failed: {reason}")]
    AsyncJobFailed {
        /// Status detail reported by `sys.wait_for_job`.
        reason: String,
    },

    /// An async DDL job did not reach a terminal state within the wait budget.
    #[error("async DDL job timed out after {elapsed_ms}ms waiting for job {job_id}")]
    AsyncJobTimeout {
        /// The job UUID being polled.
        job_id: String,
        /// How long the core waited before giving up.
        elapsed_ms: u64,
    },

    /// The schema bootstrap coordinator failed to create a schema.
    #[error("schema bootstrap failed for {schema:?}: {source}")]
    SchemaBootstrap {
        /// The schema name.
        schema: String,
        /// The underlying driver error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl StorageError {
    /// The stable, opaque error id a caller can match on, e.g.
    /// `DSQL_BATCH_INSERT_FAILED`. Mirrors the external `createStorageErrorId`
    /// factory this core is designed to sit behind.
    pub fn code(&self) -> String {
        match self {
            Self::Config { .. } => "DSQL_CONFIG_INVALID".to_string(),
            Self::InvalidIdentifier { .. } => "DSQL_INVALID_IDENTIFIER".to_string(),
            Self::InvalidRetryOptions { .. } => "DSQL_INVALID_RETRY_OPTIONS".to_string(),
            Self::InvalidBatchSize => "DSQL_INVALID_BATCH_SIZE".to_string(),
            Self::Operation { op, .. } => op.to_string(),
            Self::AsyncJobFailed { .. } => "DSQL_ASYNC_JOB_FAILED".to_string(),
            Self::AsyncJobTimeout { .. } => "DSQL_ASYNC_JOB_TIMEOUT".to_string(),
            Self::SchemaBootstrap { .. } => "DSQL_SCHEMA_BOOTSTRAP_FAILED".to_string(),
        }
    }

    /// Wraps a driver error into an [`StorageError::Operation`] for the given
    /// stable operation id and table.
    pub fn operation(
        op: &'static str,
        table: impl Into<String>,
        record_count: Option<usize>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Operation {
            op,
            table: table.into(),
            record_count,
            source: Box::new(source),
        }
    }

    /// Returns `true` when the underlying SQLSTATE indicates an OCC
    /// serialization conflict (`40001`). Delegates to [`crate::retry::is_serialization_failure`].
    pub fn is_serialization_failure(&self) -> bool {
        match self {
            Self::Operation { source, .. } => crate::retry::sqlstate_of(source.as_ref())
                .is_some_and(|code| code.eq_ignore_ascii_case("40001")),
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_error_carries_stable_code() {
        let err = StorageError::operation(
            "DSQL_INSERT_FAILED",
            "mastra_threads",
            Some(1),
            std::io::Error::other("boom"),
        );
        assert_eq!(err.code(), "DSQL_INSERT_FAILED");
        assert!(err.to_string().contains("mastra_threads"));
    }

    #[test]
    fn config_error_code_is_stable() {
        let err = StorageError::Config {
            message: "id must not be empty".to_string(),
        };
        assert_eq!(err.code(), "DSQL_CONFIG_INVALID");
    }
}
