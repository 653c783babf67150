//! Executes an async operation with exponential backoff and full jitter,
//! retrying only on errors classified as Aurora DSQL OCC serialization
//! conflicts (SQLSTATE `40001`) by default.

use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::error::StorageError;

/// Options controlling [`retry`]. Defaults match §4.3 of the design.
pub struct RetryOptions {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
    /// Invoked once per retry, between the failing attempt and the next one.
    /// Never called after the final failed attempt.
    pub on_retry: Option<Box<dyn Fn(&dyn std::error::Error, u32, u64) + Send + Sync>>,
    /// Overrides the default SQLSTATE-`40001`-only retriability check.
    pub is_retriable: Option<Box<dyn Fn(&dyn std::error::Error) -> bool + Send + Sync>>,
}

impl Default for RetryOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 100,
            max_delay_ms: 2000,
            backoff_multiplier: 2.0,
            jitter: true,
            on_retry: None,
            is_retriable: None,
        }
    }
}

impl fmt::Debug for RetryOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryOptions")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay_ms", &self.initial_delay_ms)
            .field("max_delay_ms", &self.max_delay_ms)
            .field("backoff_multiplier", &self.backoff_multiplier)
            .field("jitter", &self.jitter)
            .field("on_retry", &self.on_retry.is_some())
            .field("is_retriable", &self.is_retriable.is_some())
            .finish()
    }
}

impl RetryOptions {
    fn validate(&self) -> Result<(), StorageError> {
        if self.max_attempts < 1 {
            return Err(StorageError::InvalidRetryOptions {
                message: "maxAttempts must be >= 1".to_string(),
            });
        }
        if self.max_delay_ms == 0 {
            return Err(StorageError::InvalidRetryOptions {
                message: "maxDelayMs must be > 0".to_string(),
            });
        }
        if self.backoff_multiplier < 1.0 {
            return Err(StorageError::InvalidRetryOptions {
                message: "backoffMultiplier must be >= 1".to_string(),
            });
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(StorageError::InvalidRetryOptions {
                message: "maxDelayMs must be >= initialDelayMs".to_string(),
            });
        }
        Ok(())
    }
}

/// A `Copy`-able snapshot of the tunable parts of [`RetryOptions`], useful
/// for storing a retry policy on a long-lived object (`RetryOptions` itself
/// holds non-`Clone` callback closures).
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        let defaults = RetryOptions::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay_ms,
            max_delay_ms: defaults.max_delay_ms,
            backoff_multiplier: defaults.backoff_multiplier,
            jitter: defaults.jitter,
        }
    }
}

impl RetryPolicy {
    pub fn to_options(self) -> RetryOptions {
        RetryOptions {
            max_attempts: self.max_attempts,
            initial_delay_ms: self.initial_delay_ms,
            max_delay_ms: self.max_delay_ms,
            backoff_multiplier: self.backoff_multiplier,
            jitter: self.jitter,
            on_retry: None,
            is_retriable: None,
        }
    }
}

/// The outcome of a successful [`retry`] call.
#[derive(Debug)]
pub struct RetryOutcome<T> {
    pub result: T,
    pub attempts: u32,
    pub total_time_ms: u64,
}

/// Either a configuration failure (raised before any attempt) or the
/// underlying operation error after retries are exhausted.
#[derive(Debug)]
pub enum RetryError<E> {
    InvalidOptions(StorageError),
    Exhausted(E),
}

impl<E: fmt::Display> fmt::Display for RetryError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidOptions(err) => write!(f, "{err}"),
            Self::Exhausted(err) => write!(f, "{err}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidOptions(err) => Some(err),
            Self::Exhausted(err) => Some(err),
        }
    }
}

/// Delay (in ms) before attempt `k + 1`, 1-based `k`, given full jitter off.
fn backoff_ms(options: &RetryOptions, k: u32) -> u64 {
    let base = (options.initial_delay_ms as f64) * options.backoff_multiplier.powi((k - 1) as i32);
    base.min(options.max_delay_ms as f64) as u64
}

/// Runs `op` up to `options.max_attempts` times, retrying only when the
/// error is classified as retriable (SQLSTATE `40001` by default, or via
/// `options.is_retriable`).
///
/// `op` receives the 1-based attempt number it is being invoked for.
pub async fn retry<T, E, F, Fut>(
    mut op: F,
    options: RetryOptions,
) -> Result<RetryOutcome<T>, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: std::error::Error + Send + Sync + 'static,
{
    options.validate().map_err(RetryError::InvalidOptions)?;

    let start = Instant::now();
    let mut attempt: u32 = 1;
    loop {
        match op(attempt).await {
            Ok(result) => {
                return Ok(RetryOutcome {
                    result,
                    attempts: attempt,
                    total_time_ms: start.elapsed().as_millis() as u64,
                });
            }
            Err(error) => {
                let retriable = options
                    .is_retriable
                    .as_ref()
                    .map_or_else(|| is_serialization_failure(&error), |f| f(&error));

                if !retriable || attempt >= options.max_attempts {
                    return Err(RetryError::Exhausted(error));
                }

                let capped = backoff_ms(&options, attempt);
                let delay_ms = if options.jitter {
                    rand::rng().random_range(0..=capped)
                } else {
                    capped
                };

                if let Some(on_retry) = options.on_retry.as_ref() {
                    on_retry(&error, attempt, delay_ms);
                }

                if delay_ms > 0 {
                    tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Extracts the 5-character PostgreSQL SQLSTATE from a `tokio_postgres::Error`
/// anywhere in `err`'s source chain, case-normalized to uppercase.
pub fn sqlstate_of(err: &(dyn std::error::Error + 'static)) -> Option<String> {
    let mut cur: Option<&(dyn std::error::Error + 'static)> = Some(err);
    while let Some(e) = cur {
        if let Some(pg_err) = e.downcast_ref::<tokio_postgres::Error>() {
            if let Some(db_err) = pg_err.as_db_error() {
                return Some(db_err.code().code().to_uppercase());
            }
        }
        cur = e.source();
    }
    None
}

/// Default retriability: SQLSTATE `40001` (serialization failure under OCC)
/// and nothing else — not deadlocks (`40P01`), not connection errors, not
/// non-SQLSTATE errors.
pub fn is_serialization_failure(err: &(dyn std::error::Error + 'static)) -> bool {
    sqlstate_of(err).as_deref() == Some("40001")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Debug, thiserror::Error)]
    #[error("boom: {0}")]
    struct FakeError(String);

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let outcome = retry::<_, FakeError, _, _>(
            |_attempt| async { Ok::<_, FakeError>(42) },
            RetryOptions {
                is_retriable: Some(Box::new(|_| true)),
                ..Default::default()
            },
        )
        .await
        .unwrap();
        assert_eq!(outcome.result, 42);
        assert_eq!(outcome.attempts, 1);
    }

    #[tokio::test]
    async fn retries_once_then_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry_calls = Arc::new(AtomicU32::new(0));
        let retry_calls_cb = retry_calls.clone();

        let outcome = retry::<_, FakeError, _, _>(
            {
                let calls = calls.clone();
                move |_attempt| {
                    let calls = calls.clone();
                    async move {
                        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                            Err(FakeError("serialization_failure".to_string()))
                        } else {
                            Ok(7)
                        }
                    }
                }
            },
            RetryOptions {
                jitter: false,
                initial_delay_ms: 1,
                is_retriable: Some(Box::new(|_| true)),
                on_retry: Some(Box::new(move |_err, _attempt, _delay| {
                    retry_calls_cb.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(outcome.result, 7);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(retry_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let retry_calls = Arc::new(AtomicU32::new(0));
        let retry_calls_cb = retry_calls.clone();

        let result = retry::<(), FakeError, _, _>(
            {
                let calls = calls.clone();
                move |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(FakeError("always fails".to_string())) }
                }
            },
            RetryOptions {
                max_attempts: 3,
                jitter: false,
                initial_delay_ms: 1,
                is_retriable: Some(Box::new(|_| true)),
                on_retry: Some(Box::new(move |_err, _attempt, _delay| {
                    retry_calls_cb.fetch_add(1, Ordering::SeqCst);
                })),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retry_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retriable_error_stops_after_one_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result = retry::<(), FakeError, _, _>(
            {
                let calls = calls.clone();
                move |_attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move { Err(FakeError("undefined_table".to_string())) }
                }
            },
            RetryOptions {
                is_retriable: Some(Box::new(|_| false)),
                ..Default::default()
            },
        )
        .await;

        assert!(matches!(result, Err(RetryError::Exhausted(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn invalid_options_are_rejected_before_any_attempt() {
        for options in [
            RetryOptions {
                max_attempts: 0,
                ..Default::default()
            },
            RetryOptions {
                max_delay_ms: 0,
                ..Default::default()
            },
            RetryOptions {
                backoff_multiplier: 0.5,
                ..Default::default()
            },
            RetryOptions {
                initial_delay_ms: 500,
                max_delay_ms: 100,
                ..Default::default()
            },
        ] {
            assert!(options.validate().is_err());
        }
    }

    #[test]
    fn backoff_formula_matches_the_retry_law() {
        let options = RetryOptions {
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 2000,
            jitter: false,
            ..Default::default()
        };
        assert_eq!(backoff_ms(&options, 1), 100);
        assert_eq!(backoff_ms(&options, 2), 200);
        assert_eq!(backoff_ms(&options, 3), 400);
        assert_eq!(backoff_ms(&options, 4), 800);
        assert_eq!(backoff_ms(&options, 5), 1600);
        assert_eq!(backoff_ms(&options, 6), 2000); // capped
    }
}
