//! Retry of store operations with exponential backoff.

use std::future::Future;
use std::time::Duration;

use osc_config::shared::RetryConfig;
use rand::Rng;
use tracing::warn;

use crate::error::MigrationResult;
use crate::workers::policy::{RetryDirective, build_error_handling_policy};

/// Backoff state of one retried operation.
#[derive(Debug, Clone)]
pub struct RetryBackoff {
    config: RetryConfig,
    attempt: u32,
}

impl RetryBackoff {
    pub fn new(config: RetryConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Number of failures recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempt
    }

    /// Records a failure and returns the delay before the next attempt, `None` once the
    /// attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.config.max_attempts {
            return None;
        }

        self.attempt += 1;
        Some(self.calculate_backoff())
    }

    /// Exponential delay for the current attempt, capped at the maximum delay, plus up to 30%
    /// jitter.
    pub fn calculate_backoff(&self) -> Duration {
        let attempt = self.attempt.saturating_sub(1);
        let multiplier = self.config.backoff_multiplier.powi(attempt as i32);
        let base_delay_ms = self.config.initial_retry_delay_ms as f64 * multiplier;

        let capped_delay_ms = base_delay_ms.min(self.config.max_retry_delay_ms as f64);

        let jitter_factor = rand::rng().random::<f64>() * 0.3;
        let jittered_delay_ms = capped_delay_ms * (1.0 + jitter_factor);

        Duration::from_millis(jittered_delay_ms as u64)
    }
}

/// Runs `operation` until it succeeds, retrying errors classified as
/// [`RetryDirective::Timed`] with exponential backoff.
///
/// Any other error, or a timed one after `config.max_attempts` retries, is returned.
pub async fn retry_with_backoff<T, F, Fut>(
    config: &RetryConfig,
    operation_name: &'static str,
    mut operation: F,
) -> MigrationResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MigrationResult<T>>,
{
    let mut backoff = RetryBackoff::new(config.clone());

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        let policy = build_error_handling_policy(&err);
        if policy.retry_directive() != RetryDirective::Timed {
            return Err(err);
        }

        let Some(delay) = backoff.next_delay() else {
            warn!(
                operation = operation_name,
                attempts = backoff.attempts(),
                error = %err,
                "retries exhausted"
            );
            return Err(err);
        };

        warn!(
            operation = operation_name,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "operation failed, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::error::{ErrorKind, MigrationError};

    fn config() -> RetryConfig {
        RetryConfig {
            max_attempts: 3,
            initial_retry_delay_ms: 100,
            max_retry_delay_ms: 1000,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_grows_and_stays_bounded() {
        let mut backoff = RetryBackoff::new(RetryConfig {
            max_attempts: 10,
            ..config()
        });

        let first = backoff.next_delay().unwrap();
        assert!(first >= Duration::from_millis(100) && first <= Duration::from_millis(130));

        let second = backoff.next_delay().unwrap();
        assert!(second >= Duration::from_millis(200) && second <= Duration::from_millis(260));

        for _ in 0..7 {
            let delay = backoff.next_delay().unwrap();
            assert!(delay <= Duration::from_millis(1300));
        }
        assert!(backoff.next_delay().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors() {
        let calls = Arc::new(AtomicU32::new(0));

        let result = retry_with_backoff(&config(), "test", || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(MigrationError::from((ErrorKind::Deadlock, "deadlock")));
                }

                Ok(7)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry_with_backoff(&config(), "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MigrationError::from((
                    ErrorKind::SourceConnectionFailed,
                    "connection lost",
                )))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SourceConnectionFailed);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn never_retries_fatal_errors() {
        let calls = Arc::new(AtomicU32::new(0));

        let err = retry_with_backoff(&config(), "test", || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(MigrationError::from((ErrorKind::SchemaMismatch, "mismatch")))
            }
        })
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SchemaMismatch);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
