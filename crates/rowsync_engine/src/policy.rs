//! Retry policy wrapping one logical operation.

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Callback invoked after each failed attempt that will be retried, with
/// the attempt number (1-based) and the error.
pub type OnRetry<'a> = dyn Fn(u32, &SyncError) + Send + Sync + 'a;

/// Re-runs an operation on retryable failures with exponential backoff.
#[derive(Debug, Clone, Default)]
pub struct SyncPolicy {
    config: RetryConfig,
}

impl SyncPolicy {
    /// Creates a policy.
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// A policy that runs the operation once.
    pub fn no_retry() -> Self {
        Self::new(RetryConfig::no_retry())
    }

    /// Retry configuration.
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Runs `operation` until it succeeds, fails with a non-retryable error,
    /// or the attempt budget is spent. The last error is returned unchanged.
    ///
    /// Cancellation is checked before every attempt and during backoff
    /// delays; an attempt in flight is dropped when `token` fires.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Cancelled`] on cancellation, otherwise the error
    /// of the last attempt.
    pub async fn execute<T, F, Fut>(
        &self,
        token: &CancellationToken,
        on_retry: Option<&OnRetry<'_>>,
        mut operation: F,
    ) -> SyncResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = SyncResult<T>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            if token.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let result = tokio::select! {
                _ = token.cancelled() => Err(SyncError::Cancelled),
                r = operation(attempt) => r,
            };

            match result {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt + 1 < max_attempts => {
                    attempt += 1;
                    let delay = self.config.delay_for_attempt(attempt);
                    tracing::warn!(attempt, ?delay, error = %e, "retrying after transient failure");
                    if let Some(callback) = on_retry {
                        callback(attempt, &e);
                    }
                    tokio::select! {
                        _ = token.cancelled() => return Err(SyncError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn fast(attempts: u32) -> SyncPolicy {
        SyncPolicy::new(
            RetryConfig::new(attempts)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let calls = AtomicU32::new(0);
        let retries = AtomicU32::new(0);
        let on_retry = |_: u32, _: &SyncError| {
            retries.fetch_add(1, Ordering::SeqCst);
        };

        let value = fast(5)
            .execute(&CancellationToken::new(), Some(&on_retry), |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(SyncError::transport_retryable("reset"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(retries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn exhausted_budget_returns_the_last_error() {
        let calls = AtomicU32::new(0);
        let err = fast(3)
            .execute(&CancellationToken::new(), None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::from_status(503, "Service Unavailable", "busy")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(err.status(), Some(503));
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let err = fast(3)
            .execute(&CancellationToken::new(), None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(SyncError::transport_fatal("bad certificate")) }
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn cancelled_token_skips_the_operation() {
        let token = CancellationToken::new();
        token.cancel();
        let calls = AtomicU32::new(0);
        let err = fast(3)
            .execute(&token, None, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok(()) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
