//! Retry logic with exponential backoff for transient failures.

use super::backoff::BackoffPolicy;
use crate::errors::AirtableResult;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    /// Retries after the first attempt; total attempts are `max_retries + 1`
    pub max_retries: u32,
    /// Base delay for exponential backoff
    pub base_delay: Duration,
    /// Maximum computed delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that performs a single attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Set maximum retries
    pub fn max_retries(mut self, n: u32) -> Self {
        self.max_retries = n;
        self
    }

    /// Set base delay
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Set maximum delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Backoff policy derived from this configuration
    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy::new(self.base_delay, self.max_delay)
    }
}

/// Retry executor that handles retry logic with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    config: RetryConfig,
    backoff: BackoffPolicy,
}

impl RetryExecutor {
    /// Create a new retry executor with the given configuration
    pub fn new(config: RetryConfig) -> Self {
        Self {
            backoff: config.backoff(),
            config,
        }
    }

    /// The configuration this executor was built with
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Execute the given operation with retry logic.
    ///
    /// Non-retryable errors return immediately. After the last attempt the
    /// final error is returned unchanged.
    pub async fn execute<F, Fut, T>(&self, operation: &str, f: F) -> AirtableResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AirtableResult<T>>,
    {
        let mut attempt: u32 = 0;

        loop {
            match f().await {
                Ok(result) => {
                    if attempt > 0 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(result);
                }
                Err(error) if !error.is_retryable() => return Err(error),
                Err(error) => {
                    if attempt >= self.config.max_retries {
                        warn!(
                            operation,
                            attempts = attempt + 1,
                            error = %error,
                            "Retries exhausted"
                        );
                        return Err(error);
                    }

                    let delay = self.backoff.compute_delay(attempt, error.retry_after());
                    debug!(
                        operation,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after transient error"
                    );

                    sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Execute an operation with retry logic using a one-off configuration
pub async fn with_retry<F, Fut, T>(config: &RetryConfig, operation: &str, f: F) -> AirtableResult<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = AirtableResult<T>>,
{
    RetryExecutor::new(config.clone()).execute(operation, f).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{AirtableError, NetworkError};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn unavailable() -> AirtableError {
        AirtableError::Api {
            status: 503,
            message: "Service unavailable".to_string(),
            retry_after: None,
        }
    }

    fn fast_config(max_retries: u32) -> RetryConfig {
        RetryConfig::new()
            .max_retries(max_retries)
            .base_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
    }

    #[tokio::test]
    async fn test_succeeds_on_first_attempt() {
        let executor = RetryExecutor::new(RetryConfig::default());
        let attempts = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, AirtableError>(42)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let executor = RetryExecutor::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let result = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(AirtableError::Network(NetworkError::ConnectionReset {
                            message: "reset by peer".to_string(),
                        }))
                    } else {
                        Ok("ok")
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_error_is_not_retried() {
        let executor = RetryExecutor::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: AirtableResult<()> = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(AirtableError::Api {
                        status: 422,
                        message: "INVALID_VALUE_FOR_COLUMN".to_string(),
                        retry_after: None,
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(AirtableError::Api { status: 422, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unclassified_transport_error_is_not_retried() {
        let executor = RetryExecutor::new(fast_config(3));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: AirtableResult<()> = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(AirtableError::Network(NetworkError::classify(
                        "builder error: invalid header value",
                        None,
                        false,
                    )))
                }
            })
            .await;

        assert!(matches!(
            result,
            Err(AirtableError::Network(NetworkError::Other { .. }))
        ));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let executor = RetryExecutor::new(fast_config(2));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: AirtableResult<()> = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err(unavailable())
                }
            })
            .await;

        assert!(matches!(result, Err(AirtableError::Api { status: 503, .. })));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_server_hint_controls_delay() {
        let executor = RetryExecutor::new(
            RetryConfig::new()
                .max_retries(1)
                .base_delay(Duration::from_millis(1)),
        );
        let attempts = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();

        let result = executor
            .execute("test", || {
                let attempts = attempts.clone();
                async move {
                    if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(AirtableError::Api {
                            status: 429,
                            message: "Too many requests".to_string(),
                            retry_after: Some(Duration::from_secs(30)),
                        })
                    } else {
                        Ok(())
                    }
                }
            })
            .await;

        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_with_retry_helper() {
        let result = with_retry(&RetryConfig::no_retry(), "test", || async {
            Err::<(), _>(unavailable())
        })
        .await;
        assert!(result.is_err());
    }
}
