//! Chunked execution of large batches.
//!
//! Airtable accepts at most ten records per write. Larger batches are split
//! into chunks submitted in order through the orchestrator. A chunk rejected
//! by the request queue is retried here after a backoff delay, since the
//! orchestrator itself never retries its own gate rejections.

use super::backoff::BackoffPolicy;
use super::orchestrator::{CallOptions, RateLimitMode, ResilienceOrchestrator};
use crate::errors::{AirtableError, AirtableResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Records Airtable accepts in one create, update or delete request
pub const MAX_RECORDS_PER_REQUEST: usize = 10;

/// Configuration for chunked execution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchConfig {
    /// Items per chunk
    pub chunk_size: usize,
    /// Times a chunk is resubmitted after `QueueFull` or `QueueTimeout`
    pub max_queue_retries: u32,
    /// Delay between resubmissions
    pub backoff: BackoffPolicy,
    /// Per-chunk call options
    pub options: CallOptions,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            chunk_size: MAX_RECORDS_PER_REQUEST,
            max_queue_retries: 3,
            backoff: BackoffPolicy::new(Duration::from_millis(500), Duration::from_secs(10)),
            options: CallOptions::new().rate_limit_mode(RateLimitMode::Wait),
        }
    }
}

impl BatchConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the chunk size
    pub fn chunk_size(mut self, n: usize) -> Self {
        self.chunk_size = n;
        self
    }

    /// Set the number of resubmissions after a queue rejection
    pub fn max_queue_retries(mut self, n: u32) -> Self {
        self.max_queue_retries = n;
        self
    }

    /// Set the resubmission backoff
    pub fn backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set per-chunk call options
    pub fn options(mut self, options: CallOptions) -> Self {
        self.options = options;
        self
    }
}

/// Run `f` over `items` in chunks, in order, through `orchestrator`.
///
/// Returns one result per chunk. Stops at the first chunk that fails; chunks
/// already sent are not rolled back.
pub async fn execute_chunked<I, F, Fut, T>(
    orchestrator: &ResilienceOrchestrator,
    target: &str,
    items: Vec<I>,
    config: &BatchConfig,
    f: F,
) -> AirtableResult<Vec<T>>
where
    I: Clone + Send + Sync + 'static,
    F: Fn(Vec<I>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AirtableResult<T>> + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    if config.chunk_size == 0 {
        return Err(AirtableError::Configuration {
            message: "Batch chunk size must be greater than zero".to_string(),
        });
    }

    let f = Arc::new(f);
    let chunks: Vec<Vec<I>> = items
        .chunks(config.chunk_size)
        .map(|chunk| chunk.to_vec())
        .collect();
    let total = chunks.len();
    let mut results = Vec::with_capacity(total);

    for (index, chunk) in chunks.into_iter().enumerate() {
        let chunk = Arc::new(chunk);
        let mut resubmissions = 0;

        let result = loop {
            let f = f.clone();
            let chunk = chunk.clone();
            let outcome = orchestrator
                .call(target, None, &config.options, move || f(chunk.as_ref().clone()))
                .await;

            match outcome {
                Err(err) if is_resubmittable(&err) && resubmissions < config.max_queue_retries => {
                    let delay = config.backoff.compute_delay(resubmissions, None);
                    debug!(
                        base = %target,
                        chunk = index,
                        resubmission = resubmissions + 1,
                        delay_ms = delay.as_millis() as u64,
                        "Resubmitting chunk after queue rejection"
                    );
                    tokio::time::sleep(delay).await;
                    resubmissions += 1;
                }
                other => break other,
            }
        };

        match result {
            Ok(value) => results.push(value),
            Err(err) => {
                warn!(
                    base = %target,
                    chunk = index,
                    completed = results.len(),
                    total,
                    error = %err,
                    "Batch stopped at failed chunk"
                );
                return Err(err);
            }
        }
    }

    Ok(results)
}

fn is_resubmittable(err: &AirtableError) -> bool {
    matches!(
        err,
        AirtableError::QueueFull { .. } | AirtableError::QueueTimeout { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{QueueConfig, RateLimitConfig, ResilienceConfig};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn orchestrator() -> ResilienceOrchestrator {
        ResilienceOrchestrator::new(ResilienceConfig {
            rate_limit: RateLimitConfig::new().max_requests(100),
            ..ResilienceConfig::default()
        })
    }

    #[tokio::test]
    async fn test_items_are_chunked_in_order() {
        let orchestrator = orchestrator();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let recorder = seen.clone();

        let results = execute_chunked(
            &orchestrator,
            "appA",
            (0..23).collect::<Vec<u32>>(),
            &BatchConfig::new(),
            move |chunk| {
                let recorder = recorder.clone();
                async move {
                    recorder.lock().push(chunk.clone());
                    Ok(chunk.len())
                }
            },
        )
        .await
        .unwrap();

        assert_eq!(results, vec![10, 10, 3]);
        let seen = seen.lock();
        assert_eq!(seen[0][0], 0);
        assert_eq!(seen[2], vec![20, 21, 22]);
    }

    #[tokio::test]
    async fn test_empty_batch_and_zero_chunk_size() {
        let orchestrator = orchestrator();

        let empty = execute_chunked(
            &orchestrator,
            "appA",
            Vec::<u32>::new(),
            &BatchConfig::new(),
            |chunk| async move { Ok(chunk.len()) },
        )
        .await
        .unwrap();
        assert!(empty.is_empty());

        let invalid = execute_chunked(
            &orchestrator,
            "appA",
            vec![1u32],
            &BatchConfig::new().chunk_size(0),
            |chunk| async move { Ok(chunk.len()) },
        )
        .await;
        assert!(matches!(invalid, Err(AirtableError::Configuration { .. })));
    }

    #[tokio::test]
    async fn test_queue_rejection_is_resubmitted() {
        let orchestrator = ResilienceOrchestrator::new(ResilienceConfig {
            rate_limit: RateLimitConfig::new().max_requests(100),
            queue: QueueConfig::new()
                .max_concurrency(1)
                .max_queue_size(1)
                .queue_timeout(Duration::from_millis(20)),
            ..ResilienceConfig::default()
        });
        let blocker = orchestrator.queue().admit().await.unwrap();
        let release = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            drop(blocker);
        });

        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let results = execute_chunked(
            &orchestrator,
            "appA",
            vec![1u32, 2, 3],
            &BatchConfig::new()
                .max_queue_retries(5)
                .backoff(BackoffPolicy::new(Duration::from_millis(10), Duration::from_millis(20))),
            move |chunk| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(chunk.iter().sum::<u32>())
                }
            },
        )
        .await
        .unwrap();

        release.await.unwrap();
        assert_eq!(results, vec![6]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_chunk_stops_batch() {
        let orchestrator = orchestrator();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = execute_chunked(
            &orchestrator,
            "appA",
            (0..30).collect::<Vec<u32>>(),
            &BatchConfig::new(),
            move |chunk| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if chunk[0] == 10 {
                        Err(AirtableError::Api {
                            status: 422,
                            message: "INVALID_RECORDS".to_string(),
                            retry_after: None,
                        })
                    } else {
                        Ok(())
                    }
                }
            },
        )
        .await;

        assert!(matches!(result, Err(AirtableError::Api { status: 422, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
