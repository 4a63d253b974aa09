use super::circuit_breaker::{
    Admission, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, CircuitStats,
};
use super::clock::{system_clock, Clock};
use super::dedup::{DedupConfig, DedupStats, RequestDeduplicator};
use super::queue::{QueueConfig, QueueStats, RequestQueue};
use super::rate_limiter::{RateLimitConfig, RateLimitStats, RateLimiter};
use super::retry::{RetryConfig, RetryExecutor};
use crate::errors::{AirtableError, AirtableResult};
use crate::observability::MetricsCollector;
use crate::transport::RequestKey;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Configuration for resilience behavior
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResilienceConfig {
    /// Retry and backoff
    pub retry: RetryConfig,
    /// Default circuit breaker settings for every target
    pub circuit_breaker: CircuitBreakerConfig,
    /// Default request budget for every target
    pub rate_limit: RateLimitConfig,
    /// Worker pool shared by all targets
    pub queue: QueueConfig,
    /// In-flight de-duplication table
    pub dedup: DedupConfig,
}

/// What to do when the rate limit for a target is exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RateLimitMode {
    /// Fail immediately with `RateLimited`
    #[default]
    FailFast,
    /// Wait until the window has room
    Wait,
}

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Retry configuration overriding the orchestrator's default
    pub retry: Option<RetryConfig>,
    /// Behavior when the rate limit is exhausted
    pub rate_limit_mode: RateLimitMode,
    /// Share the execution with identical in-flight calls
    pub dedup: bool,
}

impl CallOptions {
    /// Default options: fail fast, no de-duplication
    pub fn new() -> Self {
        Self::default()
    }

    /// Options for an idempotent read
    pub fn read() -> Self {
        Self::default().dedup(true)
    }

    /// Override the retry configuration
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Set the rate limit mode
    pub fn rate_limit_mode(mut self, mode: RateLimitMode) -> Self {
        self.rate_limit_mode = mode;
        self
    }

    /// Enable or disable de-duplication
    pub fn dedup(mut self, enabled: bool) -> Self {
        self.dedup = enabled;
        self
    }
}

struct Inner {
    retry_executor: RetryExecutor,
    circuit_breakers: Arc<CircuitBreakerRegistry>,
    rate_limiter: Arc<RateLimiter>,
    queue: RequestQueue,
    deduplicator: RequestDeduplicator,
    metrics: Option<Arc<MetricsCollector>>,
}

/// Composes the circuit breaker, rate limiter, request queue, deduplicator
/// and retry policy around one downstream call.
///
/// Per call, in order: de-duplication, circuit breaker admission, rate
/// limit, queue admission, the retrying call, then the outcome is recorded
/// in the breaker. A call rejected by the breaker never consumes rate
/// budget or queue capacity. Rate limit and queue rejections give back any
/// half-open trial slot and do not count as downstream failures.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct ResilienceOrchestrator {
    inner: Arc<Inner>,
}

impl ResilienceOrchestrator {
    /// Create a new resilience orchestrator with the given configuration
    pub fn new(config: ResilienceConfig) -> Self {
        ResilienceOrchestratorBuilder::new().config(config).build()
    }

    /// Create a builder for configuring the orchestrator
    pub fn builder() -> ResilienceOrchestratorBuilder {
        ResilienceOrchestratorBuilder::new()
    }

    /// Orchestrator that never rejects and never retries
    pub fn passthrough() -> Self {
        Self::new(ResilienceConfig {
            retry: RetryConfig::no_retry(),
            circuit_breaker: CircuitBreakerConfig::new().failure_threshold(u32::MAX),
            rate_limit: RateLimitConfig::new().max_requests(u32::MAX),
            queue: QueueConfig::new()
                .max_concurrency(usize::MAX)
                .max_queue_size(0),
            dedup: DedupConfig::default(),
        })
    }

    /// Run `f` against `target` under every resilience policy.
    ///
    /// `request_key` identifies duplicate requests; it is only consulted
    /// when `options.dedup` is set. Errors are either a gate rejection
    /// (`CircuitOpen`, `RateLimited`, `QueueFull`, `QueueTimeout`,
    /// `QueueCleared`) or the downstream error, unchanged.
    pub async fn call<F, Fut, T>(
        &self,
        target: &str,
        request_key: Option<&RequestKey>,
        options: &CallOptions,
        f: F,
    ) -> AirtableResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AirtableResult<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let key = match request_key {
            Some(key) if options.dedup => key,
            _ => return self.inner.guarded_call(target, options, f).await,
        };

        let inner = self.inner.clone();
        let owned_target = target.to_string();
        let owned_options = options.clone();
        let originated = Arc::new(AtomicBool::new(false));
        let flag = originated.clone();

        let result = self
            .inner
            .deduplicator
            .with_deduplication(key.as_str(), move || async move {
                flag.store(true, Ordering::SeqCst);
                inner.guarded_call(&owned_target, &owned_options, f).await
            })
            .await;

        if !originated.load(Ordering::SeqCst) {
            debug!(base = %target, key = %key, "Served by in-flight duplicate");
            if let Some(metrics) = &self.inner.metrics {
                metrics.record_dedup_join();
            }
        }
        result
    }

    /// Snapshots of every known circuit breaker
    pub fn circuit_stats(&self) -> Vec<CircuitStats> {
        self.inner.circuit_breakers.stats_for_all()
    }

    /// Rate limiter snapshot
    pub fn rate_limit_stats(&self) -> RateLimitStats {
        self.inner.rate_limiter.stats()
    }

    /// Request queue snapshot
    pub fn queue_stats(&self) -> QueueStats {
        self.inner.queue.stats()
    }

    /// Deduplicator snapshot
    pub fn dedup_stats(&self) -> DedupStats {
        self.inner.deduplicator.stats()
    }

    /// Circuit state for `target`
    pub fn circuit_state(&self, target: &str) -> CircuitState {
        self.inner.circuit_breakers.state(target)
    }

    /// Reset the circuit for `target` to closed
    pub fn reset_circuit(&self, target: &str) {
        self.inner.circuit_breakers.reset(target);
    }

    /// Force the circuit for `target` into `state`
    pub fn force_circuit_state(&self, target: &str, state: CircuitState) {
        self.inner.circuit_breakers.force_state(target, state);
    }

    /// Reset every circuit and rate window
    pub fn reset_all(&self) {
        self.inner.circuit_breakers.reset_all();
        self.inner.rate_limiter.reset_all();
    }

    /// Reject every queued call with `QueueCleared`; returns how many
    pub fn clear_queue(&self) -> usize {
        self.inner.queue.clear()
    }

    /// Wait until the queue has nothing queued or running
    pub async fn drain(&self) {
        self.inner.queue.drain().await;
    }

    /// The circuit breaker registry
    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.inner.circuit_breakers
    }

    /// The rate limiter
    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.inner.rate_limiter
    }

    /// The request queue
    pub fn queue(&self) -> &RequestQueue {
        &self.inner.queue
    }

    /// The deduplicator
    pub fn deduplicator(&self) -> &RequestDeduplicator {
        &self.inner.deduplicator
    }

    /// The attached metrics collector, if any
    pub fn metrics(&self) -> Option<&Arc<MetricsCollector>> {
        self.inner.metrics.as_ref()
    }
}

impl std::fmt::Debug for ResilienceOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilienceOrchestrator")
            .field("retry", self.inner.retry_executor.config())
            .field("queue", &self.inner.queue.stats())
            .finish()
    }
}

/// Breaker ticket held between admission and the outcome
struct BreakerAdmission<'a> {
    registry: &'a CircuitBreakerRegistry,
    target: &'a str,
    ticket: Admission,
    settled: bool,
}

impl BreakerAdmission<'_> {
    fn success(mut self) {
        self.settled = true;
        self.registry.record_success(self.target, self.ticket);
    }

    fn failure(mut self) {
        self.settled = true;
        self.registry.record_failure(self.target, self.ticket);
    }
}

impl Drop for BreakerAdmission<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.registry.release(self.target, self.ticket);
        }
    }
}

/// Entry in the active-requests gauge for one downstream call
struct InFlight<'a> {
    metrics: Option<&'a MetricsCollector>,
    target: &'a str,
    started: Instant,
    finished: bool,
}

impl<'a> InFlight<'a> {
    fn start(metrics: Option<&'a MetricsCollector>, target: &'a str) -> Self {
        if let Some(metrics) = metrics {
            metrics.record_request_start(target);
        }
        Self {
            metrics,
            target,
            started: Instant::now(),
            finished: false,
        }
    }

    fn finish(mut self, error_code: Option<&'static str>) {
        self.finished = true;
        if let Some(metrics) = self.metrics {
            let elapsed_ms = self.started.elapsed().as_millis() as u64;
            metrics.record_request_end(self.target, elapsed_ms, error_code);
        }
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Some(metrics) = self.metrics {
                metrics.record_request_abandoned();
            }
        }
    }
}

impl Inner {
    async fn guarded_call<F, Fut, T>(
        &self,
        target: &str,
        options: &CallOptions,
        f: F,
    ) -> AirtableResult<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = AirtableResult<T>>,
    {
        let ticket = match self.circuit_breakers.can_request(target) {
            Ok(ticket) => ticket,
            Err(err) => {
                debug!(base = %target, "Rejected by open circuit");
                if let Some(metrics) = &self.metrics {
                    metrics.record_circuit_rejection();
                }
                return Err(err);
            }
        };
        let admission = BreakerAdmission {
            registry: &self.circuit_breakers,
            target,
            ticket,
            settled: false,
        };

        match options.rate_limit_mode {
            RateLimitMode::FailFast => {
                if let Err(err) = self.rate_limiter.check(target) {
                    if let Some(metrics) = &self.metrics {
                        metrics.record_rate_limit_rejection();
                    }
                    return Err(err);
                }
            }
            RateLimitMode::Wait => self.rate_limiter.acquire(target).await,
        }

        let mut slot = match self.queue.admit().await {
            Ok(slot) => slot,
            Err(err) => {
                if let Some(metrics) = &self.metrics {
                    metrics.record_queue_rejection();
                }
                return Err(err);
            }
        };

        let override_executor = options.retry.clone().map(RetryExecutor::new);
        let executor = override_executor.as_ref().unwrap_or(&self.retry_executor);

        let in_flight = InFlight::start(self.metrics.as_deref(), target);

        let result = executor.execute(target, &f).await;
        slot.record(result.is_ok());
        drop(slot);

        in_flight.finish(result.as_ref().err().map(AirtableError::error_code));

        match &result {
            Ok(_) => admission.success(),
            Err(_) => admission.failure(),
        }
        result
    }
}

/// Builder for configuring resilience orchestrator
pub struct ResilienceOrchestratorBuilder {
    config: ResilienceConfig,
    clock: Option<Arc<dyn Clock>>,
    circuit_breakers: Option<Arc<CircuitBreakerRegistry>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl ResilienceOrchestratorBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: ResilienceConfig::default(),
            clock: None,
            circuit_breakers: None,
            metrics: None,
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: ResilienceConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the retry configuration
    pub fn retry_config(mut self, config: RetryConfig) -> Self {
        self.config.retry = config;
        self
    }

    /// Set the circuit breaker configuration
    pub fn circuit_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.config.circuit_breaker = config;
        self
    }

    /// Set the rate limit configuration
    pub fn rate_limit_config(mut self, config: RateLimitConfig) -> Self {
        self.config.rate_limit = config;
        self
    }

    /// Set the queue configuration
    pub fn queue_config(mut self, config: QueueConfig) -> Self {
        self.config.queue = config;
        self
    }

    /// Set the de-duplication configuration
    pub fn dedup_config(mut self, config: DedupConfig) -> Self {
        self.config.dedup = config;
        self
    }

    /// Read time from `clock` instead of the system clock
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Share an existing circuit breaker registry, such as
    /// [`CircuitBreakerRegistry::global`]. The circuit breaker configuration
    /// and clock of this builder do not apply to it.
    pub fn circuit_breakers(mut self, registry: Arc<CircuitBreakerRegistry>) -> Self {
        self.circuit_breakers = Some(registry);
        self
    }

    /// Record call metrics into `metrics`
    pub fn metrics(mut self, metrics: Arc<MetricsCollector>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the resilience orchestrator
    pub fn build(self) -> ResilienceOrchestrator {
        let clock = self.clock.unwrap_or_else(system_clock);
        let config = self.config;

        let circuit_breakers = self.circuit_breakers.unwrap_or_else(|| {
            Arc::new(CircuitBreakerRegistry::with_clock(
                config.circuit_breaker.clone(),
                clock.clone(),
            ))
        });

        ResilienceOrchestrator {
            inner: Arc::new(Inner {
                retry_executor: RetryExecutor::new(config.retry),
                circuit_breakers,
                rate_limiter: Arc::new(RateLimiter::with_clock(config.rate_limit, clock.clone())),
                queue: RequestQueue::new(config.queue),
                deduplicator: RequestDeduplicator::with_clock(config.dedup, clock),
                metrics: self.metrics,
            }),
        }
    }
}

impl Default for ResilienceOrchestratorBuilder {
    fn default() -> Self {
        Self::new()
    }
}
