//! Circuit breaker pattern for fault tolerance.
//!
//! One breaker exists per target (an Airtable base ID). Breakers are created
//! on first use by a [`CircuitBreakerRegistry`] and never time out on their
//! own: the Open to HalfOpen transition is computed whenever the state is
//! read.

use super::clock::{system_clock, Clock};
use crate::errors::{AirtableError, AirtableResult};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through
    Closed,
    /// Circuit is open, requests are rejected
    Open,
    /// Circuit is half-open, a bounded number of trial requests pass
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// Configuration for circuit breaker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Failures within `failure_window` that open the circuit
    pub failure_threshold: u32,
    /// Sliding window over which failures are counted
    pub failure_window: Duration,
    /// How long the circuit stays open before trial requests are admitted
    pub reset_timeout: Duration,
    /// Half-open successes required to close the circuit
    pub success_threshold: u32,
    /// Maximum concurrent trial requests while half-open
    pub half_open_max_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            failure_window: Duration::from_secs(60),
            reset_timeout: Duration::from_secs(30),
            success_threshold: 2,
            half_open_max_requests: 2,
        }
    }
}

impl CircuitBreakerConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set failure threshold
    pub fn failure_threshold(mut self, n: u32) -> Self {
        self.failure_threshold = n;
        self
    }

    /// Set failure window
    pub fn failure_window(mut self, window: Duration) -> Self {
        self.failure_window = window;
        self
    }

    /// Set reset timeout
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Set success threshold
    pub fn success_threshold(mut self, n: u32) -> Self {
        self.success_threshold = n;
        self
    }

    /// Set half-open max requests
    pub fn half_open_max_requests(mut self, n: u32) -> Self {
        self.half_open_max_requests = n;
        self
    }
}

/// Ticket issued by [`CircuitBreaker::can_request`].
///
/// Outcomes are settled against the state the request was admitted in. A
/// ticket issued before the last state change only updates the totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    generation: u64,
    trial: bool,
}

impl Admission {
    /// Whether the request holds a half-open trial slot
    pub fn is_trial(&self) -> bool {
        self.trial
    }
}

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

fn next_generation() -> u64 {
    NEXT_GENERATION.fetch_add(1, Ordering::Relaxed)
}

/// Mutable per-target state, guarded by the breaker's lock
#[derive(Debug)]
struct CircuitRecord {
    state: CircuitState,
    generation: u64,
    failure_timestamps: VecDeque<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
    total_requests: u64,
    total_successes: u64,
    total_failures: u64,
    total_rejections: u64,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    opened_at: Option<Instant>,
}

impl Default for CircuitRecord {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            generation: next_generation(),
            failure_timestamps: VecDeque::new(),
            half_open_successes: 0,
            half_open_in_flight: 0,
            total_requests: 0,
            total_successes: 0,
            total_failures: 0,
            total_rejections: 0,
            last_failure_time: None,
            last_success_time: None,
            opened_at: None,
        }
    }
}

impl CircuitRecord {
    fn open(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.generation = next_generation();
        self.opened_at = Some(now);
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.generation = next_generation();
        self.opened_at = None;
        self.failure_timestamps.clear();
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
    }

    fn half_open(&mut self) {
        self.state = CircuitState::HalfOpen;
        self.generation = next_generation();
        self.half_open_successes = 0;
        self.half_open_in_flight = 0;
    }

    fn is_current(&self, admission: Admission) -> bool {
        self.generation == admission.generation
    }

    fn prune_failures(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failure_timestamps.front() {
            if now.saturating_duration_since(oldest) > window {
                self.failure_timestamps.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Read-only snapshot of one breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStats {
    /// Target the breaker protects
    pub target: String,
    /// Current state (after lazy transition)
    pub state: CircuitState,
    /// Failures currently inside the window
    pub failure_count: usize,
    /// Successful trial requests since entering half-open
    pub half_open_successes: u32,
    /// Trial requests currently admitted
    pub half_open_in_flight: u32,
    /// Requests admitted by the breaker
    pub total_requests: u64,
    /// Recorded successes
    pub total_successes: u64,
    /// Recorded failures
    pub total_failures: u64,
    /// Requests rejected by the breaker
    pub total_rejections: u64,
    /// Wall-clock time of the last failure
    pub last_failure_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the last success
    pub last_success_at: Option<DateTime<Utc>>,
    /// When a trial request will next be admitted, while open
    pub next_retry_at: Option<DateTime<Utc>>,
}

/// Circuit breaker for a single target
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    record: RwLock<CircuitRecord>,
}

impl CircuitBreaker {
    /// Create a breaker for `target` using the system clock
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self::with_clock(target, config, system_clock())
    }

    /// Create a breaker reading time from `clock`
    pub fn with_clock(
        target: impl Into<String>,
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            target: target.into(),
            config,
            clock,
            record: RwLock::new(CircuitRecord::default()),
        }
    }

    /// Target this breaker protects
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Active configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Get the current circuit state
    pub fn state(&self) -> CircuitState {
        let now = self.clock.now();
        let mut record = self.record.write();
        self.maybe_transition_to_half_open(&mut record, now);
        record.state
    }

    /// Admit or reject a request.
    ///
    /// The returned [`Admission`] must be settled by exactly one of
    /// [`record_success`](Self::record_success),
    /// [`record_failure`](Self::record_failure) or
    /// [`release`](Self::release).
    pub fn can_request(&self) -> AirtableResult<Admission> {
        let now = self.clock.now();
        let mut record = self.record.write();
        self.maybe_transition_to_half_open(&mut record, now);

        match record.state {
            CircuitState::Closed => {
                record.total_requests += 1;
                Ok(Admission {
                    generation: record.generation,
                    trial: false,
                })
            }
            CircuitState::HalfOpen => {
                if record.half_open_in_flight < self.config.half_open_max_requests {
                    record.half_open_in_flight += 1;
                    record.total_requests += 1;
                    Ok(Admission {
                        generation: record.generation,
                        trial: true,
                    })
                } else {
                    record.total_rejections += 1;
                    debug!(base = %self.target, "Half-open trial slots exhausted");
                    Err(self.open_error(now, now))
                }
            }
            CircuitState::Open => {
                record.total_rejections += 1;
                let next_retry = record
                    .opened_at
                    .map(|opened| opened + self.config.reset_timeout)
                    .unwrap_or(now);
                Err(self.open_error(now, next_retry))
            }
        }
    }

    /// Record a successful downstream call
    pub fn record_success(&self, admission: Admission) {
        let now = self.clock.now();
        let mut record = self.record.write();
        self.maybe_transition_to_half_open(&mut record, now);

        record.total_successes += 1;
        record.last_success_time = Some(now);

        if !record.is_current(admission) {
            debug!(base = %self.target, "Ignoring success admitted before last transition");
            return;
        }

        match record.state {
            CircuitState::Closed => {
                record.failure_timestamps.clear();
            }
            CircuitState::HalfOpen => {
                record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
                record.half_open_successes += 1;

                if record.half_open_successes >= self.config.success_threshold {
                    info!(base = %self.target, "Circuit breaker transitioning to CLOSED");
                    record.close();
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed downstream call
    pub fn record_failure(&self, admission: Admission) {
        let now = self.clock.now();
        let mut record = self.record.write();
        self.maybe_transition_to_half_open(&mut record, now);

        record.total_failures += 1;
        record.last_failure_time = Some(now);

        if !record.is_current(admission) {
            debug!(base = %self.target, "Ignoring failure admitted before last transition");
            return;
        }

        match record.state {
            CircuitState::Closed => {
                record.failure_timestamps.push_back(now);
                record.prune_failures(now, self.config.failure_window);

                let failures = record.failure_timestamps.len();
                if failures >= self.config.failure_threshold as usize {
                    warn!(
                        base = %self.target,
                        failure_count = failures,
                        "Circuit breaker transitioning to OPEN"
                    );
                    record.open(now);
                }
            }
            CircuitState::HalfOpen => {
                warn!(base = %self.target, "Circuit breaker returning to OPEN from half-open");
                record.open(now);
            }
            CircuitState::Open => {}
        }
    }

    /// Return an admitted trial slot for a call that never reached downstream
    pub fn release(&self, admission: Admission) {
        let mut record = self.record.write();
        if admission.trial && record.is_current(admission) {
            record.half_open_in_flight = record.half_open_in_flight.saturating_sub(1);
        }
    }

    /// Reset the circuit breaker to closed state
    pub fn reset(&self) {
        let mut record = self.record.write();
        record.close();
        record.last_failure_time = None;
        debug!(base = %self.target, "Circuit breaker reset to CLOSED");
    }

    /// Force the breaker into `state`, for operational tooling
    pub fn force_state(&self, state: CircuitState) {
        let now = self.clock.now();
        let mut record = self.record.write();
        match state {
            CircuitState::Closed => record.close(),
            CircuitState::Open => record.open(now),
            CircuitState::HalfOpen => record.half_open(),
        }
        info!(base = %self.target, state = %state, "Circuit breaker state forced");
    }

    /// Snapshot of the breaker
    pub fn stats(&self) -> CircuitStats {
        let now = self.clock.now();
        let mut record = self.record.write();
        self.maybe_transition_to_half_open(&mut record, now);
        record.prune_failures(now, self.config.failure_window);

        let next_retry_at = match record.state {
            CircuitState::Open => record
                .opened_at
                .map(|opened| self.clock.to_utc(opened + self.config.reset_timeout)),
            _ => None,
        };

        CircuitStats {
            target: self.target.clone(),
            state: record.state,
            failure_count: record.failure_timestamps.len(),
            half_open_successes: record.half_open_successes,
            half_open_in_flight: record.half_open_in_flight,
            total_requests: record.total_requests,
            total_successes: record.total_successes,
            total_failures: record.total_failures,
            total_rejections: record.total_rejections,
            last_failure_at: record.last_failure_time.map(|t| self.clock.to_utc(t)),
            last_success_at: record.last_success_time.map(|t| self.clock.to_utc(t)),
            next_retry_at,
        }
    }

    /// Execute an operation through the circuit breaker.
    ///
    /// Returns `CircuitOpen` without invoking `f` when rejected; otherwise
    /// the outcome is recorded and returned unchanged.
    pub async fn execute<F, Fut, T>(&self, f: F) -> AirtableResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AirtableResult<T>>,
    {
        let admission = self.can_request()?;

        match f().await {
            Ok(result) => {
                self.record_success(admission);
                Ok(result)
            }
            Err(error) => {
                self.record_failure(admission);
                Err(error)
            }
        }
    }

    fn maybe_transition_to_half_open(&self, record: &mut CircuitRecord, now: Instant) {
        if record.state != CircuitState::Open {
            return;
        }
        if let Some(opened_at) = record.opened_at {
            if now >= opened_at + self.config.reset_timeout {
                debug!(base = %self.target, "Circuit breaker transitioning to HALF_OPEN");
                record.half_open();
            }
        }
    }

    fn open_error(&self, now: Instant, next_retry: Instant) -> AirtableError {
        AirtableError::CircuitOpen {
            target: self.target.clone(),
            next_retry_at: self.clock.to_utc(next_retry),
            retry_in: next_retry.saturating_duration_since(now),
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("target", &self.target)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}

/// Get-or-create registry of breakers keyed by target
pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    overrides: RwLock<HashMap<String, CircuitBreakerConfig>>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

static GLOBAL_REGISTRY: OnceLock<Arc<CircuitBreakerRegistry>> = OnceLock::new();

impl CircuitBreakerRegistry {
    /// Create a registry whose breakers use `default_config`
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self::with_clock(default_config, system_clock())
    }

    /// Create a registry whose breakers read time from `clock`
    pub fn with_clock(default_config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_config,
            clock,
            overrides: RwLock::new(HashMap::new()),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry with default configuration
    pub fn global() -> Arc<CircuitBreakerRegistry> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(CircuitBreakerRegistry::default()))
            .clone()
    }

    /// Breaker for `target`, created on first use
    pub fn get_or_create(&self, target: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(target) {
            return breaker.clone();
        }

        let config = self
            .overrides
            .read()
            .get(target)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone());

        self.breakers
            .write()
            .entry(target.to_string())
            .or_insert_with(|| {
                debug!(base = %target, "Creating circuit breaker");
                Arc::new(CircuitBreaker::with_clock(target, config, self.clock.clone()))
            })
            .clone()
    }

    /// Override the configuration for `target`.
    ///
    /// Any existing breaker for the target is replaced with a fresh closed
    /// one using the new configuration.
    pub fn configure(&self, target: &str, config: CircuitBreakerConfig) {
        self.overrides
            .write()
            .insert(target.to_string(), config.clone());
        self.breakers.write().insert(
            target.to_string(),
            Arc::new(CircuitBreaker::with_clock(target, config, self.clock.clone())),
        );
    }

    /// See [`CircuitBreaker::can_request`]
    pub fn can_request(&self, target: &str) -> AirtableResult<Admission> {
        self.get_or_create(target).can_request()
    }

    /// See [`CircuitBreaker::record_success`]
    pub fn record_success(&self, target: &str, admission: Admission) {
        self.get_or_create(target).record_success(admission);
    }

    /// See [`CircuitBreaker::record_failure`]
    pub fn record_failure(&self, target: &str, admission: Admission) {
        self.get_or_create(target).record_failure(admission);
    }

    /// See [`CircuitBreaker::release`]
    pub fn release(&self, target: &str, admission: Admission) {
        self.get_or_create(target).release(admission);
    }

    /// Current state of `target`
    pub fn state(&self, target: &str) -> CircuitState {
        self.get_or_create(target).state()
    }

    /// Reset `target` to closed
    pub fn reset(&self, target: &str) {
        self.get_or_create(target).reset();
    }

    /// Force `target` into `state`
    pub fn force_state(&self, target: &str, state: CircuitState) {
        self.get_or_create(target).force_state(state);
    }

    /// Snapshot of `target`
    pub fn stats(&self, target: &str) -> CircuitStats {
        self.get_or_create(target).stats()
    }

    /// Run `f` through the breaker for `target`
    pub async fn execute<F, Fut, T>(&self, target: &str, f: F) -> AirtableResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AirtableResult<T>>,
    {
        let breaker = self.get_or_create(target);
        breaker.execute(f).await
    }

    /// Reset every known breaker to closed
    pub fn reset_all(&self) {
        for breaker in self.snapshot() {
            breaker.reset();
        }
    }

    /// Forget every breaker and configuration override
    pub fn clear_all(&self) {
        self.breakers.write().clear();
        self.overrides.write().clear();
    }

    /// Snapshots of every known breaker, sorted by target
    pub fn stats_for_all(&self) -> Vec<CircuitStats> {
        let mut stats: Vec<CircuitStats> =
            self.snapshot().iter().map(|breaker| breaker.stats()).collect();
        stats.sort_by(|a, b| a.target.cmp(&b.target));
        stats
    }

    fn snapshot(&self) -> Vec<Arc<CircuitBreaker>> {
        self.breakers.read().values().cloned().collect()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl std::fmt::Debug for CircuitBreakerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("default_config", &self.default_config)
            .field("targets", &self.breakers.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::clock::ManualClock;

    fn registry(config: CircuitBreakerConfig) -> (CircuitBreakerRegistry, ManualClock) {
        let clock = ManualClock::new();
        let registry = CircuitBreakerRegistry::with_clock(config, Arc::new(clock.clone()));
        (registry, clock)
    }

    fn fail(registry: &CircuitBreakerRegistry, target: &str) {
        let admission = registry.can_request(target).unwrap();
        registry.record_failure(target, admission);
    }

    fn succeed(registry: &CircuitBreakerRegistry, target: &str) {
        let admission = registry.can_request(target).unwrap();
        registry.record_success(target, admission);
    }

    fn unavailable() -> AirtableError {
        AirtableError::Api {
            status: 503,
            message: "Service unavailable".to_string(),
            retry_after: None,
        }
    }

    #[test]
    fn test_initial_state() {
        let (registry, _) = registry(CircuitBreakerConfig::default());
        assert_eq!(registry.state("appA"), CircuitState::Closed);
        assert!(registry.can_request("appA").is_ok());
    }

    #[test]
    fn test_failures_open_circuit() {
        let (registry, _) = registry(CircuitBreakerConfig::new().failure_threshold(3));

        for _ in 0..2 {
            fail(&registry, "appA");
        }
        assert_eq!(registry.state("appA"), CircuitState::Closed);

        fail(&registry, "appA");
        assert_eq!(registry.state("appA"), CircuitState::Open);
    }

    #[test]
    fn test_open_rejects_with_next_retry() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .reset_timeout(Duration::from_secs(30)),
        );
        fail(&registry, "appA");
        clock.advance(Duration::from_secs(10));

        match registry.can_request("appA") {
            Err(AirtableError::CircuitOpen {
                target, retry_in, ..
            }) => {
                assert_eq!(target, "appA");
                assert_eq!(retry_in, Duration::from_secs(20));
            }
            other => panic!("expected CircuitOpen, got {:?}", other),
        }
        assert_eq!(registry.stats("appA").total_rejections, 1);
    }

    #[test]
    fn test_lazy_half_open_transition() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .reset_timeout(Duration::from_millis(500)),
        );
        fail(&registry, "appA");
        assert_eq!(registry.state("appA"), CircuitState::Open);

        clock.advance(Duration::from_millis(499));
        assert_eq!(registry.state("appA"), CircuitState::Open);

        clock.advance(Duration::from_millis(1));
        assert_eq!(registry.state("appA"), CircuitState::HalfOpen);
    }

    #[test]
    fn test_half_open_successes_close_circuit() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .success_threshold(2)
                .reset_timeout(Duration::from_secs(1)),
        );
        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));

        succeed(&registry, "appA");
        assert_eq!(registry.state("appA"), CircuitState::HalfOpen);

        succeed(&registry, "appA");
        assert_eq!(registry.state("appA"), CircuitState::Closed);
        assert_eq!(registry.stats("appA").failure_count, 0);
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .reset_timeout(Duration::from_secs(1)),
        );
        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));

        fail(&registry, "appA");
        assert_eq!(registry.state("appA"), CircuitState::Open);

        let err = registry.can_request("appA").unwrap_err();
        assert_eq!(err.retry_after(), Some(Duration::from_secs(1)));
    }

    #[test]
    fn test_half_open_limits_trial_requests() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .half_open_max_requests(2)
                .reset_timeout(Duration::from_secs(1)),
        );
        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));

        let first = registry.can_request("appA").unwrap();
        let _second = registry.can_request("appA").unwrap();
        assert!(first.is_trial());
        assert!(registry.can_request("appA").unwrap_err().is_circuit_open());

        registry.release("appA", first);
        assert!(registry.can_request("appA").is_ok());
    }

    #[test]
    fn test_stale_release_keeps_trial_slot_taken() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .half_open_max_requests(1)
                .reset_timeout(Duration::from_secs(1)),
        );
        let stale = registry.can_request("appA").unwrap();
        assert!(!stale.is_trial());

        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));
        let trial = registry.can_request("appA").unwrap();
        assert!(trial.is_trial());

        registry.release("appA", stale);

        let stats = registry.stats("appA");
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.half_open_in_flight, 1);
        assert!(registry.can_request("appA").unwrap_err().is_circuit_open());
    }

    #[test]
    fn test_stale_success_does_not_close_circuit() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .success_threshold(1)
                .reset_timeout(Duration::from_secs(1)),
        );
        let stale = registry.can_request("appA").unwrap();

        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));
        let trial = registry.can_request("appA").unwrap();

        registry.record_success("appA", stale);
        let stats = registry.stats("appA");
        assert_eq!(stats.state, CircuitState::HalfOpen);
        assert_eq!(stats.half_open_successes, 0);
        assert_eq!(stats.total_successes, 1);

        registry.record_success("appA", trial);
        assert_eq!(registry.state("appA"), CircuitState::Closed);
    }

    #[test]
    fn test_stale_failure_does_not_reopen_half_open() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(1)
                .reset_timeout(Duration::from_secs(1)),
        );
        let stale = registry.can_request("appA").unwrap();

        fail(&registry, "appA");
        clock.advance(Duration::from_secs(1));
        assert_eq!(registry.state("appA"), CircuitState::HalfOpen);

        registry.record_failure("appA", stale);
        assert_eq!(registry.state("appA"), CircuitState::HalfOpen);
        assert_eq!(registry.stats("appA").total_failures, 2);
    }

    #[test]
    fn test_failures_outside_window_do_not_combine() {
        let (registry, clock) = registry(
            CircuitBreakerConfig::new()
                .failure_threshold(3)
                .failure_window(Duration::from_secs(10)),
        );

        fail(&registry, "appA");
        fail(&registry, "appA");
        clock.advance(Duration::from_secs(11));
        fail(&registry, "appA");

        assert_eq!(registry.state("appA"), CircuitState::Closed);
        assert_eq!(registry.stats("appA").failure_count, 1);
    }

    #[test]
    fn test_success_clears_failure_window() {
        let (registry, _) = registry(CircuitBreakerConfig::new().failure_threshold(3));

        fail(&registry, "appA");
        fail(&registry, "appA");
        succeed(&registry, "appA");
        fail(&registry, "appA");

        assert_eq!(registry.state("appA"), CircuitState::Closed);
    }

    #[test]
    fn test_targets_are_isolated() {
        let (registry, _) = registry(CircuitBreakerConfig::new().failure_threshold(1));
        fail(&registry, "appA");

        assert_eq!(registry.state("appA"), CircuitState::Open);
        assert_eq!(registry.state("appB"), CircuitState::Closed);
    }

    #[test]
    fn test_configure_overrides_target() {
        let (registry, _) = registry(CircuitBreakerConfig::new().failure_threshold(5));
        registry.configure("appA", CircuitBreakerConfig::new().failure_threshold(1));

        fail(&registry, "appA");
        fail(&registry, "appB");

        assert_eq!(registry.state("appA"), CircuitState::Open);
        assert_eq!(registry.state("appB"), CircuitState::Closed);
    }

    #[test]
    fn test_force_state_reset_and_reset_all() {
        let (registry, _) = registry(CircuitBreakerConfig::default());

        registry.force_state("appA", CircuitState::Open);
        registry.force_state("appB", CircuitState::HalfOpen);
        assert_eq!(registry.state("appA"), CircuitState::Open);
        assert_eq!(registry.state("appB"), CircuitState::HalfOpen);

        registry.reset("appA");
        assert_eq!(registry.state("appA"), CircuitState::Closed);

        registry.reset_all();
        assert_eq!(registry.state("appB"), CircuitState::Closed);
    }

    #[test]
    fn test_stats_for_all_and_clear_all() {
        let (registry, _) = registry(CircuitBreakerConfig::default());
        registry.get_or_create("appB");
        registry.get_or_create("appA");

        let targets: Vec<String> = registry
            .stats_for_all()
            .into_iter()
            .map(|s| s.target)
            .collect();
        assert_eq!(targets, vec!["appA".to_string(), "appB".to_string()]);

        registry.clear_all();
        assert!(registry.stats_for_all().is_empty());
    }

    #[tokio::test]
    async fn test_execute_records_outcome() {
        let (registry, _) = registry(CircuitBreakerConfig::new().failure_threshold(1));

        let ok = registry.execute("appA", || async { Ok::<_, AirtableError>(1) }).await;
        assert_eq!(ok.unwrap(), 1);

        let err = registry
            .execute("appA", || async { Err::<(), _>(unavailable()) })
            .await;
        assert!(matches!(err, Err(AirtableError::Api { status: 503, .. })));

        let invoked = std::sync::atomic::AtomicBool::new(false);
        let rejected = registry
            .execute("appA", || async {
                invoked.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, AirtableError>(())
            })
            .await;
        assert!(rejected.unwrap_err().is_circuit_open());
        assert!(!invoked.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[test]
    fn test_global_registry_is_shared() {
        let a = CircuitBreakerRegistry::global();
        let b = CircuitBreakerRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
