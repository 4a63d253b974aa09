//! Metrics collection for resilient Airtable calls.

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics collector for calls routed through the resilience layer.
///
/// Counters are keyed by target (base ID); error counters are additionally
/// keyed by [`AirtableError::error_code`](crate::AirtableError::error_code).
#[derive(Debug)]
pub struct MetricsCollector {
    /// Request counters by target
    request_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Error counters by target
    error_counts: RwLock<HashMap<String, AtomicU64>>,
    /// Error counters by error code
    error_codes: RwLock<HashMap<&'static str, AtomicU64>>,
    /// Latency histograms by target
    latencies: RwLock<HashMap<String, LatencyHistogram>>,
    circuit_rejections: AtomicU64,
    rate_limit_rejections: AtomicU64,
    queue_rejections: AtomicU64,
    dedup_joins: AtomicU64,
    /// Active requests gauge
    active_requests: AtomicU64,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            request_counts: RwLock::new(HashMap::new()),
            error_counts: RwLock::new(HashMap::new()),
            error_codes: RwLock::new(HashMap::new()),
            latencies: RwLock::new(HashMap::new()),
            circuit_rejections: AtomicU64::new(0),
            rate_limit_rejections: AtomicU64::new(0),
            queue_rejections: AtomicU64::new(0),
            dedup_joins: AtomicU64::new(0),
            active_requests: AtomicU64::new(0),
        }
    }

    /// Record a request start
    pub fn record_request_start(&self, target: &str) {
        self.active_requests.fetch_add(1, Ordering::Relaxed);
        increment(&self.request_counts, target);
    }

    /// Record a request completion; `error_code` is `None` on success
    pub fn record_request_end(&self, target: &str, duration_ms: u64, error_code: Option<&'static str>) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);

        let recorded = self
            .latencies
            .read()
            .get(target)
            .map(|histogram| histogram.record(duration_ms))
            .is_some();
        if !recorded {
            self.latencies
                .write()
                .entry(target.to_string())
                .or_insert_with(LatencyHistogram::new)
                .record(duration_ms);
        }

        if let Some(code) = error_code {
            increment(&self.error_counts, target);
            self.error_codes
                .write()
                .entry(code)
                .or_insert_with(|| AtomicU64::new(0))
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a request whose caller went away before it completed
    pub fn record_request_abandoned(&self) {
        self.active_requests.fetch_sub(1, Ordering::Relaxed);
    }

    /// Record a call rejected by an open circuit
    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call rejected by the rate limiter
    pub fn record_rate_limit_rejection(&self) {
        self.rate_limit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call rejected or dropped by the request queue
    pub fn record_queue_rejection(&self) {
        self.queue_rejections.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a call that joined an in-flight duplicate
    pub fn record_dedup_join(&self) {
        self.dedup_joins.fetch_add(1, Ordering::Relaxed);
    }

    /// Get total request count for a target
    pub fn request_count(&self, target: &str) -> u64 {
        load(&self.request_counts, target)
    }

    /// Get total error count for a target
    pub fn error_count(&self, target: &str) -> u64 {
        load(&self.error_counts, target)
    }

    /// Get the count of errors with `code`
    pub fn error_code_count(&self, code: &str) -> u64 {
        self.error_codes
            .read()
            .get(code)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get error rate for a target
    pub fn error_rate(&self, target: &str) -> f64 {
        let requests = self.request_count(target);
        let errors = self.error_count(target);
        if requests == 0 {
            0.0
        } else {
            errors as f64 / requests as f64
        }
    }

    /// Get latency stats for a target
    pub fn latency_stats(&self, target: &str) -> Option<LatencyStats> {
        self.latencies.read().get(target).map(|h| h.stats())
    }

    /// Get circuit rejection count
    pub fn circuit_rejections(&self) -> u64 {
        self.circuit_rejections.load(Ordering::Relaxed)
    }

    /// Get rate limit rejection count
    pub fn rate_limit_rejections(&self) -> u64 {
        self.rate_limit_rejections.load(Ordering::Relaxed)
    }

    /// Get queue rejection count
    pub fn queue_rejections(&self) -> u64 {
        self.queue_rejections.load(Ordering::Relaxed)
    }

    /// Get dedup join count
    pub fn dedup_joins(&self) -> u64 {
        self.dedup_joins.load(Ordering::Relaxed)
    }

    /// Get active request count
    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::Relaxed)
    }

    /// Get all metrics as a snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let request_counts = self.request_counts.read();
        let error_counts = self.error_counts.read();
        let latencies = self.latencies.read();

        let mut targets = HashMap::new();
        for (target, count) in request_counts.iter() {
            let errors = error_counts
                .get(target)
                .map(|c| c.load(Ordering::Relaxed))
                .unwrap_or(0);
            let latency_stats = latencies.get(target).map(|h| h.stats());

            targets.insert(
                target.clone(),
                TargetMetrics {
                    request_count: count.load(Ordering::Relaxed),
                    error_count: errors,
                    latency_stats,
                },
            );
        }

        let errors_by_code = self
            .error_codes
            .read()
            .iter()
            .map(|(code, count)| (code.to_string(), count.load(Ordering::Relaxed)))
            .collect();

        MetricsSnapshot {
            targets,
            errors_by_code,
            circuit_rejections: self.circuit_rejections(),
            rate_limit_rejections: self.rate_limit_rejections(),
            queue_rejections: self.queue_rejections(),
            dedup_joins: self.dedup_joins(),
            active_requests: self.active_requests(),
        }
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.request_counts.write().clear();
        self.error_counts.write().clear();
        self.error_codes.write().clear();
        self.latencies.write().clear();
        self.circuit_rejections.store(0, Ordering::Relaxed);
        self.rate_limit_rejections.store(0, Ordering::Relaxed);
        self.queue_rejections.store(0, Ordering::Relaxed);
        self.dedup_joins.store(0, Ordering::Relaxed);
    }
}

fn increment(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) {
    if let Some(counter) = map.read().get(key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    map.write()
        .entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed);
}

fn load(map: &RwLock<HashMap<String, AtomicU64>>, key: &str) -> u64 {
    map.read()
        .get(key)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

/// Latency histogram using buckets
#[derive(Debug)]
pub struct LatencyHistogram {
    count: AtomicU64,
    sum: AtomicU64,
    min: AtomicU64,
    max: AtomicU64,
    /// Bucket counts (0-50ms, 50-200ms, 200-1000ms, 1-5s, 5s+)
    buckets: [AtomicU64; 5],
}

impl LatencyHistogram {
    /// Create a new histogram
    pub fn new() -> Self {
        Self {
            count: AtomicU64::new(0),
            sum: AtomicU64::new(0),
            min: AtomicU64::new(u64::MAX),
            max: AtomicU64::new(0),
            buckets: Default::default(),
        }
    }

    /// Record a latency value
    pub fn record(&self, ms: u64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum.fetch_add(ms, Ordering::Relaxed);
        self.min.fetch_min(ms, Ordering::Relaxed);
        self.max.fetch_max(ms, Ordering::Relaxed);

        // Retried calls include backoff sleeps, hence the wide upper buckets.
        let bucket_idx = match ms {
            0..=50 => 0,
            51..=200 => 1,
            201..=1000 => 2,
            1001..=5000 => 3,
            _ => 4,
        };
        self.buckets[bucket_idx].fetch_add(1, Ordering::Relaxed);
    }

    /// Get statistics
    pub fn stats(&self) -> LatencyStats {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum.load(Ordering::Relaxed);
        let min = self.min.load(Ordering::Relaxed);

        LatencyStats {
            count,
            sum_ms: sum,
            min_ms: if min == u64::MAX { 0 } else { min },
            max_ms: self.max.load(Ordering::Relaxed),
            avg_ms: if count > 0 { sum / count } else { 0 },
            buckets: [
                self.buckets[0].load(Ordering::Relaxed),
                self.buckets[1].load(Ordering::Relaxed),
                self.buckets[2].load(Ordering::Relaxed),
                self.buckets[3].load(Ordering::Relaxed),
                self.buckets[4].load(Ordering::Relaxed),
            ],
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

/// Latency statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    /// Sample count
    pub count: u64,
    /// Total sum in milliseconds
    pub sum_ms: u64,
    /// Minimum latency
    pub min_ms: u64,
    /// Maximum latency
    pub max_ms: u64,
    /// Average latency
    pub avg_ms: u64,
    /// Bucket counts [0-50ms, 50-200ms, 200ms-1s, 1-5s, 5s+]
    pub buckets: [u64; 5],
}

/// Per-target metrics
#[derive(Debug, Clone, Serialize)]
pub struct TargetMetrics {
    /// Request count
    pub request_count: u64,
    /// Error count
    pub error_count: u64,
    /// Latency stats
    pub latency_stats: Option<LatencyStats>,
}

/// Complete metrics snapshot
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Per-target metrics
    pub targets: HashMap<String, TargetMetrics>,
    /// Error counts by error code
    pub errors_by_code: HashMap<String, u64>,
    /// Calls rejected by an open circuit
    pub circuit_rejections: u64,
    /// Calls rejected by the rate limiter
    pub rate_limit_rejections: u64,
    /// Calls rejected by the request queue
    pub queue_rejections: u64,
    /// Calls served by an in-flight duplicate
    pub dedup_joins: u64,
    /// Active requests
    pub active_requests: u64,
}

/// Create a shared metrics collector
pub fn create_metrics_collector() -> Arc<MetricsCollector> {
    Arc::new(MetricsCollector::new())
}
