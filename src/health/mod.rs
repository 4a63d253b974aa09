//! Health aggregation over the resilience components.
//!
//! Any open circuit makes the client unhealthy. A half-open circuit or a
//! nearly full request queue makes it degraded.

use crate::resilience::{
    CircuitState, CircuitStats, DedupStats, QueueStats, RateLimitStats, ResilienceOrchestrator,
};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Every component is operating normally
    Healthy,
    /// Requests are being served but some are delayed or probing
    Degraded,
    /// Requests to at least one base are being rejected
    Unhealthy,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Thresholds for degraded status
#[derive(Debug, Clone, PartialEq)]
pub struct HealthThresholds {
    /// Queue utilization at or above which the client is degraded
    pub queue_degraded_ratio: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            queue_degraded_ratio: 0.8,
        }
    }
}

/// Health snapshot, serializable for a health endpoint
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    /// Aggregated status
    pub status: HealthStatus,
    /// When the report was taken
    pub checked_at: DateTime<Utc>,
    /// Every known circuit
    pub circuits: Vec<CircuitStats>,
    /// Request queue
    pub queue: QueueStats,
    /// Deduplicator
    pub dedup: DedupStats,
    /// Rate limiter
    pub rate_limits: RateLimitStats,
    /// Human-readable reasons for a non-healthy status
    pub issues: Vec<String>,
}

impl HealthReport {
    /// True only when the status is `Healthy`
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Builds [`HealthReport`]s from an orchestrator
#[derive(Debug, Clone)]
pub struct HealthChecker {
    orchestrator: ResilienceOrchestrator,
    thresholds: HealthThresholds,
}

impl HealthChecker {
    /// Create a checker with default thresholds
    pub fn new(orchestrator: ResilienceOrchestrator) -> Self {
        Self::with_thresholds(orchestrator, HealthThresholds::default())
    }

    /// Create a checker with custom thresholds
    pub fn with_thresholds(orchestrator: ResilienceOrchestrator, thresholds: HealthThresholds) -> Self {
        Self {
            orchestrator,
            thresholds,
        }
    }

    /// Take a snapshot
    pub fn check(&self) -> HealthReport {
        let circuits = self.orchestrator.circuit_stats();
        let queue = self.orchestrator.queue_stats();
        let dedup = self.orchestrator.dedup_stats();
        let rate_limits = self.orchestrator.rate_limit_stats();

        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        for circuit in &circuits {
            match circuit.state {
                CircuitState::Open => {
                    status = status.max(HealthStatus::Unhealthy);
                    issues.push(format!("Circuit open for {}", circuit.target));
                }
                CircuitState::HalfOpen => {
                    status = status.max(HealthStatus::Degraded);
                    issues.push(format!("Circuit half-open for {}", circuit.target));
                }
                CircuitState::Closed => {}
            }
        }

        if queue.max_queue_size > 0 && queue.utilization >= self.thresholds.queue_degraded_ratio {
            status = status.max(HealthStatus::Degraded);
            issues.push(format!(
                "Request queue at {:.0}% capacity ({}/{})",
                queue.utilization * 100.0,
                queue.queued,
                queue.max_queue_size
            ));
        }

        HealthReport {
            status,
            checked_at: Utc::now(),
            circuits,
            queue,
            dedup,
            rate_limits,
            issues,
        }
    }
}
