mod backoff;
mod batch;
mod circuit_breaker;
mod clock;
mod dedup;
mod orchestrator;
mod queue;
mod rate_limiter;
mod retry;


pub use backoff::BackoffPolicy;
pub use batch::{execute_chunked, BatchConfig, MAX_RECORDS_PER_REQUEST};
pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    CircuitStats,
};
pub use clock::{system_clock, Clock, ManualClock, SystemClock};
pub use dedup::{DedupConfig, DedupStats, RequestDeduplicator};
pub use orchestrator::{
    CallOptions, RateLimitMode, ResilienceConfig, ResilienceOrchestrator,
    ResilienceOrchestratorBuilder,
};
pub use queue::{QueueConfig, QueueStats, RequestQueue, Slot};
pub use rate_limiter::{RateLimitConfig, RateLimitStats, RateLimitUsage, RateLimiter, GLOBAL_KEY};
pub use retry::{with_retry, RetryConfig, RetryExecutor};
