//! # Airtable API Client
//!
//! Resilient Rust client for the Airtable Web API, built for an MCP server
//! that fans many tool calls out to a handful of bases.
//!
//! ## Features
//!
//! - Per-base circuit breakers with lazy half-open recovery
//! - Sliding-window rate limiting (Airtable allows 5 requests per second per base)
//! - Bounded FIFO request queue with concurrency and wait-time limits
//! - De-duplication of identical in-flight reads
//! - Exponential backoff with jitter that honors `Retry-After`
//! - Chunked record writes within Airtable's ten-record limit
//! - Structured logging, metrics and health reporting
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_airtable::{AirtableClient, AirtableConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = AirtableConfig::builder()
//!         .api_key("pat...")
//!         .build()?;
//!     let client = AirtableClient::new(config)?;
//!
//!     let records = client.get("appXXXXXXXXXXXXXX", "Tasks").await?;
//!     println!("{}", records);
//!
//!     // Or create from environment variables
//!     // let client = AirtableClient::from_env()?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `client` - Client façade routing requests through the resilience layer
//! - `config` - Configuration types, builder and environment loading
//! - `errors` - Error types and classification
//! - `health` - Health aggregation over the resilience components
//! - `observability` - Logging setup and metrics
//! - `resilience` - Circuit breaker, rate limiter, queue, deduplicator, retry
//! - `transport` - HTTP transport seam and request keys

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod errors;
pub mod health;
pub mod observability;
pub mod resilience;
pub mod transport;

#[cfg(test)]
pub mod mocks;

pub use client::AirtableClient;
pub use config::{AirtableConfig, AirtableConfigBuilder};
pub use errors::{AirtableError, AirtableResult, NetworkError};
pub use health::{HealthChecker, HealthReport, HealthStatus, HealthThresholds};
pub use observability::{LogFormat, LogLevel, LoggingConfig, MetricsCollector};
pub use resilience::{
    CallOptions, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState,
    DedupConfig, QueueConfig, RateLimitConfig, RateLimitMode, RateLimiter, RequestDeduplicator,
    RequestQueue, ResilienceConfig, ResilienceOrchestrator, RetryConfig,
};
pub use transport::{HttpTransport, RequestKey, ReqwestTransport};

/// Default base URL for the Airtable Web API
pub const DEFAULT_BASE_URL: &str = "https://api.airtable.com/v0";

/// Default HTTP timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default maximum retries after the first attempt
pub const DEFAULT_MAX_RETRIES: u32 = 3;
