//! Error types for the Airtable client.

use super::network::NetworkError;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for Airtable operations
pub type AirtableResult<T> = Result<T, AirtableError>;

/// Main error type for the Airtable client.
///
/// The first five variants are raised by the resilience layer itself and are
/// never retried by it. `Api` and `Network` are downstream failures; they
/// keep their kind across retries so callers can match on them.
#[derive(Error, Debug, Clone)]
pub enum AirtableError {
    /// The circuit breaker for the target is open; fail fast and do not retry
    #[error("Circuit breaker open for {target}, next retry at {next_retry_at}")]
    CircuitOpen {
        /// Target (base ID) whose circuit is open
        target: String,
        /// Wall-clock instant at which a trial request will be admitted
        next_retry_at: DateTime<Utc>,
        /// Time remaining until `next_retry_at`
        retry_in: Duration,
    },

    /// The local request budget for the key is exhausted
    #[error("Rate limit exceeded for {key}, retry after {retry_after_secs}s")]
    RateLimited {
        /// Rate limiter key (usually the base ID)
        key: String,
        /// Whole seconds until the oldest request leaves the window
        retry_after_secs: u64,
    },

    /// The request queue has no room for another waiter
    #[error("Request queue is full ({queue_size}/{max_queue_size})")]
    QueueFull {
        /// Number of entries waiting when the request was rejected
        queue_size: usize,
        /// Configured queue bound
        max_queue_size: usize,
    },

    /// The request waited in the queue longer than allowed
    #[error("Request timed out after {wait_time:?} in queue (limit {timeout:?})")]
    QueueTimeout {
        /// How long the request actually waited
        wait_time: Duration,
        /// Configured queue timeout
        timeout: Duration,
    },

    /// The queue was cleared while the request was waiting
    #[error("Request queue was cleared before the request could run")]
    QueueCleared,

    /// Non-success HTTP response from the Airtable API
    #[error("Airtable API error {status}: {message}")]
    Api {
        /// HTTP status code
        status: u16,
        /// Error message extracted from the response body
        message: String,
        /// Server-provided `Retry-After` hint
        retry_after: Option<Duration>,
    },

    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message describing the configuration issue
        message: String,
    },

    /// Request or response body could not be (de)serialized
    #[error("Serialization error: {message}")]
    Serialization {
        /// Error message from the serializer
        message: String,
    },

    /// Unexpected internal condition
    #[error("Internal error: {message}")]
    Internal {
        /// Error message describing the internal issue
        message: String,
    },
}

impl AirtableError {
    /// Returns true if the backoff loop may retry this error.
    ///
    /// Retryable errors are HTTP 429, HTTP 5xx, and transient transport
    /// failures (timeout, refused, reset, DNS). Gate rejections are never
    /// retried by the resilience layer.
    pub fn is_retryable(&self) -> bool {
        match self {
            AirtableError::Api { status, .. } => *status == 429 || (500..=599).contains(status),
            AirtableError::Network(err) => err.is_transient(),
            _ => false,
        }
    }

    /// Returns the server-provided retry hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            AirtableError::Api { retry_after, .. } => *retry_after,
            AirtableError::RateLimited {
                retry_after_secs, ..
            } => Some(Duration::from_secs(*retry_after_secs)),
            AirtableError::CircuitOpen { retry_in, .. } => Some(*retry_in),
            _ => None,
        }
    }

    /// True for the fail-fast circuit breaker rejection
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, AirtableError::CircuitOpen { .. })
    }

    /// True if the request queue rejected or dropped the request
    pub fn is_queue_rejection(&self) -> bool {
        matches!(
            self,
            AirtableError::QueueFull { .. }
                | AirtableError::QueueTimeout { .. }
                | AirtableError::QueueCleared
        )
    }

    /// True if the error was produced by a local gate rather than downstream
    pub fn is_gate_rejection(&self) -> bool {
        self.is_circuit_open()
            || self.is_queue_rejection()
            || matches!(self, AirtableError::RateLimited { .. })
    }

    /// HTTP status code, if the error came from a response
    pub fn status_code(&self) -> Option<u16> {
        match self {
            AirtableError::Api { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Stable error code used in logs and metric labels
    pub fn error_code(&self) -> &'static str {
        match self {
            AirtableError::CircuitOpen { .. } => "AIRTABLE_CIRCUIT_OPEN",
            AirtableError::RateLimited { .. } => "AIRTABLE_RATE_LIMITED",
            AirtableError::QueueFull { .. } => "AIRTABLE_QUEUE_FULL",
            AirtableError::QueueTimeout { .. } => "AIRTABLE_QUEUE_TIMEOUT",
            AirtableError::QueueCleared => "AIRTABLE_QUEUE_CLEARED",
            AirtableError::Api { .. } => "AIRTABLE_API",
            AirtableError::Network(_) => "AIRTABLE_NETWORK",
            AirtableError::Configuration { .. } => "AIRTABLE_CONFIG",
            AirtableError::Serialization { .. } => "AIRTABLE_SERIALIZATION",
            AirtableError::Internal { .. } => "AIRTABLE_INTERNAL",
        }
    }
}

impl From<reqwest::Error> for AirtableError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            return AirtableError::Serialization {
                message: format!("Failed to decode response: {}", err),
            };
        }
        if let Some(status) = err.status() {
            return AirtableError::Api {
                status: status.as_u16(),
                message: err.to_string(),
                retry_after: None,
            };
        }
        AirtableError::Network(NetworkError::from_reqwest(&err))
    }
}

impl From<serde_json::Error> for AirtableError {
    fn from(err: serde_json::Error) -> Self {
        AirtableError::Serialization {
            message: format!("JSON serialization/deserialization error: {}", err),
        }
    }
}

impl From<url::ParseError> for AirtableError {
    fn from(err: url::ParseError) -> Self {
        AirtableError::Configuration {
            message: format!("Invalid URL: {}", err),
        }
    }
}
