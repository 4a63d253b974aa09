//! Configuration management for the Airtable client.
//!
//! Supports configuration via:
//! - Explicit values
//! - Environment variables
//! - Builder pattern
//!
//! Unlike most settings loaders, an environment variable that is present but
//! unparseable is an error rather than being ignored.

use crate::errors::{AirtableError, AirtableResult};
use crate::resilience::{
    CircuitBreakerConfig, DedupConfig, QueueConfig, RateLimitConfig, ResilienceConfig, RetryConfig,
};
use secrecy::{ExposeSecret, SecretString};
use std::str::FromStr;
use std::time::Duration;
use url::Url;

/// Configuration for the Airtable client
#[derive(Clone)]
pub struct AirtableConfig {
    /// Personal access token or API key
    pub(crate) api_key: SecretString,
    /// Base URL for API requests
    pub base_url: Url,
    /// Per-request HTTP timeout
    pub timeout: Duration,
    /// Resilience policies applied to every outbound call
    pub resilience: ResilienceConfig,
}

impl std::fmt::Debug for AirtableConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirtableConfig")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url.as_str())
            .field("timeout", &self.timeout)
            .field("resilience", &self.resilience)
            .finish()
    }
}

impl AirtableConfig {
    /// Create a new configuration builder
    pub fn builder() -> AirtableConfigBuilder {
        AirtableConfigBuilder::new()
    }

    /// Create configuration from environment variables
    pub fn from_env() -> AirtableResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Create configuration from an arbitrary variable source.
    ///
    /// `lookup` returns the raw value of a variable, or `None` when unset.
    pub fn from_lookup<F>(lookup: F) -> AirtableResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = AirtableConfigBuilder::new();

        if let Some(key) = lookup("AIRTABLE_API_KEY") {
            builder = builder.api_key(key);
        }
        if let Some(url) = lookup("AIRTABLE_BASE_URL") {
            builder = builder.base_url(&url)?;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "AIRTABLE_TIMEOUT_SECS")? {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let mut resilience = ResilienceConfig::default();

        if let Some(n) = parse_var(&lookup, "AIRTABLE_MAX_RETRIES")? {
            resilience.retry = resilience.retry.max_retries(n);
        }
        if let Some(n) = parse_var(&lookup, "AIRTABLE_RATE_LIMIT_REQUESTS")? {
            resilience.rate_limit = resilience.rate_limit.max_requests(n);
        }
        if let Some(ms) = parse_var(&lookup, "AIRTABLE_RATE_LIMIT_WINDOW_MS")? {
            resilience.rate_limit = resilience.rate_limit.window(Duration::from_millis(ms));
        }
        if let Some(n) = parse_var(&lookup, "AIRTABLE_MAX_CONCURRENCY")? {
            resilience.queue = resilience.queue.max_concurrency(n);
        }
        if let Some(n) = parse_var(&lookup, "AIRTABLE_MAX_QUEUE_SIZE")? {
            resilience.queue = resilience.queue.max_queue_size(n);
        }
        if let Some(ms) = parse_var(&lookup, "AIRTABLE_QUEUE_TIMEOUT_MS")? {
            resilience.queue = resilience.queue.queue_timeout(Duration::from_millis(ms));
        }
        if let Some(n) = parse_var(&lookup, "AIRTABLE_CIRCUIT_FAILURE_THRESHOLD")? {
            resilience.circuit_breaker = resilience.circuit_breaker.failure_threshold(n);
        }
        if let Some(ms) = parse_var(&lookup, "AIRTABLE_CIRCUIT_RESET_TIMEOUT_MS")? {
            resilience.circuit_breaker = resilience
                .circuit_breaker
                .reset_timeout(Duration::from_millis(ms));
        }

        builder.resilience(resilience).build()
    }

    /// The API key, for the transport's authorization header
    pub(crate) fn api_key(&self) -> &SecretString {
        &self.api_key
    }

    /// Build the full URL for a path under `base_id`
    pub fn build_url(&self, base_id: &str, path: &str) -> AirtableResult<Url> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        let url = if path.is_empty() {
            format!("{}/{}", base, base_id)
        } else {
            format!("{}/{}/{}", base, base_id, path)
        };
        Ok(Url::parse(&url)?)
    }

    /// Validate the configuration
    pub fn validate(&self) -> AirtableResult<()> {
        if self.api_key.expose_secret().trim().is_empty() {
            return Err(config_error("API key must not be empty"));
        }
        if self.timeout.is_zero() {
            return Err(config_error("Timeout must be greater than zero"));
        }

        let resilience = &self.resilience;
        if resilience.rate_limit.max_requests == 0 {
            return Err(config_error("Rate limit must allow at least one request"));
        }
        if resilience.rate_limit.window.is_zero() {
            return Err(config_error("Rate limit window must be greater than zero"));
        }
        if resilience.queue.max_concurrency == 0 {
            return Err(config_error("Queue concurrency must be at least one"));
        }
        if resilience.circuit_breaker.failure_threshold == 0 {
            return Err(config_error("Circuit failure threshold must be at least one"));
        }
        if resilience.circuit_breaker.success_threshold == 0 {
            return Err(config_error("Circuit success threshold must be at least one"));
        }

        Ok(())
    }
}

/// Builder for AirtableConfig
#[derive(Default)]
pub struct AirtableConfigBuilder {
    api_key: Option<SecretString>,
    base_url: Option<Url>,
    timeout: Option<Duration>,
    resilience: ResilienceConfig,
}

impl AirtableConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the API key
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(SecretString::new(key.into()));
        self
    }

    /// Set the base URL
    pub fn base_url(mut self, url: &str) -> AirtableResult<Self> {
        let parsed = Url::parse(url).map_err(|e| AirtableError::Configuration {
            message: format!("Invalid base URL: {}", e),
        })?;
        self.base_url = Some(parsed);
        Ok(self)
    }

    /// Set the request timeout
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Replace every resilience policy
    pub fn resilience(mut self, config: ResilienceConfig) -> Self {
        self.resilience = config;
        self
    }

    /// Set the retry policy
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.resilience.retry = config;
        self
    }

    /// Set the circuit breaker policy
    pub fn circuit_breaker(mut self, config: CircuitBreakerConfig) -> Self {
        self.resilience.circuit_breaker = config;
        self
    }

    /// Set the rate limit policy
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.resilience.rate_limit = config;
        self
    }

    /// Set the queue policy
    pub fn queue(mut self, config: QueueConfig) -> Self {
        self.resilience.queue = config;
        self
    }

    /// Set the de-duplication policy
    pub fn dedup(mut self, config: DedupConfig) -> Self {
        self.resilience.dedup = config;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> AirtableResult<AirtableConfig> {
        let api_key = self
            .api_key
            .ok_or_else(|| config_error("API key is required (set AIRTABLE_API_KEY)"))?;
        let base_url = match self.base_url {
            Some(url) => url,
            None => Url::parse(crate::DEFAULT_BASE_URL)?,
        };

        let config = AirtableConfig {
            api_key,
            base_url,
            timeout: self
                .timeout
                .unwrap_or(Duration::from_secs(crate::DEFAULT_TIMEOUT_SECS)),
            resilience: self.resilience,
        };
        config.validate()?;
        Ok(config)
    }
}

fn config_error(message: &str) -> AirtableError {
    AirtableError::Configuration {
        message: message.to_string(),
    }
}

fn parse_var<T, F>(lookup: &F, name: &str) -> AirtableResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(name) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AirtableError::Configuration {
                message: format!("Invalid value {:?} for {}: {}", raw, name, e),
            }),
    }
}
