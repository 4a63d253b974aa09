//! Sliding-window rate limiting per key.
//!
//! Airtable enforces its request budget per base, so each base ID gets its
//! own window. Callers with no natural key use [`GLOBAL_KEY`].

use super::clock::{system_clock, Clock};
use crate::errors::{AirtableError, AirtableResult};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Key shared by callers that are not partitioned by base
pub const GLOBAL_KEY: &str = "__global__";

/// Configuration for rate limiting
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Length of the sliding window
    pub window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_requests: 5,
            window: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set requests per window
    pub fn max_requests(mut self, n: u32) -> Self {
        self.max_requests = n;
        self
    }

    /// Set the window length
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

/// Current budget consumption for one key
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitUsage {
    /// Rate limiter key
    pub key: String,
    /// Requests currently inside the window
    pub used: u32,
    /// Configured limit
    pub limit: u32,
    /// Requests that would still be admitted now
    pub remaining: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Milliseconds until the oldest request leaves the window
    pub reset_in_ms: u64,
}

/// Snapshot across all keys
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitStats {
    /// Requests admitted since creation
    pub total_allowed: u64,
    /// Requests rejected since creation
    pub total_rejected: u64,
    /// Per-key usage, sorted by key
    pub keys: Vec<RateLimitUsage>,
}

#[derive(Debug, Default)]
struct LimiterState {
    windows: HashMap<String, VecDeque<Instant>>,
    total_allowed: u64,
    total_rejected: u64,
}

/// Sliding-window rate limiter
pub struct RateLimiter {
    default_config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    overrides: RwLock<HashMap<String, RateLimitConfig>>,
    state: Mutex<LimiterState>,
}

impl RateLimiter {
    /// Create a rate limiter with the given default configuration
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a rate limiter reading time from `clock`
    pub fn with_clock(config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            default_config: config,
            clock,
            overrides: RwLock::new(HashMap::new()),
            state: Mutex::new(LimiterState::default()),
        }
    }

    /// Override the limit for a single key
    pub fn configure(&self, key: &str, config: RateLimitConfig) {
        self.overrides.write().insert(key.to_string(), config);
    }

    /// Admit a request for `key` or fail with `RateLimited`
    pub fn check(&self, key: &str) -> AirtableResult<()> {
        match self.try_admit(key) {
            Ok(()) => Ok(()),
            Err(wait) => {
                let retry_after_secs = ceil_secs(wait);
                debug!(key, retry_after_secs, "Rate limit exceeded");
                Err(AirtableError::RateLimited {
                    key: key.to_string(),
                    retry_after_secs,
                })
            }
        }
    }

    /// Wait until a slot is free for `key`, then admit the request
    pub async fn acquire(&self, key: &str) {
        loop {
            match self.try_admit(key) {
                Ok(()) => return,
                Err(wait) => {
                    debug!(key, wait_ms = wait.as_millis() as u64, "Waiting for rate limit slot");
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Forget the window for `key`
    pub fn reset(&self, key: &str) {
        self.state.lock().windows.remove(key);
    }

    /// Forget every window
    pub fn reset_all(&self) {
        self.state.lock().windows.clear();
    }

    /// Current usage of `key`
    pub fn usage(&self, key: &str) -> RateLimitUsage {
        let config = self.config_for(key);
        let now = self.clock.now();
        let mut state = self.state.lock();
        match state.windows.get_mut(key) {
            Some(window) => usage_of(key, window, &config, now),
            None => usage_of(key, &mut VecDeque::new(), &config, now),
        }
    }

    /// Snapshot of all keys
    pub fn stats(&self) -> RateLimitStats {
        let overrides = self.overrides.read().clone();
        let now = self.clock.now();
        let mut state = self.state.lock();

        let mut keys: Vec<RateLimitUsage> = state
            .windows
            .iter_mut()
            .map(|(key, window)| {
                let config = overrides.get(key).unwrap_or(&self.default_config);
                usage_of(key, window, config, now)
            })
            .collect();
        keys.sort_by(|a, b| a.key.cmp(&b.key));

        RateLimitStats {
            total_allowed: state.total_allowed,
            total_rejected: state.total_rejected,
            keys,
        }
    }

    /// Admit and record `now`, or return how long until a slot frees
    fn try_admit(&self, key: &str) -> Result<(), Duration> {
        let config = self.config_for(key);
        let now = self.clock.now();
        let mut state = self.state.lock();

        let window = state.windows.entry(key.to_string()).or_default();
        prune(window, config.window, now);

        if window.len() < config.max_requests as usize {
            window.push_back(now);
            state.total_allowed += 1;
            return Ok(());
        }

        let wait = window
            .front()
            .map(|oldest| (*oldest + config.window).saturating_duration_since(now))
            .unwrap_or(config.window);
        state.total_rejected += 1;
        Err(wait)
    }

    fn config_for(&self, key: &str) -> RateLimitConfig {
        self.overrides
            .read()
            .get(key)
            .cloned()
            .unwrap_or_else(|| self.default_config.clone())
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("default_config", &self.default_config)
            .finish()
    }
}

fn prune(window: &mut VecDeque<Instant>, length: Duration, now: Instant) {
    while let Some(&oldest) = window.front() {
        if oldest + length <= now {
            window.pop_front();
        } else {
            break;
        }
    }
}

fn usage_of(
    key: &str,
    window: &mut VecDeque<Instant>,
    config: &RateLimitConfig,
    now: Instant,
) -> RateLimitUsage {
    prune(window, config.window, now);
    let used = window.len() as u32;
    let reset_in = window
        .front()
        .map(|oldest| (*oldest + config.window).saturating_duration_since(now))
        .unwrap_or_default();

    RateLimitUsage {
        key: key.to_string(),
        used,
        limit: config.max_requests,
        remaining: config.max_requests.saturating_sub(used),
        window_ms: config.window.as_millis() as u64,
        reset_in_ms: reset_in.as_millis() as u64,
    }
}

/// Whole seconds, rounded up, never below one
fn ceil_secs(wait: Duration) -> u64 {
    let millis = wait.as_millis() as u64;
    ((millis + 999) / 1000).max(1)
}
