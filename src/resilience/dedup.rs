//! In-flight request de-duplication (singleflight).
//!
//! Concurrent identical reads share one execution. The table only tracks
//! requests that are still in flight; a settled request is removed at once,
//! so nothing here behaves like a response cache.

use super::clock::{system_clock, Clock};
use crate::errors::{AirtableError, AirtableResult};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

type SharedValue = Arc<dyn Any + Send + Sync>;
type SharedCall = Shared<BoxFuture<'static, Result<SharedValue, AirtableError>>>;

/// Configuration for the deduplicator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupConfig {
    /// Age after which a pending entry is purged even if unsettled
    pub ttl: Duration,
    /// Maximum entries in the table; the oldest is evicted beyond this
    pub max_pending: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            max_pending: 1000,
        }
    }
}

impl DedupConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the pending entry TTL
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Set the table capacity
    pub fn max_pending(mut self, n: usize) -> Self {
        self.max_pending = n;
        self
    }
}

/// Read-only deduplicator snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    /// Entries currently in flight
    pub pending: usize,
    /// Calls that went through the deduplicator
    pub total_requests: u64,
    /// Calls that joined an existing execution
    pub deduplicated: u64,
    /// Entries dropped to respect `max_pending`
    pub evicted: u64,
    /// Entries purged after `ttl`
    pub expired: u64,
}

struct PendingCall {
    slot: u64,
    created_at: Instant,
    subscribers: usize,
    call: SharedCall,
}

#[derive(Default)]
struct DedupState {
    pending: HashMap<String, PendingCall>,
    next_slot: u64,
    total_requests: u64,
    deduplicated: u64,
    evicted: u64,
    expired: u64,
}

/// Entries taken out of the table.
///
/// Dropping the last handle to a shared call drops the call itself, which
/// releases queue and breaker state. These must be dropped after the table
/// lock is released.
type Retired = Vec<PendingCall>;

impl DedupState {
    fn purge_expired(&mut self, now: Instant, ttl: Duration, retired: &mut Retired) -> usize {
        let expired: Vec<String> = self
            .pending
            .iter()
            .filter(|(_, call)| now.saturating_duration_since(call.created_at) >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        for key in &expired {
            retired.extend(self.pending.remove(key));
        }
        self.expired += expired.len() as u64;
        expired.len()
    }

    fn evict_oldest(&mut self, retired: &mut Retired) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, call)| (call.created_at, call.slot))
            .map(|(key, _)| key.clone());

        if let Some(key) = oldest {
            retired.extend(self.pending.remove(&key));
            self.evicted += 1;
            debug!(key = %key, "Evicted oldest pending request");
        }
    }
}

/// Table of in-flight requests keyed by request hash
pub struct RequestDeduplicator {
    config: DedupConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<DedupState>>,
}

impl RequestDeduplicator {
    /// Create a deduplicator using the system clock
    pub fn new(config: DedupConfig) -> Self {
        Self::with_clock(config, system_clock())
    }

    /// Create a deduplicator reading time from `clock`
    pub fn with_clock(config: DedupConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(DedupState::default())),
        }
    }

    /// Run `f`, or join an identical execution already in flight.
    ///
    /// Every subscriber receives a clone of the one result or error. `f` is
    /// only invoked when no live entry exists for `key`.
    pub async fn with_deduplication<F, Fut, T>(&self, key: &str, f: F) -> AirtableResult<T>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AirtableResult<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let call = self.subscribe(key, f);
        let value = call.await?;
        value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| AirtableError::Internal {
                message: format!("Deduplicated result for {} has an unexpected type", key),
            })
    }

    fn subscribe<F, Fut, T>(&self, key: &str, f: F) -> SharedCall
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = AirtableResult<T>> + Send + 'static,
        T: Clone + Send + Sync + 'static,
    {
        let now = self.clock.now();
        // Declared before the guard so it drops after the unlock
        let mut retired = Retired::new();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        state.purge_expired(now, self.config.ttl, &mut retired);
        state.total_requests += 1;

        if let Some(existing) = state.pending.get_mut(key) {
            existing.subscribers += 1;
            state.deduplicated += 1;
            debug!(
                key = %key,
                subscribers = existing.subscribers,
                "Joined in-flight request"
            );
            return existing.call.clone();
        }

        if self.config.max_pending > 0 && state.pending.len() >= self.config.max_pending {
            state.evict_oldest(&mut retired);
        }

        let slot = state.next_slot;
        state.next_slot += 1;

        let table = Arc::clone(&self.state);
        let owned_key = key.to_string();
        let call = async move {
            let outcome = f().await.map(|value| Arc::new(value) as SharedValue);

            let settled = {
                let mut state = table.lock();
                if state
                    .pending
                    .get(&owned_key)
                    .map_or(false, |pending| pending.slot == slot)
                {
                    state.pending.remove(&owned_key)
                } else {
                    None
                }
            };
            drop(settled);
            outcome
        }
        .boxed()
        .shared();

        state.pending.insert(
            key.to_string(),
            PendingCall {
                slot,
                created_at: now,
                subscribers: 1,
                call: call.clone(),
            },
        );
        call
    }

    /// Purge entries older than the TTL; returns how many were removed
    pub fn cleanup_expired(&self) -> usize {
        let now = self.clock.now();
        let mut retired = Retired::new();
        let purged = self.state.lock().purge_expired(now, self.config.ttl, &mut retired);
        drop(retired);
        purged
    }

    /// Subscribers currently waiting on `key`, if it is in flight
    pub fn subscribers(&self, key: &str) -> Option<usize> {
        self.state.lock().pending.get(key).map(|call| call.subscribers)
    }

    /// Drop every pending entry; in-flight subscribers still get their result
    pub fn clear(&self) {
        let retired = std::mem::take(&mut self.state.lock().pending);
        drop(retired);
    }

    /// Snapshot of the table
    pub fn stats(&self) -> DedupStats {
        let state = self.state.lock();
        DedupStats {
            pending: state.pending.len(),
            total_requests: state.total_requests,
            deduplicated: state.deduplicated,
            evicted: state.evicted,
            expired: state.expired,
        }
    }
}

impl Default for RequestDeduplicator {
    fn default() -> Self {
        Self::new(DedupConfig::default())
    }
}

impl std::fmt::Debug for RequestDeduplicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestDeduplicator")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish()
    }
}
