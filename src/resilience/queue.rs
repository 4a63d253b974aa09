//! Bounded-concurrency FIFO request queue.
//!
//! At most `max_concurrency` tasks run at once. Further callers wait in a
//! FIFO bounded by `max_queue_size`, each for at most `queue_timeout`.
//! Admission hands the waiter a [`Slot`] over a oneshot channel; the slot
//! gives the capacity back when dropped, so a caller whose future is dropped
//! never leaks a running slot.

use crate::errors::{AirtableError, AirtableResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, warn};

const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Configuration for the request queue
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Tasks allowed to run concurrently
    pub max_concurrency: usize,
    /// Waiting entries allowed; 0 means unbounded
    pub max_queue_size: usize,
    /// How long an entry may wait before it is rejected
    pub queue_timeout: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 5,
            max_queue_size: 100,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

impl QueueConfig {
    /// Create a new configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Set maximum concurrency
    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.max_concurrency = n;
        self
    }

    /// Set maximum queue size (0 = unbounded)
    pub fn max_queue_size(mut self, n: usize) -> Self {
        self.max_queue_size = n;
        self
    }

    /// Set queue timeout
    pub fn queue_timeout(mut self, timeout: Duration) -> Self {
        self.queue_timeout = timeout;
        self
    }
}

/// Read-only queue snapshot
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueueStats {
    /// Entries waiting for a slot
    pub queued: usize,
    /// Tasks currently running
    pub running: usize,
    /// Current concurrency limit
    pub max_concurrency: usize,
    /// Queue bound (0 = unbounded)
    pub max_queue_size: usize,
    /// Tasks that finished successfully
    pub completed: u64,
    /// Tasks that finished with an error
    pub failed: u64,
    /// Entries rejected because the queue was full or cleared
    pub rejected: u64,
    /// Entries that timed out while waiting
    pub timed_out: u64,
    /// `queued / max_queue_size`, or 0 for an unbounded queue
    pub utilization: f64,
}

type Admission = AirtableResult<Slot>;

struct Waiter {
    id: u64,
    tx: oneshot::Sender<Admission>,
}

struct QueueState {
    max_concurrency: usize,
    running: usize,
    waiters: VecDeque<Waiter>,
    next_id: u64,
    completed: u64,
    failed: u64,
    rejected: u64,
    timed_out: u64,
}

struct QueueInner {
    max_queue_size: usize,
    queue_timeout: Duration,
    state: Mutex<QueueState>,
}

impl QueueInner {
    /// Hand free capacity to waiters in FIFO order. Called with the lock held.
    fn dispatch(self: &Arc<Self>, state: &mut QueueState) {
        while state.running < state.max_concurrency {
            let Some(waiter) = state.waiters.pop_front() else {
                break;
            };

            state.running += 1;
            let slot = Slot::new(self.clone());
            if let Err(Ok(mut slot)) = waiter.tx.send(Ok(slot)) {
                // Receiver is gone; the slot never left this function.
                slot.armed = false;
                state.running -= 1;
                debug!(waiter_id = waiter.id, "Skipping abandoned queue entry");
            }
        }
    }

    fn finish(self: &Arc<Self>, outcome: Option<bool>) {
        let mut state = self.state.lock();
        state.running = state.running.saturating_sub(1);
        match outcome {
            Some(true) => state.completed += 1,
            Some(false) => state.failed += 1,
            None => {}
        }
        self.dispatch(&mut state);
    }
}

/// A running slot; capacity is returned when it is dropped
pub struct Slot {
    inner: Arc<QueueInner>,
    armed: bool,
    outcome: Option<bool>,
}

impl Slot {
    fn new(inner: Arc<QueueInner>) -> Self {
        Self {
            inner,
            armed: true,
            outcome: None,
        }
    }

    /// Record the task outcome for queue statistics
    pub fn record(&mut self, success: bool) {
        self.outcome = Some(success);
    }
}

impl Drop for Slot {
    fn drop(&mut self) {
        if self.armed {
            self.inner.finish(self.outcome);
        }
    }
}

impl std::fmt::Debug for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Slot").field("armed", &self.armed).finish()
    }
}

/// Removes a waiter from the queue if the caller stops waiting
struct PendingEntry {
    inner: Arc<QueueInner>,
    id: u64,
}

impl PendingEntry {
    /// Remove the entry; false if the dispatcher already took it
    fn cancel(&self) -> bool {
        let mut state = self.inner.state.lock();
        match state.waiters.iter().position(|w| w.id == self.id) {
            Some(position) => {
                state.waiters.remove(position);
                true
            }
            None => false,
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Bounded-concurrency FIFO scheduler
#[derive(Clone)]
pub struct RequestQueue {
    inner: Arc<QueueInner>,
}

impl RequestQueue {
    /// Create a queue from configuration
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                max_queue_size: config.max_queue_size,
                queue_timeout: config.queue_timeout,
                state: Mutex::new(QueueState {
                    max_concurrency: config.max_concurrency.max(1),
                    running: 0,
                    waiters: VecDeque::new(),
                    next_id: 0,
                    completed: 0,
                    failed: 0,
                    rejected: 0,
                    timed_out: 0,
                }),
            }),
        }
    }

    /// Run `f` once a slot is available.
    ///
    /// Fails with `QueueFull` when the queue is at capacity, `QueueTimeout`
    /// when the wait exceeds the configured timeout, and `QueueCleared` when
    /// [`clear`](Self::clear) is called while waiting. `f` is not invoked in
    /// any of those cases.
    pub async fn execute<F, Fut, T>(&self, f: F) -> AirtableResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = AirtableResult<T>>,
    {
        let mut slot = self.admit().await?;
        let result = f().await;
        slot.record(result.is_ok());
        result
    }

    /// Wait for a running slot
    pub async fn admit(&self) -> AirtableResult<Slot> {
        let (entry, mut rx) = {
            let mut state = self.inner.state.lock();

            if state.running < state.max_concurrency && state.waiters.is_empty() {
                state.running += 1;
                return Ok(Slot::new(self.inner.clone()));
            }

            let max_queue_size = self.inner.max_queue_size;
            if max_queue_size > 0 && state.waiters.len() >= max_queue_size {
                state.rejected += 1;
                warn!(
                    queue_size = state.waiters.len(),
                    max_queue_size, "Request queue full"
                );
                return Err(AirtableError::QueueFull {
                    queue_size: state.waiters.len(),
                    max_queue_size,
                });
            }

            let id = state.next_id;
            state.next_id += 1;
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(Waiter { id, tx });
            debug!(
                waiter_id = id,
                queued = state.waiters.len(),
                "Request queued"
            );

            (
                PendingEntry {
                    inner: self.inner.clone(),
                    id,
                },
                rx,
            )
        };

        let enqueued_at = Instant::now();
        let timeout = self.inner.queue_timeout;

        match tokio::time::timeout(timeout, &mut rx).await {
            Ok(Ok(admission)) => admission,
            Ok(Err(_)) => Err(AirtableError::Internal {
                message: "Queue entry dropped without a decision".to_string(),
            }),
            Err(_) => {
                if entry.cancel() {
                    self.inner.state.lock().timed_out += 1;
                    let wait_time = enqueued_at.elapsed();
                    warn!(
                        wait_ms = wait_time.as_millis() as u64,
                        timeout_ms = timeout.as_millis() as u64,
                        "Request timed out in queue"
                    );
                    return Err(AirtableError::QueueTimeout { wait_time, timeout });
                }

                // Admitted concurrently with the timeout: admission wins.
                match rx.try_recv() {
                    Ok(admission) => admission,
                    Err(_) => Err(AirtableError::QueueTimeout {
                        wait_time: enqueued_at.elapsed(),
                        timeout,
                    }),
                }
            }
        }
    }

    /// Wait until nothing is queued or running
    pub async fn drain(&self) {
        loop {
            {
                let state = self.inner.state.lock();
                if state.running == 0 && state.waiters.is_empty() {
                    return;
                }
            }
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    }

    /// Change the concurrency limit and backfill freed capacity
    pub fn set_concurrency(&self, max_concurrency: usize) {
        let mut state = self.inner.state.lock();
        state.max_concurrency = max_concurrency.max(1);
        debug!(max_concurrency = state.max_concurrency, "Queue concurrency changed");
        self.inner.dispatch(&mut state);
    }

    /// Reject every waiting entry with `QueueCleared`; running tasks continue.
    ///
    /// Returns the number of entries rejected.
    pub fn clear(&self) -> usize {
        let waiters: Vec<Waiter> = {
            let mut state = self.inner.state.lock();
            let waiters: Vec<Waiter> = state.waiters.drain(..).collect();
            state.rejected += waiters.len() as u64;
            waiters
        };

        let count = waiters.len();
        for waiter in waiters {
            let _ = waiter.tx.send(Err(AirtableError::QueueCleared));
        }
        if count > 0 {
            warn!(cleared = count, "Request queue cleared");
        }
        count
    }

    /// Snapshot of the queue
    pub fn stats(&self) -> QueueStats {
        let state = self.inner.state.lock();
        let max_queue_size = self.inner.max_queue_size;
        let utilization = if max_queue_size == 0 {
            0.0
        } else {
            state.waiters.len() as f64 / max_queue_size as f64
        };

        QueueStats {
            queued: state.waiters.len(),
            running: state.running,
            max_concurrency: state.max_concurrency,
            max_queue_size,
            completed: state.completed,
            failed: state.failed,
            rejected: state.rejected,
            timed_out: state.timed_out,
            utilization,
        }
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Notify;

    fn queue(max_concurrency: usize, max_queue_size: usize) -> RequestQueue {
        RequestQueue::new(
            QueueConfig::new()
                .max_concurrency(max_concurrency)
                .max_queue_size(max_queue_size),
        )
    }

    #[tokio::test]
    async fn test_runs_immediately_when_idle() {
        let queue = queue(2, 10);
        let result = queue.execute(|| async { Ok::<_, AirtableError>(7) }).await;

        assert_eq!(result.unwrap(), 7);
        let stats = queue.stats();
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.running, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let queue = queue(3, 0);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let queue = queue.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .execute(|| async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, AirtableError>(())
                    })
                    .await
            }));
        }

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(queue.stats().completed, 12);
    }

    #[tokio::test]
    async fn test_queue_full_rejects_immediately() {
        let queue = queue(1, 1);
        let release = Arc::new(Notify::new());

        let blocker = {
            let queue = queue.clone();
            let release = release.clone();
            tokio::spawn(async move {
                queue
                    .execute(|| async move {
                        release.notified().await;
                        Ok::<_, AirtableError>(())
                    })
                    .await
            })
        };
        tokio::task::yield_now().await;
        while queue.stats().running == 0 {
            tokio::task::yield_now().await;
        }

        let waiting = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.execute(|| async { Ok::<_, AirtableError>(()) }).await })
        };
        while queue.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        let overflow = queue.execute(|| async { Ok::<_, AirtableError>(()) }).await;
        assert!(matches!(
            overflow,
            Err(AirtableError::QueueFull {
                queue_size: 1,
                max_queue_size: 1
            })
        ));

        release.notify_one();
        blocker.await.unwrap().unwrap();
        waiting.await.unwrap().unwrap();
        assert_eq!(queue.stats().rejected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_timeout_removes_entry() {
        let queue = RequestQueue::new(
            QueueConfig::new()
                .max_concurrency(1)
                .queue_timeout(Duration::from_millis(100)),
        );
        let slot = queue.admit().await.unwrap();

        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = invoked.clone();
        let result = queue
            .execute(|| async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AirtableError>(())
            })
            .await;

        match result {
            Err(AirtableError::QueueTimeout { wait_time, timeout }) => {
                assert_eq!(timeout, Duration::from_millis(100));
                assert!(wait_time >= timeout);
            }
            other => panic!("expected QueueTimeout, got {:?}", other),
        }
        assert_eq!(invoked.load(Ordering::SeqCst), 0);

        let stats = queue.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.timed_out, 1);

        drop(slot);
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn test_fifo_admission() {
        let queue = queue(1, 0);
        let order = Arc::new(Mutex::new(Vec::new()));
        let slot = queue.admit().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let waiter = queue.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                waiter
                    .execute(|| async move {
                        order.lock().push(i);
                        Ok::<_, AirtableError>(())
                    })
                    .await
            }));
            while queue.stats().queued < i + 1 {
                tokio::task::yield_now().await;
            }
        }

        drop(slot);
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(*order.lock(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_clear_rejects_waiters_only() {
        let queue = queue(1, 0);
        let slot = queue.admit().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.execute(|| async { Ok::<_, AirtableError>(()) }).await })
        };
        while queue.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        assert_eq!(queue.clear(), 1);
        assert!(matches!(
            waiter.await.unwrap(),
            Err(AirtableError::QueueCleared)
        ));
        assert_eq!(queue.stats().running, 1);

        drop(slot);
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn test_set_concurrency_backfills() {
        let queue = queue(1, 0);
        let first = queue.admit().await.unwrap();

        let second = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.admit().await })
        };
        while queue.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        queue.set_concurrency(2);
        let second = second.await.unwrap().unwrap();
        let stats = queue.stats();
        assert_eq!(stats.running, 2);
        assert_eq!(stats.queued, 0);

        drop(first);
        drop(second);
        queue.drain().await;
        assert_eq!(queue.stats().running, 0);
    }

    #[tokio::test]
    async fn test_failed_tasks_are_counted() {
        let queue = queue(1, 0);
        let result = queue
            .execute(|| async {
                Err::<(), _>(AirtableError::Internal {
                    message: "boom".to_string(),
                })
            })
            .await;

        assert!(result.is_err());
        let stats = queue.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 0);
    }

    #[tokio::test]
    async fn test_dropped_waiter_releases_entry() {
        let queue = queue(1, 0);
        let slot = queue.admit().await.unwrap();

        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.admit().await.map(|_| ()) })
        };
        while queue.stats().queued == 0 {
            tokio::task::yield_now().await;
        }

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(queue.stats().queued, 0);

        drop(slot);
        assert_eq!(queue.stats().running, 0);
    }
}
