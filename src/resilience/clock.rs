//! Time sources for the resilience layer.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Source of monotonic and wall-clock time.
///
/// Components read time only through this trait so tests can move time
/// without sleeping.
pub trait Clock: Send + Sync {
    /// Monotonic reading used for windows and timeouts
    fn now(&self) -> Instant;

    /// Wall-clock reading used for user-facing timestamps
    fn utc_now(&self) -> DateTime<Utc>;

    /// Map a monotonic instant from this clock onto wall-clock time
    fn to_utc(&self, instant: Instant) -> DateTime<Utc> {
        let now = self.now();
        let utc_now = self.utc_now();
        if instant >= now {
            utc_now + chrono_duration(instant - now)
        } else {
            utc_now - chrono_duration(now - instant)
        }
    }
}

fn chrono_duration(duration: Duration) -> chrono::Duration {
    chrono::Duration::from_std(duration).unwrap_or_else(|_| chrono::Duration::max_value())
}

/// Clock backed by the tokio timer, so paused test time applies to it.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        tokio::time::Instant::now().into_std()
    }

    fn utc_now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Shared handle to the default clock
pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// Manually advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

#[derive(Debug)]
struct ManualClockState {
    instant: Instant,
    utc: DateTime<Utc>,
}

impl ManualClock {
    /// Create a clock frozen at the current time
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(ManualClockState {
                instant: Instant::now(),
                utc: Utc::now(),
            })),
        }
    }

    /// Move both readings forward
    pub fn advance(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.instant += duration;
        state.utc = state.utc + chrono_duration(duration);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.inner.lock().instant
    }

    fn utc_now(&self) -> DateTime<Utc> {
        self.inner.lock().utc
    }
}
