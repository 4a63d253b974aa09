//! Exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

/// Backoff policy used between retry attempts.
///
/// Pure: the only input besides the configuration is the attempt number and
/// the optional server hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Base delay, also the upper bound of the random jitter
    pub base_delay: Duration,
    /// Cap applied to the computed (not the server-provided) delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl BackoffPolicy {
    /// Create a policy from a base and maximum delay
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (zero-based).
    ///
    /// A `Retry-After` style hint is honored verbatim. Otherwise the delay is
    /// `min(max_delay, base * 2^attempt + uniform(0, base))`.
    pub fn compute_delay(&self, attempt: u32, retry_after_hint: Option<Duration>) -> Duration {
        if let Some(hint) = retry_after_hint {
            return hint;
        }

        let base_ms = self.base_delay.as_millis().min(u64::MAX as u128) as u64;
        let jitter_ms = if base_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=base_ms)
        };

        self.exponential(attempt, base_ms, jitter_ms)
    }

    fn exponential(&self, attempt: u32, base_ms: u64, jitter_ms: u64) -> Duration {
        let factor = 1u64.checked_shl(attempt.min(63)).unwrap_or(u64::MAX);
        let delay_ms = base_ms.saturating_mul(factor).saturating_add(jitter_ms);
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BackoffPolicy {
        BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(10))
    }

    #[test]
    fn test_hint_is_honored_verbatim() {
        let delay = policy().compute_delay(0, Some(Duration::from_secs(30)));
        assert_eq!(delay, Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_growth_without_jitter() {
        let policy = policy();
        assert_eq!(policy.exponential(0, 100, 0), Duration::from_millis(100));
        assert_eq!(policy.exponential(1, 100, 0), Duration::from_millis(200));
        assert_eq!(policy.exponential(3, 100, 0), Duration::from_millis(800));
    }

    #[test]
    fn test_jitter_stays_within_base() {
        let policy = policy();
        for attempt in 0..4 {
            let floor = Duration::from_millis(100 * (1 << attempt));
            let ceiling = floor + Duration::from_millis(100);
            for _ in 0..50 {
                let delay = policy.compute_delay(attempt, None);
                assert!(delay >= floor && delay <= ceiling, "{:?}", delay);
            }
        }
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = policy();
        assert_eq!(policy.compute_delay(20, None), Duration::from_secs(10));
        assert_eq!(policy.compute_delay(200, None), Duration::from_secs(10));
    }

    #[test]
    fn test_zero_base_delay() {
        let policy = BackoffPolicy::new(Duration::ZERO, Duration::from_secs(1));
        assert_eq!(policy.compute_delay(5, None), Duration::ZERO);
    }
}
