//! Bounded exponential backoff for controller calls

use std::time::Duration;

use rand::Rng;

/// Retry policy for rate-limited and transient controller failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before the next attempt after `failures` failed attempts
    ///
    /// `initial * 2^(failures-1)`, raised to the server hint when larger,
    /// plus up to 10% jitter, never above `max_backoff`.
    pub fn backoff(&self, failures: u32, retry_after: Option<Duration>) -> Duration {
        let exponent = failures.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exponent)
            .max(retry_after.unwrap_or_default())
            .min(self.max_backoff);
        let jitter = base.mul_f64(rand::thread_rng().gen_range(0.0..=0.1));
        (base + jitter).min(self.max_backoff)
    }

    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(1),
        }
    }

    fn within_jitter(actual: Duration, base: Duration) -> bool {
        actual >= base && actual <= base + base.mul_f64(0.1)
    }

    #[test]
    fn test_exponential_growth() {
        let p = policy();
        assert!(within_jitter(p.backoff(1, None), Duration::from_millis(100)));
        assert!(within_jitter(p.backoff(2, None), Duration::from_millis(200)));
        assert!(within_jitter(p.backoff(3, None), Duration::from_millis(400)));
    }

    #[test]
    fn test_capped_at_max() {
        let p = policy();
        assert_eq!(p.backoff(10, None), Duration::from_secs(1));
        assert_eq!(p.backoff(u32::MAX, None), Duration::from_secs(1));
    }

    #[test]
    fn test_retry_after_raises_delay() {
        let p = policy();
        assert!(within_jitter(
            p.backoff(1, Some(Duration::from_millis(700))),
            Duration::from_millis(700)
        ));
        assert_eq!(p.backoff(1, Some(Duration::from_secs(30))), Duration::from_secs(1));
    }

    #[test]
    fn test_should_retry() {
        let p = RetryPolicy::default();
        assert!(p.should_retry(1));
        assert!(p.should_retry(2));
        assert!(!p.should_retry(3));
    }
}
