//! Exponential Backoff for Refill Retries
//!
//! A broadcast refill polls each empty member until the TLog has data for
//! it. Commits arrive continuously in a healthy cluster, so an empty reply
//! usually means "ask again shortly". The backoff grows exponentially so a
//! quiet stream doesn't get hammered, and is jittered (±25%) so N member
//! refills started together don't re-poll in lockstep.
//!
//! ```text
//! Attempt 1: immediate
//! Attempt 2: wait ~100ms
//! Attempt 3: wait ~200ms
//! Attempt 4: wait ~400ms  (capped at max_backoff)
//! ```

use std::time::Duration;
use tokio::time::sleep;

/// Backoff configuration.
///
/// `delay(attempt)` grows exponentially from `initial_backoff` by
/// `backoff_multiplier`, capped at `max_backoff`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay before the first retry
    pub initial_backoff: Duration,

    /// Upper bound on any single delay
    pub max_backoff: Duration,

    /// Growth factor between attempts
    pub backoff_multiplier: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// A policy with the given base delay and the default growth and cap.
    pub fn with_base(initial_backoff: Duration) -> Self {
        Self {
            initial_backoff,
            ..Default::default()
        }
    }

    /// Delay for a given attempt number (0-indexed).
    pub fn delay(&self, attempt: u32) -> Duration {
        let millis =
            self.initial_backoff.as_millis() as f64 * self.backoff_multiplier.powi(attempt as i32);
        Duration::from_millis(millis as u64).min(self.max_backoff)
    }

    /// `delay(attempt)` scaled by a random factor in [0.75, 1.25).
    pub fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay(attempt);
        let jitter = 0.75 + rand::random::<f64>() * 0.5;
        Duration::from_millis((base.as_millis() as f64 * jitter) as u64)
    }
}

/// Stateful backoff: tracks the attempt counter across waits.
#[derive(Debug)]
pub struct ExponentialBackoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl ExponentialBackoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Sleep for the next jittered delay and bump the attempt counter.
    pub async fn wait(&mut self) {
        let delay = self.policy.jittered_delay(self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        sleep(delay).await;
    }

    /// Restart the progression after a success.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.initial_backoff, Duration::from_millis(100));
        assert_eq!(policy.max_backoff, Duration::from_secs(30));
        assert_eq!(policy.backoff_multiplier, 2.0);
    }

    #[test]
    fn test_delay_grows_exponentially() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay(0), Duration::from_millis(100));
        assert_eq!(policy.delay(1), Duration::from_millis(200));
        assert_eq!(policy.delay(2), Duration::from_millis(400));
        assert_eq!(policy.delay(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_caps_at_max() {
        let policy = BackoffPolicy {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
        };
        assert_eq!(policy.delay(3), Duration::from_secs(8));
        assert_eq!(policy.delay(4), Duration::from_secs(10));
        assert_eq!(policy.delay(20), Duration::from_secs(10));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = BackoffPolicy::default();
        for _ in 0..100 {
            let jittered = policy.jittered_delay(2).as_millis();
            // delay(2) is 400ms; jitter multiplies by [0.75, 1.25).
            assert!((300..500).contains(&jittered), "jittered = {jittered}ms");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_and_resets() {
        let policy = BackoffPolicy {
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(100),
            backoff_multiplier: 2.0,
        };
        let mut backoff = ExponentialBackoff::new(policy);

        let start = tokio::time::Instant::now();
        backoff.wait().await;
        backoff.wait().await;
        // 10ms + 20ms, both jittered by at most 1.25x.
        assert!(start.elapsed() <= Duration::from_millis(40));

        backoff.reset();
        assert_eq!(backoff.attempt, 0);
    }
}
