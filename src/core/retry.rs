//! core::retry
//!
//! Bounded exponential backoff.
//!
//! A [`RetryPolicy`] allows `max_retries` retries after the first attempt.
//! Before retry `n` (0-based) the caller sleeps `base_sleep * k`, where `k`
//! is drawn uniformly from `1..2^(n+1)`, capped at `max_sleep`. The jitter
//! keeps sites that collided once from colliding again in lockstep.
//!
//! Two policies are configured: a general one for connection-level retries
//! and a tighter one for compare-and-set attempts.

use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Bounded exponential backoff descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_sleep: Duration,
    pub max_sleep: Duration,
    pub max_retries: u32,
}

impl RetryPolicy {
    /// Largest exponent used when scaling the base sleep.
    const MAX_SHIFT: u32 = 29;

    pub const fn new(base_sleep: Duration, max_sleep: Duration, max_retries: u32) -> Self {
        Self {
            base_sleep,
            max_sleep,
            max_retries,
        }
    }

    /// Default policy for connection-level retries (1s base, 3s cap, 3 retries).
    pub const fn connection_default() -> Self {
        Self::new(Duration::from_millis(1000), Duration::from_millis(3000), 3)
    }

    /// Default policy for compare-and-set attempts (100ms base, 300ms cap, 3 retries).
    pub const fn cas_default() -> Self {
        Self::new(Duration::from_millis(100), Duration::from_millis(300), 3)
    }

    /// A policy that never retries.
    pub const fn no_retry() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO, 0)
    }

    /// Whether retry number `retry_count` (0-based) is still allowed.
    pub fn allows_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }

    /// Upper bound of the sleep before retry `retry_count`.
    pub fn ceiling_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << (retry_count + 1).min(Self::MAX_SHIFT);
        self.base_sleep
            .saturating_mul(factor.saturating_sub(1).max(1))
            .min(self.max_sleep)
    }

    /// Jittered sleep before retry `retry_count`.
    pub fn sleep_for(&self, retry_count: u32) -> Duration {
        let factor = 1u32 << (retry_count + 1).min(Self::MAX_SHIFT);
        let k = rand::rng().random_range(1..factor.max(2));
        self.base_sleep.saturating_mul(k).min(self.max_sleep)
    }

    /// Run `op` until it succeeds, fails permanently, or retries run out.
    ///
    /// Errors for which `is_transient` returns true are retried after a
    /// backoff sleep; the last error is returned once the policy is
    /// exhausted.
    pub fn run<T, E>(
        &self,
        what: &str,
        mut op: impl FnMut() -> Result<T, E>,
        is_transient: impl Fn(&E) -> bool,
    ) -> Result<T, E> {
        let mut retry_count = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(err) if is_transient(&err) && self.allows_retry(retry_count) => {
                    let sleep = self.sleep_for(retry_count);
                    debug!(operation = what, retry = retry_count + 1, ?sleep, "retrying");
                    std::thread::sleep(sleep);
                    retry_count += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::connection_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(1), Duration::from_millis(2), max_retries)
    }

    #[test]
    fn defaults_match_documented_values() {
        let conn = RetryPolicy::connection_default();
        assert_eq!(conn.base_sleep, Duration::from_millis(1000));
        assert_eq!(conn.max_sleep, Duration::from_millis(3000));
        assert_eq!(conn.max_retries, 3);

        let cas = RetryPolicy::cas_default();
        assert_eq!(cas.base_sleep, Duration::from_millis(100));
        assert_eq!(cas.max_sleep, Duration::from_millis(300));
        assert_eq!(cas.max_retries, 3);
    }

    #[test]
    fn allows_bounded_retries() {
        let policy = fast(3);
        assert!(policy.allows_retry(0));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
        assert!(!RetryPolicy::no_retry().allows_retry(0));
    }

    #[test]
    fn sleep_is_bounded() {
        let policy = RetryPolicy::cas_default();
        for retry in 0..40 {
            let sleep = policy.sleep_for(retry);
            assert!(sleep >= policy.base_sleep.min(policy.max_sleep));
            assert!(sleep <= policy.max_sleep);
            assert!(sleep <= policy.ceiling_for(retry));
        }
    }

    #[test]
    fn ceiling_grows_then_caps() {
        let policy = RetryPolicy::new(Duration::from_millis(10), Duration::from_millis(100), 5);
        assert_eq!(policy.ceiling_for(0), Duration::from_millis(10));
        assert_eq!(policy.ceiling_for(1), Duration::from_millis(30));
        assert_eq!(policy.ceiling_for(2), Duration::from_millis(70));
        assert_eq!(policy.ceiling_for(3), Duration::from_millis(100));
    }

    #[test]
    fn run_retries_transient_errors() {
        let calls = Cell::new(0);
        let result: Result<u32, &str> = fast(3).run(
            "test",
            || {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("busy")
                } else {
                    Ok(7)
                }
            },
            |_| true,
        );
        assert_eq!(result, Ok(7));
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn run_stops_when_exhausted() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = fast(2).run(
            "test",
            || {
                calls.set(calls.get() + 1);
                Err("busy")
            },
            |_| true,
        );
        assert_eq!(result, Err("busy"));
        // First attempt plus two retries
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn run_does_not_retry_permanent_errors() {
        let calls = Cell::new(0);
        let result: Result<(), &str> = fast(5).run(
            "test",
            || {
                calls.set(calls.get() + 1);
                Err("fatal")
            },
            |e| *e != "fatal",
        );
        assert_eq!(result, Err("fatal"));
        assert_eq!(calls.get(), 1);
    }
}
