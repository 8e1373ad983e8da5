//! Retry decisions and backoff delays.
//!
//! Stateless: every answer is a pure function of the policy, the retry index
//! and (for `should_retry`) the error. The retry index is 0 for the first
//! retry, i.e. the number of retries already performed.

use std::time::Duration;

use bulwark_types::error::{ErrorKind, NodeError};
use bulwark_types::resilience::{RetryPolicy, RetryStrategy};

// ---------------------------------------------------------------------------
// RetryEngine
// ---------------------------------------------------------------------------

/// Stateless retry engine for node failures.
///
/// No internal state; all logic is in associated functions that take the
/// policy as a parameter.
pub struct RetryEngine;

impl RetryEngine {
    /// Whether the failure at `attempt_index` earns another attempt.
    ///
    /// False once `max_retries` retries have been spent, when the policy
    /// restricts retryable kinds and `error.kind` is not one of them, and
    /// always for breaker rejections.
    pub fn should_retry(policy: &RetryPolicy, attempt_index: u32, error: &NodeError) -> bool {
        if attempt_index >= policy.max_retries {
            return false;
        }
        if error.kind == ErrorKind::CircuitOpen {
            return false;
        }
        policy.retryable_kinds.is_empty() || policy.retryable_kinds.contains(&error.kind)
    }

    /// Delay before the retry at `attempt_index`, capped at `max_delay`.
    pub fn next_delay(policy: &RetryPolicy, attempt_index: u32) -> Duration {
        let factor = match policy.strategy {
            RetryStrategy::Immediate => return Duration::ZERO,
            RetryStrategy::Linear => u128::from(attempt_index) + 1,
            RetryStrategy::Exponential => 1u128.checked_shl(attempt_index).unwrap_or(u128::MAX),
            RetryStrategy::Fibonacci => u128::from(fibonacci(u64::from(attempt_index) + 1)),
        };
        scale(policy.base_delay, factor, policy.max_delay)
    }
}

/// `base * factor` in nanoseconds, saturating and capped at `max`.
fn scale(base: Duration, factor: u128, max: Duration) -> Duration {
    let nanos = base.as_nanos().saturating_mul(factor);
    if nanos >= max.as_nanos() {
        return max;
    }
    // Below `max`, so it fits in a Duration.
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

const NANOS_PER_SEC: u128 = 1_000_000_000;

/// fib(1) = fib(2) = 1. Saturates at `u64::MAX`; callers cap far lower.
fn fibonacci(n: u64) -> u64 {
    let (mut prev, mut curr) = (0u64, 1u64);
    for _ in 1..n {
        let next = prev.saturating_add(curr);
        prev = curr;
        curr = next;
        if curr == u64::MAX {
            break;
        }
    }
    curr
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(strategy: RetryStrategy, base_ms: u64, max_ms: u64) -> RetryPolicy {
        RetryPolicy::new(
            10,
            strategy,
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
        )
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    // -------------------------------------------------------------------
    // should_retry
    // -------------------------------------------------------------------

    #[test]
    fn test_should_retry_within_budget() {
        let policy = RetryPolicy::immediate(2);
        let err = NodeError::connection("refused");
        assert!(RetryEngine::should_retry(&policy, 0, &err));
        assert!(RetryEngine::should_retry(&policy, 1, &err));
        assert!(!RetryEngine::should_retry(&policy, 2, &err));
        assert!(!RetryEngine::should_retry(&policy, 3, &err));
    }

    #[test]
    fn test_zero_retries_never_retries() {
        let policy = RetryPolicy::immediate(0);
        assert!(!RetryEngine::should_retry(&policy, 0, &NodeError::timeout("slow")));
    }

    #[test]
    fn test_empty_kind_set_retries_everything() {
        let policy = RetryPolicy::immediate(1);
        assert!(RetryEngine::should_retry(&policy, 0, &NodeError::validation("bad")));
        assert!(RetryEngine::should_retry(&policy, 0, &NodeError::unknown("?")));
    }

    #[test]
    fn test_kind_filter() {
        let policy = RetryPolicy::immediate(3)
            .with_retryable_kinds([ErrorKind::Timeout, ErrorKind::RateLimited]);
        assert!(RetryEngine::should_retry(&policy, 0, &NodeError::timeout("slow")));
        assert!(RetryEngine::should_retry(&policy, 0, &NodeError::rate_limited("429")));
        assert!(!RetryEngine::should_retry(&policy, 0, &NodeError::connection("refused")));
        assert!(!RetryEngine::should_retry(&policy, 0, &NodeError::validation("bad")));
    }

    #[test]
    fn test_circuit_open_is_never_retried() {
        let policy = RetryPolicy::immediate(5);
        assert!(!RetryEngine::should_retry(&policy, 0, &NodeError::circuit_open("n")));
    }

    // -------------------------------------------------------------------
    // next_delay
    // -------------------------------------------------------------------

    #[test]
    fn test_immediate_is_zero() {
        let policy = policy(RetryStrategy::Immediate, 100, 1000);
        for i in 0..5 {
            assert_eq!(RetryEngine::next_delay(&policy, i), Duration::ZERO);
        }
    }

    #[test]
    fn test_linear_delays() {
        let policy = policy(RetryStrategy::Linear, 100, 350);
        assert_eq!(RetryEngine::next_delay(&policy, 0), ms(100));
        assert_eq!(RetryEngine::next_delay(&policy, 1), ms(200));
        assert_eq!(RetryEngine::next_delay(&policy, 2), ms(300));
        assert_eq!(RetryEngine::next_delay(&policy, 3), ms(350));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = policy(RetryStrategy::Exponential, 100, 1000);
        assert_eq!(RetryEngine::next_delay(&policy, 0), ms(100));
        assert_eq!(RetryEngine::next_delay(&policy, 1), ms(200));
        assert_eq!(RetryEngine::next_delay(&policy, 2), ms(400));
        assert_eq!(RetryEngine::next_delay(&policy, 3), ms(800));
        assert_eq!(RetryEngine::next_delay(&policy, 4), ms(1000));
    }

    #[test]
    fn test_fibonacci_delays() {
        let policy = policy(RetryStrategy::Fibonacci, 10, 10_000);
        let delays: Vec<Duration> = (0..7).map(|i| RetryEngine::next_delay(&policy, i)).collect();
        assert_eq!(
            delays,
            vec![ms(10), ms(10), ms(20), ms(30), ms(50), ms(80), ms(130)]
        );
    }

    #[test]
    fn test_exponential_monotone_and_capped() {
        for (base, max) in [(1, 1), (7, 1000), (100, 100_000), (250, 60_000), (0, 0)] {
            let policy = policy(RetryStrategy::Exponential, base, max);
            let mut previous = Duration::ZERO;
            for i in 0..200 {
                let delay = RetryEngine::next_delay(&policy, i);
                assert!(delay >= previous, "delay decreased at index {i}");
                assert!(delay <= ms(max), "delay exceeded cap at index {i}");
                previous = delay;
            }
        }
    }

    #[test]
    fn test_huge_indices_saturate_to_cap() {
        for strategy in [
            RetryStrategy::Linear,
            RetryStrategy::Exponential,
            RetryStrategy::Fibonacci,
        ] {
            let policy = policy(strategy, 1_000, 5_000);
            assert_eq!(RetryEngine::next_delay(&policy, u32::MAX), ms(5_000));
        }
    }

    #[test]
    fn test_zero_base_stays_zero_at_any_index() {
        for strategy in [
            RetryStrategy::Linear,
            RetryStrategy::Exponential,
            RetryStrategy::Fibonacci,
        ] {
            let policy = policy(strategy, 0, 5_000);
            for i in [0, 31, 32, 63, 64, 127, 128, u32::MAX] {
                assert_eq!(
                    RetryEngine::next_delay(&policy, i),
                    Duration::ZERO,
                    "{strategy:?} at index {i}"
                );
            }
        }
    }

    #[test]
    fn test_factors_beyond_u32_scale_exactly() {
        let policy = RetryPolicy::new(
            10,
            RetryStrategy::Exponential,
            Duration::from_nanos(1),
            Duration::from_secs(3600),
        );
        assert_eq!(
            RetryEngine::next_delay(&policy, 32),
            Duration::from_nanos(1 << 32)
        );
        assert_eq!(
            RetryEngine::next_delay(&policy, 40),
            Duration::from_nanos(1 << 40)
        );
        assert_eq!(
            RetryEngine::next_delay(&policy, 42),
            Duration::from_secs(3600)
        );
    }

    #[test]
    fn test_fibonacci_sequence() {
        let seq: Vec<u64> = (1..=10).map(fibonacci).collect();
        assert_eq!(seq, vec![1, 1, 2, 3, 5, 8, 13, 21, 34, 55]);
        assert_eq!(fibonacci(200), u64::MAX);
    }
}
