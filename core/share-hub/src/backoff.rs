//! Restart backoff for failed producer runs.
//!
//! The delay before restart `n` (0-indexed) is `first × factor^n`, clamped to
//! `max`, then jittered. The base is derived from the attempt number alone, so
//! jitter never feeds back into later delays.
//!
//! ```rust
//! use std::time::Duration;
//! use share_hub::{BackoffPolicy, JitterPolicy};
//!
//! let backoff = BackoffPolicy {
//!     first: Duration::from_millis(100),
//!     max: Duration::from_secs(1),
//!     factor: 2.0,
//!     jitter: JitterPolicy::None,
//! };
//!
//! assert_eq!(backoff.next(0), Duration::from_millis(100));
//! assert_eq!(backoff.next(3), Duration::from_millis(800));
//! assert_eq!(backoff.next(10), Duration::from_secs(1));
//! ```

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::millis;

/// Randomization applied to a computed backoff delay.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterPolicy {
    /// Exact delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay/2 + uniform[0, delay/2]`.
    Equal,
}

impl JitterPolicy {
    pub fn apply(&self, delay: Duration) -> Duration {
        match self {
            JitterPolicy::None => delay,
            JitterPolicy::Full => {
                let ms = delay.as_millis() as u64;
                if ms == 0 {
                    return delay;
                }
                Duration::from_millis(rand::thread_rng().gen_range(0..=ms))
            }
            JitterPolicy::Equal => {
                let ms = delay.as_millis() as u64;
                let half = ms / 2;
                if half == 0 {
                    return delay;
                }
                Duration::from_millis(half + rand::thread_rng().gen_range(0..=half))
            }
        }
    }
}

/// Exponential backoff between producer restarts.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the first restart.
    #[serde(rename = "first_ms", with = "millis")]
    pub first: Duration,
    /// Cap on any single delay.
    #[serde(rename = "max_ms", with = "millis")]
    pub max: Duration,
    /// Multiplicative growth factor, `>= 1.0`.
    pub factor: f64,
    #[serde(default)]
    pub jitter: JitterPolicy,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter: JitterPolicy::None,
        }
    }
}

impl BackoffPolicy {
    /// Delay before restart number `attempt` (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let unclamped = self.first.as_secs_f64() * self.factor.powi(exp);

        let base = if !unclamped.is_finite() || unclamped < 0.0 || unclamped > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(unclamped)
        };

        self.jitter.apply(base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: JitterPolicy) -> BackoffPolicy {
        BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(30),
            factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn test_exponential_growth_no_jitter() {
        let policy = policy(JitterPolicy::None);

        assert_eq!(policy.next(0), Duration::from_millis(100));
        assert_eq!(policy.next(1), Duration::from_millis(200));
        assert_eq!(policy.next(2), Duration::from_millis(400));
        assert_eq!(policy.next(4), Duration::from_millis(1600));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(10),
            max: Duration::from_secs(5),
            factor: 2.0,
            jitter: JitterPolicy::None,
        };
        assert_eq!(policy.next(0), Duration::from_secs(5));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        assert_eq!(policy(JitterPolicy::None).next(u32::MAX), Duration::from_secs(30));
    }

    #[test]
    fn test_equal_jitter_bounds() {
        let policy = policy(JitterPolicy::Equal);
        for attempt in 0..12 {
            let base_ms = (100.0 * 2.0f64.powi(attempt as i32)).min(30_000.0) as u64;
            let delay = policy.next(attempt);
            assert!(delay >= Duration::from_millis(base_ms / 2));
            assert!(delay <= Duration::from_millis(base_ms));
        }
    }

    #[test]
    fn test_full_jitter_never_exceeds_base() {
        let policy = policy(JitterPolicy::Full);
        for _ in 0..50 {
            assert!(policy.next(3) <= Duration::from_millis(800));
        }
    }
}
