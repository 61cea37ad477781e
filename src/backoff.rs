//! # Retry Backoff
//!
//! Sleep between contention retries follows a capped exponential curve with
//! random jitter:
//!
//! ```text
//! delay(n, kind) = min(base · 2ⁿ, cap) · multiplier(kind) + U[0, max_jitter)
//! ```
//!
//! Jitter keeps retrying threads from waking in lockstep and colliding on the
//! write lock again. `Busy` means another writer is actively working, so it
//! gets the larger multiplier; `Locked` and `ReadOnly` tend to clear sooner.
//!
//! The defaults are empirical. Treat them as a starting point, not a contract.

use std::time::Duration;

use rand::Rng;

use crate::error::{ContentionKind, Error, Result};

/// Default first-retry delay.
pub const DEFAULT_BACKOFF_BASE_MS: u64 = 1_000;

/// Default ceiling for the exponential part.
pub const DEFAULT_BACKOFF_CAP_MS: u64 = 30_000;

/// Default upper bound (exclusive) of the random jitter.
pub const DEFAULT_MAX_JITTER_MS: u64 = 1_000;

/// Largest per-kind multiplier `validate` accepts.
pub const MAX_MULTIPLIER: f64 = 100.0;

/// Longest single retry sleep `validate` accepts (one hour). Retry sleeps
/// can't be cancelled, so this also bounds how long shutdown can lag.
pub const MAX_RETRY_DELAY_SECS: f64 = 3_600.0;

/// Capped exponential backoff with per-kind multipliers and jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry (attempt 0).
    pub base: Duration,

    /// Ceiling applied before the multiplier and jitter.
    pub cap: Duration,

    /// Multiplier for `SQLITE_BUSY`.
    pub busy_multiplier: f64,

    /// Multiplier for `SQLITE_LOCKED` and `SQLITE_READONLY`.
    pub locked_multiplier: f64,

    /// Jitter is drawn uniformly from `[0, max_jitter)`.
    pub max_jitter: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_millis(DEFAULT_BACKOFF_BASE_MS),
            cap: Duration::from_millis(DEFAULT_BACKOFF_CAP_MS),
            busy_multiplier: 2.0,
            locked_multiplier: 1.0,
            max_jitter: Duration::from_millis(DEFAULT_MAX_JITTER_MS),
        }
    }
}

impl BackoffPolicy {
    /// A policy that never sleeps. Useful for tests that only count attempts.
    pub fn immediate() -> Self {
        Self {
            base: Duration::ZERO,
            cap: Duration::ZERO,
            busy_multiplier: 1.0,
            locked_multiplier: 1.0,
            max_jitter: Duration::ZERO,
        }
    }

    /// Rejects multipliers outside `[0, MAX_MULTIPLIER]` and any policy whose
    /// longest sleep, `cap · multiplier + max_jitter`, exceeds
    /// [`MAX_RETRY_DELAY_SECS`].
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("busy_multiplier", self.busy_multiplier),
            ("locked_multiplier", self.locked_multiplier),
        ] {
            if !value.is_finite() || !(0.0..=MAX_MULTIPLIER).contains(&value) {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be within [0, {MAX_MULTIPLIER}], got {value}"
                )));
            }

            let longest = self.cap.as_secs_f64() * value + self.max_jitter.as_secs_f64();
            if longest > MAX_RETRY_DELAY_SECS {
                return Err(Error::InvalidConfig(format!(
                    "longest retry sleep with {name} is {longest:.0}s, above the {MAX_RETRY_DELAY_SECS:.0}s limit"
                )));
            }
        }
        Ok(())
    }

    fn multiplier(&self, kind: ContentionKind) -> f64 {
        match kind {
            ContentionKind::Busy => self.busy_multiplier,
            ContentionKind::Locked | ContentionKind::ReadOnly => self.locked_multiplier,
        }
    }

    /// Deterministic part of the delay after failed attempt `attempt` (0-based).
    pub fn base_delay(&self, attempt: u32, kind: ContentionKind) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base
            .saturating_mul(factor)
            .min(self.cap)
            .mul_f64(self.multiplier(kind))
    }

    /// Full delay, drawing jitter from `rng`.
    pub fn delay_with<R: Rng + ?Sized>(&self, attempt: u32, kind: ContentionKind, rng: &mut R) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            Duration::ZERO
        } else {
            self.max_jitter.mul_f64(rng.gen::<f64>())
        };
        self.base_delay(attempt, kind) + jitter
    }

    /// Full delay using the thread-local RNG.
    pub fn delay(&self, attempt: u32, kind: ContentionKind) -> Duration {
        self.delay_with(attempt, kind, &mut rand::thread_rng())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn policy_ms(base: u64, cap: u64, jitter: u64) -> BackoffPolicy {
        BackoffPolicy {
            base: Duration::from_millis(base),
            cap: Duration::from_millis(cap),
            busy_multiplier: 2.0,
            locked_multiplier: 1.0,
            max_jitter: Duration::from_millis(jitter),
        }
    }

    #[test]
    fn test_exponential_then_capped() {
        let policy = policy_ms(100, 1_000, 0);
        let locked = ContentionKind::Locked;

        assert_eq!(policy.base_delay(0, locked), Duration::from_millis(100));
        assert_eq!(policy.base_delay(1, locked), Duration::from_millis(200));
        assert_eq!(policy.base_delay(3, locked), Duration::from_millis(800));
        assert_eq!(policy.base_delay(4, locked), Duration::from_millis(1_000));
        assert_eq!(policy.base_delay(40, locked), Duration::from_millis(1_000));
    }

    #[test]
    fn test_busy_waits_longer_than_locked() {
        let policy = policy_ms(100, 1_000, 0);

        for attempt in 0..6 {
            assert!(
                policy.base_delay(attempt, ContentionKind::Busy)
                    > policy.base_delay(attempt, ContentionKind::Locked)
            );
            assert_eq!(
                policy.base_delay(attempt, ContentionKind::ReadOnly),
                policy.base_delay(attempt, ContentionKind::Locked)
            );
        }
    }

    #[test]
    fn test_immediate_never_sleeps() {
        let policy = BackoffPolicy::immediate();
        assert_eq!(policy.delay(7, ContentionKind::Busy), Duration::ZERO);
    }

    #[test]
    fn test_validate_rejects_bad_multiplier() {
        let mut policy = BackoffPolicy::default();
        policy.busy_multiplier = f64::NAN;
        assert!(policy.validate().is_err());

        policy.busy_multiplier = -1.0;
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_validate_bounds_longest_sleep() {
        assert!(BackoffPolicy::default().validate().is_ok());

        let huge = BackoffPolicy {
            busy_multiplier: 1e12,
            ..BackoffPolicy::default()
        };
        assert!(matches!(huge.validate(), Err(Error::InvalidConfig(_))));

        let over_max_multiplier = BackoffPolicy {
            locked_multiplier: MAX_MULTIPLIER + 1.0,
            ..BackoffPolicy::default()
        };
        assert!(over_max_multiplier.validate().is_err());

        // Multiplier in range, but 2h cap * 1.0 is past the sleep limit.
        let long_cap = BackoffPolicy {
            cap: Duration::from_secs(7_200),
            ..BackoffPolicy::default()
        };
        assert!(long_cap.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(attempt in 0u32..64, seed in any::<u64>(), busy in any::<bool>()) {
            let policy = policy_ms(10, 500, 50);
            let kind = if busy { ContentionKind::Busy } else { ContentionKind::Locked };
            let mut rng = StdRng::seed_from_u64(seed);

            let floor = policy.base_delay(attempt, kind);
            let delay = policy.delay_with(attempt, kind, &mut rng);

            prop_assert!(delay >= floor);
            prop_assert!(delay <= floor + Duration::from_millis(50));
            prop_assert!(floor <= Duration::from_millis(500).mul_f64(2.0));
        }

        #[test]
        fn prop_base_delay_monotonic(attempt in 0u32..63) {
            let policy = policy_ms(10, 5_000, 0);
            let kind = ContentionKind::Busy;
            prop_assert!(policy.base_delay(attempt, kind) <= policy.base_delay(attempt + 1, kind));
        }
    }
}
