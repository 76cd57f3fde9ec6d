//! Per-category retry strategies.
//!
//! The table is part of the pipeline's contract: each fault category carries
//! its own attempt budget, backoff curve, and jitter. Attempt numbers are
//! 1-based and count attempts that reached a worker.

use std::time::Duration;

use rand::Rng;
use sluice_tasks::ErrorCategory;

/// Backoff curve between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// `base * 2^(attempt-1)`, capped.
    Exponential {
        /// First delay.
        base: Duration,
        /// Upper bound for any delay.
        cap: Duration,
    },
    /// `step * attempt`.
    Linear {
        /// Increment per attempt.
        step: Duration,
    },
}

/// Retry strategy for one fault category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetrySpec {
    /// Attempts allowed before the task is dead-lettered. Zero means the
    /// category never retries.
    pub max_attempts: u32,
    /// Backoff curve between attempts.
    pub backoff: Backoff,
    /// Jitter applied to each delay, as a ± fraction.
    pub jitter: f64,
}

impl RetrySpec {
    const fn none() -> Self {
        Self {
            max_attempts: 0,
            backoff: Backoff::Linear {
                step: Duration::ZERO,
            },
            jitter: 0.0,
        }
    }
}

/// Strategy table, keyed by fault category.
#[must_use]
pub const fn spec_for(category: ErrorCategory) -> RetrySpec {
    match category {
        ErrorCategory::Network => RetrySpec {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(2),
                cap: Duration::from_secs(60),
            },
            jitter: 0.25,
        },
        ErrorCategory::FilesystemTransient => RetrySpec {
            max_attempts: 4,
            backoff: Backoff::Linear {
                step: Duration::from_millis(500),
            },
            jitter: 0.0,
        },
        ErrorCategory::Store => RetrySpec {
            max_attempts: 6,
            backoff: Backoff::Exponential {
                base: Duration::from_millis(100),
                cap: Duration::from_secs(5),
            },
            jitter: 0.0,
        },
        ErrorCategory::ExternalProcess => RetrySpec {
            max_attempts: 3,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(3),
                cap: Duration::from_secs(45),
            },
            jitter: 0.0,
        },
        ErrorCategory::RateLimit => RetrySpec {
            max_attempts: 4,
            backoff: Backoff::Exponential {
                base: Duration::from_secs(2),
                cap: Duration::from_secs(120),
            },
            jitter: 0.5,
        },
        ErrorCategory::Resource => RetrySpec {
            max_attempts: 2,
            backoff: Backoff::Linear {
                step: Duration::from_secs(5),
            },
            jitter: 0.0,
        },
        ErrorCategory::FilesystemHard
        | ErrorCategory::Permission
        | ErrorCategory::Validation
        | ErrorCategory::Critical => RetrySpec::none(),
    }
}

/// Delay before the next attempt, or `None` when the budget is spent.
///
/// `attempt` is the attempt that just failed (1-based).
#[must_use]
pub fn delay_for(spec: RetrySpec, attempt: u32) -> Option<Duration> {
    if attempt >= spec.max_attempts {
        return None;
    }

    let raw = match spec.backoff {
        Backoff::Exponential { base, cap } => {
            let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
            base.saturating_mul(factor).min(cap)
        }
        Backoff::Linear { step } => step.saturating_mul(attempt),
    };

    Some(apply_jitter(raw, spec.jitter))
}

fn apply_jitter(delay: Duration, jitter: f64) -> Duration {
    if jitter <= f64::EPSILON || delay.is_zero() {
        return delay;
    }
    let spread = rand::rng().random_range(-jitter..=jitter);
    let scaled = delay.as_secs_f64() * (1.0 + spread);
    Duration::from_secs_f64(scaled.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exponential_backoff_doubles_to_the_cap() {
        // The store spec carries no jitter, so delays are exact.
        let spec = spec_for(ErrorCategory::Store);
        assert_eq!(delay_for(spec, 1), Some(Duration::from_millis(100)));
        assert_eq!(delay_for(spec, 2), Some(Duration::from_millis(200)));
        assert_eq!(delay_for(spec, 3), Some(Duration::from_millis(400)));
        assert_eq!(delay_for(spec, 5), Some(Duration::from_millis(1_600)));
        assert_eq!(delay_for(spec, 6), None);
    }

    #[test]
    fn external_process_backoff_matches_contract() {
        let spec = spec_for(ErrorCategory::ExternalProcess);
        assert_eq!(delay_for(spec, 1), Some(Duration::from_secs(3)));
        assert_eq!(delay_for(spec, 2), Some(Duration::from_secs(6)));
        assert_eq!(delay_for(spec, 3), None);
    }

    #[test]
    fn linear_backoff_steps() {
        let spec = spec_for(ErrorCategory::FilesystemTransient);
        assert_eq!(delay_for(spec, 1), Some(Duration::from_millis(500)));
        assert_eq!(delay_for(spec, 2), Some(Duration::from_millis(1_000)));
        assert_eq!(delay_for(spec, 3), Some(Duration::from_millis(1_500)));
        assert_eq!(delay_for(spec, 4), None);
    }

    #[test]
    fn non_retryable_categories_have_no_budget() {
        for category in [
            ErrorCategory::Validation,
            ErrorCategory::Permission,
            ErrorCategory::FilesystemHard,
            ErrorCategory::Critical,
        ] {
            assert_eq!(delay_for(spec_for(category), 1), None);
            assert_eq!(spec_for(category).max_attempts, 0);
        }
    }

    #[test]
    fn network_jitter_stays_within_bounds() {
        let spec = spec_for(ErrorCategory::Network);
        for _ in 0..100 {
            let delay = delay_for(spec, 1).expect("attempt 1 of 5 must be retryable");
            let secs = delay.as_secs_f64();
            assert!((1.5..=2.5).contains(&secs), "2s ±25% jitter, got {secs}");
        }
    }

    #[test]
    fn rate_limit_cap_holds_under_high_jitter() {
        let spec = spec_for(ErrorCategory::RateLimit);
        for _ in 0..100 {
            let delay = delay_for(spec, 3).expect("attempt 3 of 4 must be retryable");
            // 8s base delay, ±50% jitter.
            let secs = delay.as_secs_f64();
            assert!((4.0..=12.0).contains(&secs), "8s ±50% jitter, got {secs}");
        }
    }
}
