//! Three-state circuit breaker fronting each external tool.
//!
//! Closed → Open when the failure count inside the window reaches the
//! threshold; Open → HalfOpen after the recovery timeout; HalfOpen admits a
//! bounded number of trial calls and closes only when the success ratio
//! clears the configured bar.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::{info, warn};

/// Tuning knobs for one breaker instance.
#[derive(Debug, Clone, Copy)]
pub struct BreakerPolicy {
    /// Failures inside `failure_window` that trip the breaker.
    pub failure_threshold: u32,
    /// Sliding window failures are counted in.
    pub failure_window: Duration,
    /// Time the breaker stays open before probing again.
    pub recovery_timeout: Duration,
    /// Trial calls admitted while half-open.
    pub half_open_calls: u32,
    /// Fraction of trial calls that must succeed to close.
    pub success_ratio: f64,
}

impl BreakerPolicy {
    /// Conservative policy used for the extract tool.
    #[must_use]
    pub const fn conservative() -> Self {
        Self {
            failure_threshold: 2,
            failure_window: Duration::from_secs(120),
            recovery_timeout: Duration::from_secs(120),
            half_open_calls: 1,
            success_ratio: 1.0,
        }
    }

    /// Permissive policy used for the convert tool.
    #[must_use]
    pub const fn permissive() -> Self {
        Self {
            failure_threshold: 3,
            failure_window: Duration::from_secs(120),
            recovery_timeout: Duration::from_secs(60),
            half_open_calls: 2,
            success_ratio: 0.5,
        }
    }
}

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    /// Calls pass through; failures are counted.
    Closed,
    /// Calls are rejected without reaching the tool.
    Open,
    /// A bounded number of trial calls probe the tool.
    HalfOpen,
}

impl BreakerState {
    /// Gauge value exported to metrics (0 closed, 1 half-open, 2 open).
    #[must_use]
    pub const fn as_gauge(self) -> i64 {
        match self {
            Self::Closed => 0,
            Self::HalfOpen => 1,
            Self::Open => 2,
        }
    }
}

#[derive(Debug)]
enum Inner {
    Closed {
        recent_failures: VecDeque<Instant>,
    },
    Open {
        since: Instant,
    },
    HalfOpen {
        admitted: u32,
        successes: u32,
        failures: u32,
    },
}

/// Circuit breaker shared by the workers that call one tool.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: &'static str,
    policy: BreakerPolicy,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    /// Construct a closed breaker for the named tool.
    #[must_use]
    pub const fn new(name: &'static str, policy: BreakerPolicy) -> Self {
        Self {
            name,
            policy,
            inner: Mutex::new(Inner::Closed {
                recent_failures: VecDeque::new(),
            }),
        }
    }

    /// Tool name this breaker fronts.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Ask to make one call. Returns `false` when the call must be rejected.
    #[must_use]
    pub fn admit(&self) -> bool {
        let mut inner = self.lock();
        match &mut *inner {
            Inner::Closed { .. } => true,
            Inner::Open { since } => {
                if since.elapsed() >= self.policy.recovery_timeout {
                    info!(tool = self.name, "circuit breaker probing after recovery timeout");
                    *inner = Inner::HalfOpen {
                        admitted: 1,
                        successes: 0,
                        failures: 0,
                    };
                    true
                } else {
                    false
                }
            }
            Inner::HalfOpen { admitted, .. } => {
                if *admitted < self.policy.half_open_calls {
                    *admitted += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Record the outcome of an admitted call.
    pub fn record(&self, success: bool) {
        let mut inner = self.lock();
        match &mut *inner {
            Inner::Closed { recent_failures } => {
                if success {
                    recent_failures.clear();
                    return;
                }
                let now = Instant::now();
                recent_failures.push_back(now);
                while let Some(front) = recent_failures.front() {
                    if now.duration_since(*front) > self.policy.failure_window {
                        recent_failures.pop_front();
                    } else {
                        break;
                    }
                }
                if recent_failures.len() >= self.policy.failure_threshold as usize {
                    warn!(
                        tool = self.name,
                        failures = recent_failures.len(),
                        "circuit breaker opened"
                    );
                    *inner = Inner::Open { since: now };
                }
            }
            Inner::Open { .. } => {}
            Inner::HalfOpen {
                admitted,
                successes,
                failures,
            } => {
                if success {
                    *successes += 1;
                } else {
                    *failures += 1;
                    warn!(tool = self.name, "circuit breaker re-opened from half-open");
                    *inner = Inner::Open {
                        since: Instant::now(),
                    };
                    return;
                }

                let finished = *successes + *failures;
                if finished >= self.policy.half_open_calls && finished >= *admitted {
                    let ratio = f64::from(*successes) / f64::from(finished);
                    if ratio >= self.policy.success_ratio {
                        info!(tool = self.name, "circuit breaker closed");
                        *inner = Inner::Closed {
                            recent_failures: VecDeque::new(),
                        };
                    } else {
                        *inner = Inner::Open {
                            since: Instant::now(),
                        };
                    }
                }
            }
        }
    }

    /// Current observable state.
    #[must_use]
    pub fn state(&self) -> BreakerState {
        match &*self.lock() {
            Inner::Closed { .. } => BreakerState::Closed,
            Inner::Open { since } => {
                if since.elapsed() >= self.policy.recovery_timeout {
                    BreakerState::HalfOpen
                } else {
                    BreakerState::Open
                }
            }
            Inner::HalfOpen { .. } => BreakerState::HalfOpen,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_policy() -> BreakerPolicy {
        BreakerPolicy {
            failure_threshold: 2,
            failure_window: Duration::from_secs(60),
            recovery_timeout: Duration::from_millis(10),
            half_open_calls: 1,
            success_ratio: 1.0,
        }
    }

    #[test]
    fn opens_at_threshold_and_rejects() {
        let breaker = CircuitBreaker::new("extract", fast_policy());
        assert!(breaker.admit());
        breaker.record(false);
        assert!(breaker.admit());
        breaker.record(false);

        assert_eq!(breaker.state(), BreakerState::Open);
        assert!(!breaker.admit());
    }

    #[test]
    fn half_open_trial_closes_on_success() {
        let breaker = CircuitBreaker::new("extract", fast_policy());
        breaker.record(false);
        breaker.record(false);
        assert_eq!(breaker.state(), BreakerState::Open);

        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.admit(), "recovery timeout elapsed; probe admitted");
        breaker.record(true);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens() {
        let breaker = CircuitBreaker::new("convert", fast_policy());
        breaker.record(false);
        breaker.record(false);
        std::thread::sleep(Duration::from_millis(15));
        assert!(breaker.admit());
        breaker.record(false);
        assert!(!breaker.admit());
    }

    #[test]
    fn success_clears_closed_failure_window() {
        let breaker = CircuitBreaker::new("convert", fast_policy());
        breaker.record(false);
        breaker.record(true);
        breaker.record(false);
        assert_eq!(breaker.state(), BreakerState::Closed);
    }
}
