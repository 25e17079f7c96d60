//! Retry and polling schedules.

use std::time::Duration;

/// Exponential backoff schedule shared by transient-error retries and
/// eventual-consistency polling.
///
/// Attempt numbers are 1-based; `delay_for(n)` is the pause *after* attempt `n`
/// fails. Jitter is added by the caller so the schedule itself stays
/// deterministic.
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub multiplier: f64,
    pub max_interval: Duration,
    pub jitter: Duration,
}

impl BackoffPolicy {
    /// Transient provider errors: a few quick, growing retries.
    pub fn retry_default() -> Self {
        BackoffPolicy {
            max_attempts: 4,
            initial_interval: Duration::from_millis(500),
            multiplier: 2.0,
            max_interval: Duration::from_secs(8),
            jitter: Duration::from_millis(250),
        }
    }

    /// Provider-side readiness (account creation, key activation): a fixed
    /// cadence for up to ten minutes.
    pub fn poll_default() -> Self {
        BackoffPolicy {
            max_attempts: 60,
            initial_interval: Duration::from_secs(10),
            multiplier: 1.0,
            max_interval: Duration::from_secs(10),
            jitter: Duration::ZERO,
        }
    }

    /// No waiting at all. Useful for tests and for single-shot probes.
    pub fn immediate(max_attempts: u32) -> Self {
        BackoffPolicy {
            max_attempts,
            initial_interval: Duration::ZERO,
            multiplier: 1.0,
            max_interval: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Upper bound on time spent sleeping across all attempts, jitter excluded.
    pub fn total_budget(&self) -> Duration {
        (1..self.max_attempts).map(|a| self.delay_for(a)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delays_grow_and_cap() {
        let policy = BackoffPolicy {
            max_interval: Duration::from_secs(2),
            ..BackoffPolicy::retry_default()
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(4), Duration::from_secs(2));
    }

    #[test]
    fn polling_cadence_is_fixed() {
        let policy = BackoffPolicy::poll_default();
        assert_eq!(policy.delay_for(1), policy.delay_for(40));
        assert_eq!(policy.total_budget(), Duration::from_secs(590));
    }

    #[test]
    fn immediate_never_waits() {
        assert_eq!(BackoffPolicy::immediate(3).total_budget(), Duration::ZERO);
    }
}
