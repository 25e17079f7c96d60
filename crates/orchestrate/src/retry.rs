//! The only two waiting primitives in the orchestrator.
//!
//! [`retry_transient`] re-issues a call that failed with a retryable provider
//! error. [`poll_until`] re-reads eventually-consistent state until it
//! settles. Both follow a [`BackoffPolicy`] and sleep through the injected
//! [`Clock`], so tests drive them with a fake clock and never block.

use std::future::Future;
use std::time::Duration;

use foundation_core::BackoffPolicy;
use foundation_provider::ProviderError;
use rand::Rng;
use thiserror::Error;

use crate::context::Clock;

#[derive(Debug, Error)]
pub enum WaitError {
    #[error("{what} did not settle after {attempts} attempts ({waited:?} waited)")]
    TimedOut {
        what: String,
        attempts: u32,
        waited: Duration,
    },
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Run `call`, retrying transient failures per `policy`.
///
/// Non-retryable errors and the last transient error are returned as-is.
pub async fn retry_transient<T, F, Fut>(
    clock: &dyn Clock,
    policy: &BackoffPolicy,
    what: &str,
    mut call: F,
) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt = 1;
    loop {
        match call().await {
            Err(e) if e.is_retryable() && attempt < policy.max_attempts => {
                let delay = jittered(policy.delay_for(attempt), policy.jitter);
                tracing::warn!(what, attempt, error = %e, ?delay, "transient failure, retrying");
                clock.sleep(delay).await;
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Poll `probe` until it yields a value.
///
/// `Ok(None)` means "not yet". Transient errors count as "not yet"; any
/// other error ends the wait immediately.
pub async fn poll_until<T, F, Fut>(
    clock: &dyn Clock,
    policy: &BackoffPolicy,
    what: &str,
    mut probe: F,
) -> Result<T, WaitError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, ProviderError>>,
{
    let mut waited = Duration::ZERO;
    for attempt in 1..=policy.max_attempts {
        match probe().await {
            Ok(Some(value)) => return Ok(value),
            Ok(None) => {}
            Err(e) if e.is_retryable() => {
                tracing::debug!(what, attempt, error = %e, "transient failure while polling");
            }
            Err(e) => return Err(e.into()),
        }
        if attempt < policy.max_attempts {
            let delay = jittered(policy.delay_for(attempt), policy.jitter);
            tracing::debug!(what, attempt, ?delay, "waiting");
            clock.sleep(delay).await;
            waited += delay;
        }
    }
    Err(WaitError::TimedOut {
        what: what.to_string(),
        attempts: policy.max_attempts,
        waited,
    })
}

fn jittered(delay: Duration, jitter: Duration) -> Duration {
    let max = jitter.as_millis() as u64;
    if max == 0 {
        return delay;
    }
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::context::FakeClock;

    fn policy(max_attempts: u32) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(100),
            multiplier: 2.0,
            max_interval: Duration::from_secs(1),
            jitter: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn transient_errors_are_retried_with_backoff() {
        let clock = FakeClock::new();
        let calls = Cell::new(0);
        let out = retry_transient(&clock, &policy(4), "create role", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                if n < 3 {
                    Err(ProviderError::Transient("throttled".into()))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), 3);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(100), Duration::from_millis(200)]
        );
    }

    #[tokio::test]
    async fn permission_errors_are_never_retried() {
        let clock = FakeClock::new();
        let calls = Cell::new(0);
        let out: Result<(), _> = retry_transient(&clock, &policy(4), "create role", || {
            calls.set(calls.get() + 1);
            async { Err(ProviderError::PermissionDenied("no".into())) }
        })
        .await;
        assert!(matches!(out, Err(ProviderError::PermissionDenied(_))));
        assert_eq!(calls.get(), 1);
        assert!(clock.sleeps().is_empty());
    }

    #[tokio::test]
    async fn retries_stop_at_max_attempts() {
        let clock = FakeClock::new();
        let calls = Cell::new(0);
        let out: Result<(), _> = retry_transient(&clock, &policy(3), "put object", || {
            calls.set(calls.get() + 1);
            async { Err(ProviderError::Transient("503".into())) }
        })
        .await;
        assert!(out.unwrap_err().is_retryable());
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn poll_times_out_after_budget() {
        let clock = FakeClock::new();
        let out: Result<(), _> = poll_until(&clock, &policy(5), "account dev", || async {
            Ok(None)
        })
        .await;
        match out {
            Err(WaitError::TimedOut {
                attempts, waited, ..
            }) => {
                assert_eq!(attempts, 5);
                assert_eq!(waited, policy(5).total_budget());
            }
            other => panic!("expected timeout, got {:?}", other),
        }
        assert_eq!(clock.sleeps().len(), 4);
    }

    #[tokio::test]
    async fn poll_treats_transient_errors_as_pending() {
        let clock = FakeClock::new();
        let calls = Cell::new(0);
        let out = poll_until(&clock, &policy(5), "account dev", || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move {
                match n {
                    1 => Err(ProviderError::Transient("throttled".into())),
                    2 => Ok(None),
                    _ => Ok(Some("822529998967")),
                }
            }
        })
        .await;
        assert_eq!(out.unwrap(), "822529998967");
    }

    #[test]
    fn jitter_stays_within_bound() {
        for _ in 0..50 {
            let d = jittered(Duration::from_millis(100), Duration::from_millis(20));
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(120));
        }
    }
}
