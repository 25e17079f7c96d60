use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use foundation_core::Config;
use foundation_provider::CloudProvider;

/// Source of time for every wait the orchestrator performs.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);

    /// Time elapsed since the clock was created.
    fn elapsed(&self) -> Duration;
}

/// Wall-clock time backed by the tokio timer.
pub struct TokioClock {
    started: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        TokioClock {
            started: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// A clock that never blocks. Each sleep advances virtual time instantly and
/// is recorded so tests can assert on the waiting schedule.
#[derive(Default)]
pub struct FakeClock {
    inner: Mutex<FakeTime>,
}

#[derive(Default)]
struct FakeTime {
    now: Duration,
    sleeps: Vec<Duration>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.lock().sleeps.clone()
    }

    pub fn advance(&self, by: Duration) {
        self.lock().now += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeTime> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Clock for FakeClock {
    async fn sleep(&self, duration: Duration) {
        let mut time = self.lock();
        time.now += duration;
        time.sleeps.push(duration);
    }

    fn elapsed(&self) -> Duration {
        self.lock().now
    }
}

/// Everything a phase needs, passed by reference through every call.
#[derive(Clone, Copy)]
pub struct RunContext<'a> {
    pub config: &'a Config,
    pub provider: &'a dyn CloudProvider,
    pub clock: &'a dyn Clock,
}

impl<'a> RunContext<'a> {
    pub fn new(config: &'a Config, provider: &'a dyn CloudProvider, clock: &'a dyn Clock) -> Self {
        RunContext {
            config,
            provider,
            clock,
        }
    }

    pub fn dry_run(&self) -> bool {
        self.config.dry_run
    }

    pub fn project(&self) -> &'a str {
        &self.config.project.short_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_clock_advances_without_waiting() {
        let clock = FakeClock::new();
        clock.sleep(Duration::from_secs(600)).await;
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.elapsed(), Duration::from_secs(605));
        assert_eq!(clock.sleeps(), vec![Duration::from_secs(600)]);
    }
}
