//! Time source for blocking poll and retry loops.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Monotonic time plus blocking sleep.
pub trait Clock: Send + Sync {
    /// Time elapsed since the clock was created.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Wall-clock implementation backed by `Instant` and `thread::sleep`.
#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Simulated clock: `sleep` returns immediately after advancing `now`.
///
/// Every requested sleep is recorded so callers can assert on backoff
/// schedules without waiting for them.
#[derive(Debug, Default)]
pub struct ManualClock {
    elapsed: Mutex<Duration>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance simulated time without recording a sleep.
    pub fn advance(&self, duration: Duration) {
        *self.elapsed.lock() += duration;
    }

    /// All sleeps requested so far, in order.
    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().clone()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps.lock().iter().sum()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        *self.elapsed.lock()
    }

    fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
        *self.elapsed.lock() += duration;
        // Give threads woken by the simulated passage of time a chance to run.
        std::thread::yield_now();
    }
}
