//! Timer utilities
//!
//! Wall-clock timers and the accumulating execution timer used for summaries.

use std::future::Future;
use std::time::{Duration, Instant};

/// Labelled wall-clock timer, logs its reading when stopped
#[derive(Debug)]
pub struct Timer {
    start: Instant,
    label: String,
}

impl Timer {
    /// Create and start a new timer
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            start: Instant::now(),
            label: label.into(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.elapsed().as_millis() as u64
    }

    /// Stop timer and return elapsed time
    pub fn stop(self) -> Duration {
        let elapsed = self.elapsed();
        tracing::debug!("{}: {}ms", self.label, elapsed.as_millis());
        elapsed
    }
}

/// Accumulates elapsed time across one or more timed operations
#[derive(Clone, Copy, Debug, Default)]
pub struct ExecutionTimer {
    total: Duration,
}

impl ExecutionTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time a synchronous operation, adding its duration to the total
    pub fn measure<T>(&mut self, f: impl FnOnce() -> T) -> T {
        let start = Instant::now();
        let value = f();
        self.total += start.elapsed();
        value
    }

    /// Time an asynchronous operation, adding its duration to the total
    pub async fn measure_async<F: Future>(&mut self, future: F) -> F::Output {
        let start = Instant::now();
        let value = future.await;
        self.total += start.elapsed();
        value
    }

    /// Add an externally measured duration
    pub fn add(&mut self, elapsed: Duration) {
        self.total += elapsed;
    }

    pub fn total(&self) -> Duration {
        self.total
    }
}
