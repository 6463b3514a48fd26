//! Monotonic elapsed-time measurement.
//!
//! Built on `tokio::time::Instant`, so tests that pause the runtime clock
//! see consistent readings.

use std::time::Duration;

use tokio::time::Instant;

/// Measures time since creation or the last reset.
#[derive(Debug, Clone, Copy)]
pub struct Timer {
    start: Instant,
    last: Duration,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    /// Starts a timer at zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
            last: Duration::ZERO,
        }
    }

    /// Restarts the timer at zero.
    pub fn reset(&mut self) {
        self.start = Instant::now();
        self.last = Duration::ZERO;
    }

    /// Takes a new measurement and returns it.
    ///
    /// Readings never go backwards.
    pub fn measure(&mut self) -> Duration {
        let now = self.start.elapsed();
        if now > self.last {
            self.last = now;
        }
        self.last
    }

    /// The most recent measurement, without measuring again.
    #[must_use]
    pub fn read(&self) -> Duration {
        self.last
    }
}
