//! Audio-clock abstraction. Production code reads a monotonic wall clock;
//! tests inject a fake one so scheduler behaviour is deterministic.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub trait Clock: Send + Sync {
    /// Current audio-clock reading, in seconds.
    fn now(&self) -> f64;
}

pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    #[must_use]
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

/// Deterministic clock for tests: stores seconds as fixed-point microseconds
/// so it can be shared and advanced from outside without interior mutability
/// footguns.
pub struct FakeClock {
    micros: AtomicU64,
}

impl FakeClock {
    #[must_use]
    pub fn new(start_seconds: f64) -> Self {
        Self { micros: AtomicU64::new((start_seconds * 1_000_000.0) as u64) }
    }

    pub fn advance(&self, seconds: f64) {
        self.micros.fetch_add((seconds * 1_000_000.0) as u64, Ordering::SeqCst);
    }

    pub fn set(&self, seconds: f64) {
        self.micros.store((seconds * 1_000_000.0) as u64, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1_000_000.0
    }
}
