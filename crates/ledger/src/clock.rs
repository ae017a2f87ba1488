//! The wall-clock seam used by [`crate::lock::Lock::TimeLock`].
//!
//! The source this crate generalizes reads the system clock directly, which
//! makes time-lock tests non-deterministic. This crate instead takes the
//! clock as a trait object so tests can supply a fixed time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// A source of the current wall-clock time, in Unix seconds.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Returns the current time as seconds since the Unix epoch.
    fn now(&self) -> i64;
}

/// The default clock, backed by [`SystemTime::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0)
    }
}

/// A fixed clock for deterministic tests; can be advanced with [`FixedClock::set`].
#[derive(Debug)]
pub struct FixedClock(AtomicI64);

impl FixedClock {
    /// Creates a clock fixed at `now` seconds since the Unix epoch.
    pub fn new(now: i64) -> Self {
        FixedClock(AtomicI64::new(now))
    }

    /// Advances (or rewinds) the fixed clock to `now`.
    pub fn set(&self, now: i64) {
        self.0.store(now, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_reports_set_value() {
        let clock = FixedClock::new(1_000);
        assert_eq!(clock.now(), 1_000);
        clock.set(2_000);
        assert_eq!(clock.now(), 2_000);
    }
}
