//! Monotonic timing primitives.
//!
//! All durations handed around the harness are `f64` nanoseconds. The
//! [`Timer`] wraps [`Instant`], which is monotonic on every supported
//! platform, so elapsed times can never be negative.

use std::time::Instant;

use crate::error::UsageError;

/// Floor applied to every per-operation duration.
///
/// The smallest measurable duration is 1ns, so half of it keeps trivial
/// work functions from producing a zero that later ends up as a divisor.
pub const MIN_RESOLUTION: f64 = 0.5;

/// Largest integer an `f64` represents exactly (2^53 - 1).
pub const MAX_SAFE_INTEGER: u64 = (1 << 53) - 1;

/// Monotonic high-resolution clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct Timer;

impl Timer {
    /// Nanoseconds per second.
    pub const SCALE: f64 = 1e9;

    /// Clock resolution in seconds.
    pub const RESOLUTION: f64 = 1.0 / 1e9;

    /// Current instant.
    #[inline(always)]
    pub fn now() -> Instant {
        Instant::now()
    }

    /// Nanoseconds between `start` and `end`, never negative.
    #[inline(always)]
    pub fn elapsed_ns(start: Instant, end: Instant) -> f64 {
        end.saturating_duration_since(start).as_nanos() as f64
    }

    /// Render a nanosecond duration with an auto-scaled unit.
    ///
    /// For display only; never compare formatted values.
    pub fn format(ns: f64) -> String {
        if ns >= 1e9 {
            format!("{:.2} s", ns / 1e9)
        } else if ns >= 1e6 {
            format!("{:.2} ms", ns / 1e6)
        } else if ns >= 1e3 {
            format!("{:.2} us", ns / 1e3)
        } else if ns >= 1e2 {
            format!("{:.0} ns", ns)
        } else {
            format!("{:.2} ns", ns)
        }
    }
}

/// Timer handed to managed benchmarks.
///
/// The benchmark decides where measurement starts and ends, which keeps its
/// own setup and teardown out of the sample. A fresh timer is created for
/// every round; `start` and `end` must each be called exactly once.
#[derive(Debug)]
pub struct ManagedTimer {
    recommended_count: u64,
    start_time: Option<Instant>,
    end_time: Option<Instant>,
    iterations: u64,
    misuse: Option<String>,
}

impl ManagedTimer {
    /// Create a timer carrying the engine's recommended loop bound.
    pub fn new(recommended_count: u64) -> Self {
        Self {
            recommended_count,
            start_time: None,
            end_time: None,
            iterations: 0,
            misuse: None,
        }
    }

    /// Number of iterations the benchmark should run between `start` and `end`.
    pub fn count(&self) -> u64 {
        self.recommended_count
    }

    /// Start measuring.
    #[inline(always)]
    pub fn start(&mut self) {
        if self.start_time.is_some() {
            self.flag("start() called more than once");
        }
        self.start_time = Some(Instant::now());
    }

    /// Stop measuring, reporting how many iterations actually ran.
    #[inline(always)]
    pub fn end(&mut self, iterations: u64) {
        let now = Instant::now();
        if self.start_time.is_none() {
            self.flag("end() called before start()");
        }
        if self.end_time.is_some() {
            self.flag("end() called more than once");
        }
        if iterations == 0 {
            self.flag("end() must report at least 1 iteration");
        }
        self.end_time = Some(now);
        self.iterations = iterations;
    }

    fn flag(&mut self, reason: &str) {
        if self.misuse.is_none() {
            self.misuse = Some(reason.to_string());
        }
    }

    /// Consume the timer, yielding `(duration_ns, iterations)`.
    pub fn into_sample(self) -> Result<(f64, u64), UsageError> {
        if let Some(reason) = self.misuse {
            return Err(UsageError::TimerMisuse(reason));
        }
        let start = self
            .start_time
            .ok_or_else(|| UsageError::TimerMisuse("You forgot to call start()".to_string()))?;
        let end = self
            .end_time
            .ok_or_else(|| UsageError::TimerMisuse("You forgot to call end(count)".to_string()))?;

        Ok((Timer::elapsed_ns(start, end), self.iterations))
    }
}
