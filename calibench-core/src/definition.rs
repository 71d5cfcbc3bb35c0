//! Benchmark definitions as they travel between runner and worker.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::clock::Timer;
use crate::error::UsageError;

/// Default lower bound of a sampling window, in seconds.
pub const DEFAULT_MIN_TIME: f64 = 0.05;
/// Default time budget of one repetition, in seconds.
pub const DEFAULT_MAX_TIME: f64 = 0.5;
/// Default number of repetitions.
pub const DEFAULT_REPEAT_SUITE: u32 = 1;
/// Default minimum number of rounds per repetition.
pub const DEFAULT_MIN_SAMPLES: u32 = 10;
/// Repetitions needed before a t-test comparison is meaningful.
pub const MIN_REPEAT_FOR_TTEST: u32 = 30;

/// What a benchmark reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkMode {
    /// Calibrated batches; reports operations per second.
    #[default]
    Ops,
    /// One call per repetition; reports wall time per call.
    Time,
}

impl fmt::Display for BenchmarkMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BenchmarkMode::Ops => write!(f, "ops"),
            BenchmarkMode::Time => write!(f, "time"),
        }
    }
}

impl FromStr for BenchmarkMode {
    type Err = UsageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ops" => Ok(BenchmarkMode::Ops),
            "time" => Ok(BenchmarkMode::Time),
            other => Err(UsageError::option(
                "mode",
                format!("expected \"ops\" or \"time\", got {other:?}"),
            )),
        }
    }
}

/// Per-benchmark measurement options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkOptions {
    /// Lower bound of a sampling window, in seconds.
    pub min_time: f64,
    /// Time budget of one repetition, in seconds.
    pub max_time: f64,
    /// Number of independent repetitions aggregated into the result.
    pub repeat_suite: u32,
    /// Minimum number of rounds before a repetition may stop.
    pub min_samples: u32,
    /// Whether this benchmark is the run's comparison baseline.
    pub baseline: bool,
}

impl Default for BenchmarkOptions {
    fn default() -> Self {
        Self {
            min_time: DEFAULT_MIN_TIME,
            max_time: DEFAULT_MAX_TIME,
            repeat_suite: DEFAULT_REPEAT_SUITE,
            min_samples: DEFAULT_MIN_SAMPLES,
            baseline: false,
        }
    }
}

impl BenchmarkOptions {
    /// Smallest accepted `min_time`, exclusive: a thousand clock ticks.
    pub const MIN_TIME_FLOOR: f64 = Timer::RESOLUTION * 1e3;

    /// Check ranges: `max_time >= min_time > MIN_TIME_FLOOR`, counts >= 1.
    pub fn validate(&self) -> Result<(), UsageError> {
        if !self.min_time.is_finite() || self.min_time <= Self::MIN_TIME_FLOOR {
            return Err(UsageError::option(
                "min_time",
                format!("must be > {}, got {}", Self::MIN_TIME_FLOOR, self.min_time),
            ));
        }
        if !self.max_time.is_finite() || self.max_time < self.min_time {
            return Err(UsageError::option(
                "max_time",
                format!("must be >= min_time ({}), got {}", self.min_time, self.max_time),
            ));
        }
        if self.repeat_suite < 1 {
            return Err(UsageError::option("repeat_suite", "must be >= 1"));
        }
        if self.min_samples < 1 {
            return Err(UsageError::option("min_samples", "must be >= 1"));
        }
        Ok(())
    }
}

/// A benchmark as seen outside the process that registered it.
///
/// The work function is referenced by name; both the runner and an isolated
/// worker resolve it against the same registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkDefinition {
    pub name: String,
    pub options: BenchmarkOptions,
}

impl BenchmarkDefinition {
    /// Create a validated definition.
    pub fn new(name: impl Into<String>, options: BenchmarkOptions) -> Result<Self, UsageError> {
        let name = name.into();
        if name.is_empty() {
            return Err(UsageError::option("name", "must not be empty"));
        }
        options.validate()?;
        Ok(Self { name, options })
    }

    /// Whether this is the run's baseline.
    pub fn is_baseline(&self) -> bool {
        self.options.baseline
    }
}
