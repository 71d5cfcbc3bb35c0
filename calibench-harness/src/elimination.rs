//! Dead-code elimination risk detection.
//!
//! An optimizer that proves a benchmark's result unused may delete the work
//! entirely. Such benchmarks run about as fast as an empty function, so each
//! throughput result is compared against a measured no-op baseline.

use calibench_core::{
    BenchmarkMode, BenchmarkOptions, BenchmarkResult, EliminationWarning, Timer, UsageError,
};
use tracing::debug;

use crate::error::EngineError;
use crate::instrument::Pipeline;
use crate::lifecycle::Engine;
use crate::registry::WorkFn;

/// Warn when a benchmark is less than this many times slower than a no-op.
pub const DEFAULT_THRESHOLD: f64 = 10.0;

const BASELINE_NAME: &str = "__baseline__";

/// Run-scoped accumulator of elimination warnings.
#[derive(Debug, Clone)]
pub struct EliminationDetector {
    threshold: f64,
    baseline_ns: Option<f64>,
    warnings: Vec<EliminationWarning>,
}

impl Default for EliminationDetector {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            baseline_ns: None,
            warnings: Vec::new(),
        }
    }
}

impl EliminationDetector {
    pub fn new(threshold: f64) -> Result<Self, UsageError> {
        if !threshold.is_finite() || threshold <= 0.0 {
            return Err(UsageError::option(
                "elimination_threshold",
                format!("must be a positive number, got {threshold}"),
            ));
        }
        Ok(Self {
            threshold,
            ..Default::default()
        })
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Baseline time per operation in nanoseconds, once known.
    pub fn baseline_ns(&self) -> Option<f64> {
        self.baseline_ns
    }

    pub fn set_baseline(&mut self, time_per_op_ns: f64) {
        self.baseline_ns = Some(time_per_op_ns);
    }

    /// Measure an empty function in throughput mode and keep it as baseline.
    pub fn measure_baseline(&mut self) -> Result<f64, EngineError> {
        debug!("Measuring baseline for dead code elimination detection");

        let work = WorkFn::Unmanaged(Box::new(|count| {
            for _ in 0..count {
                std::hint::black_box(());
            }
        }));
        let options = BenchmarkOptions {
            min_time: 0.01,
            max_time: 0.05,
            repeat_suite: 1,
            min_samples: 10,
            baseline: false,
        };
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new(BASELINE_NAME, &work, &options, &mut pipeline);

        let initial_iterations = engine.initial_iterations()?;
        let result = engine.run_benchmark(initial_iterations, BenchmarkMode::Ops)?;
        let baseline_ns = result.duration_per_op_ns();

        debug!("Elimination baseline: {}/iter", Timer::format(baseline_ns));
        self.set_baseline(baseline_ns);
        Ok(baseline_ns)
    }

    /// Flag `name` when `time_per_op_ns` is under `threshold x baseline`.
    ///
    /// A later check of the same name replaces its earlier warning. Without
    /// a baseline nothing is flagged.
    pub fn check(&mut self, name: &str, time_per_op_ns: f64) -> Option<&EliminationWarning> {
        let baseline_ns = self.baseline_ns?;
        if time_per_op_ns >= baseline_ns * self.threshold {
            return None;
        }

        let warning = EliminationWarning {
            name: name.to_string(),
            time_per_op_ns,
            baseline_ns,
            ratio: time_per_op_ns / baseline_ns,
        };
        let idx = match self.warnings.iter().position(|w| w.name == name) {
            Some(idx) => {
                self.warnings[idx] = warning;
                idx
            }
            None => {
                self.warnings.push(warning);
                self.warnings.len() - 1
            }
        };
        self.warnings.get(idx)
    }

    /// Check a finished benchmark. Latency results are ignored.
    pub fn observe(&mut self, result: &BenchmarkResult) -> Option<&EliminationWarning> {
        result.ops_sec()?;
        self.check(&result.name, result.duration_per_op_ns())
    }

    pub fn warning(&self, name: &str) -> Option<&EliminationWarning> {
        self.warnings.iter().find(|w| w.name == name)
    }

    pub fn has_warning(&self, name: &str) -> bool {
        self.warning(name).is_some()
    }

    /// Every warning of the run, in the order first flagged.
    pub fn warnings(&self) -> &[EliminationWarning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<EliminationWarning> {
        self.warnings
    }
}
