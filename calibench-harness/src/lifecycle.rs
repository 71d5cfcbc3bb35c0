//! Calibration and sampling engine.
//!
//! A benchmark goes through three phases:
//!
//! 1. **Calibration**: a trial batch of [`CALIBRATION_ITERATIONS`] sizes
//!    the first measured batch so one round lasts about `min_time`.
//! 2. **Warm-up** (optional): unrecorded rounds that let caches and branch
//!    predictors settle.
//! 3. **Sampling**: `repeat_suite` repetitions, each running rounds until
//!    `max_time` has elapsed and `min_samples` rounds were recorded, and
//!    until `min_samples` of them survive outlier removal. Every round
//!    records its duration per operation and resizes the next batch to fit
//!    the remaining budget.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};

use calibench_core::{
    BenchmarkDefinition, BenchmarkMode, BenchmarkOptions, BenchmarkResult, ManagedTimer,
    Measurement, StatisticalHistogram, Timer, MAX_SAFE_INTEGER, MIN_RESOLUTION,
};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::instrument::{ClockContext, ClockSample, Pipeline};
use crate::registry::{BenchmarkRegistry, WorkFn};

/// Size of the calibration batch.
pub const CALIBRATION_ITERATIONS: u64 = 30;

/// Warm-up window, in seconds.
pub const WARMUP_MIN_TIME: f64 = 0.005;
/// Warm-up budget, in seconds.
pub const WARMUP_MAX_TIME: f64 = 0.05;
/// Warm-up keeps going until it has run more rounds than this.
pub const WARMUP_MIN_SAMPLES: u32 = 10;

/// Iterations needed for `target_secs` at `duration_per_op_ns` each.
///
/// Rounded to the nearest integer and clamped to `[1, MAX_SAFE_INTEGER]`.
pub fn iterations_for_op_duration(duration_per_op_ns: f64, target_secs: f64) -> u64 {
    let ops = target_secs / (duration_per_op_ns / Timer::SCALE);
    if ops.is_nan() {
        return 1;
    }
    ops.round().clamp(1.0, MAX_SAFE_INTEGER as f64) as u64
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "work function panicked".to_string()
    }
}

/// One round: duration in nanoseconds and the iterations it covered.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Clocked {
    pub duration_ns: f64,
    pub iterations: u64,
}

impl Clocked {
    /// Duration per operation, floored at [`MIN_RESOLUTION`].
    pub fn duration_per_op(&self) -> f64 {
        (self.duration_ns / self.iterations.max(1) as f64).max(MIN_RESOLUTION)
    }
}

/// Drives one benchmark through calibration, warm-up and sampling.
pub struct Engine<'a> {
    name: &'a str,
    work: &'a WorkFn,
    options: &'a BenchmarkOptions,
    pipeline: &'a mut Pipeline,
    runtime: Option<tokio::runtime::Runtime>,
    exceeds_max_time: bool,
}

impl<'a> Engine<'a> {
    pub fn new(
        name: &'a str,
        work: &'a WorkFn,
        options: &'a BenchmarkOptions,
        pipeline: &'a mut Pipeline,
    ) -> Self {
        Self {
            name,
            work,
            options,
            pipeline,
            runtime: None,
            exceeds_max_time: false,
        }
    }

    /// Execute one round of `count` iterations.
    ///
    /// Instrument hooks run outside the timed region, and only when
    /// `instrumented` is set.
    pub fn clock(&mut self, count: u64, instrumented: bool) -> Result<Clocked, EngineError> {
        let mut ctx = ClockContext::new(self.work.is_managed());
        if instrumented {
            self.pipeline.before_clock(&mut ctx);
        }

        let work = self.work;
        let (duration_ns, iterations) = match work {
            WorkFn::Unmanaged(batch) => {
                let start = Timer::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| batch(count)));
                let end = Timer::now();
                outcome.map_err(|p| EngineError::work_failed(self.name, panic_message(p)))?;
                (Timer::elapsed_ns(start, end), count)
            }
            WorkFn::Managed(f) => {
                let mut timer = ManagedTimer::new(count);
                catch_unwind(AssertUnwindSafe(|| f(&mut timer)))
                    .map_err(|p| EngineError::work_failed(self.name, panic_message(p)))?;
                timer.into_sample()?
            }
            WorkFn::Async(make) => {
                // Cached across rounds to keep construction out of samples
                let runtime = match self.runtime.take() {
                    Some(runtime) => runtime,
                    None => tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(|e| {
                            EngineError::work_failed(
                                self.name,
                                format!("failed to create async runtime: {e}"),
                            )
                        })?,
                };

                let start = Timer::now();
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    runtime.block_on(async {
                        for _ in 0..count {
                            make().await;
                        }
                    })
                }));
                let end = Timer::now();
                self.runtime = Some(runtime);
                outcome.map_err(|p| EngineError::work_failed(self.name, panic_message(p)))?;
                (Timer::elapsed_ns(start, end), count)
            }
        };

        if !instrumented {
            return Ok(Clocked {
                duration_ns: duration_ns.max(MIN_RESOLUTION),
                iterations,
            });
        }

        self.pipeline.after_clock(&mut ctx);
        let mut sample = ClockSample {
            duration_ns,
            iterations,
            context: ctx,
        };
        self.pipeline.on_complete_clock(&mut sample);

        Ok(Clocked {
            duration_ns: sample.duration_ns.max(MIN_RESOLUTION),
            iterations: sample.iterations.max(1),
        })
    }

    /// Time a trial batch and size the first batch to last about `min_time`.
    pub fn initial_iterations(&mut self) -> Result<u64, EngineError> {
        let trial = self.clock(CALIBRATION_ITERATIONS, false)?;
        let duration_per_op = trial.duration_per_op();
        debug!(
            benchmark = self.name,
            "Duration per operation on initial count: {}",
            Timer::format(duration_per_op)
        );

        self.exceeds_max_time = duration_per_op / Timer::SCALE >= self.options.max_time;
        if self.exceeds_max_time {
            warn!(
                "The benchmark \"{}\" has a duration per operation greater than max_time",
                self.name
            );
        }

        Ok(iterations_for_op_duration(
            duration_per_op,
            self.options.min_time,
        ))
    }

    /// Whether calibration found a single operation to outlast `max_time`.
    ///
    /// Measurement still proceeds, one operation per round.
    pub fn exceeds_max_time(&self) -> bool {
        self.exceeds_max_time
    }

    /// Run unrecorded rounds within `max_time` seconds.
    pub fn run_warmup(
        &mut self,
        initial_iterations: u64,
        min_time: f64,
        max_time: f64,
    ) -> Result<(), EngineError> {
        let max_duration = max_time * Timer::SCALE;
        let mut count = initial_iterations;
        let mut time_spent = 0.0;
        let mut samples = 0u32;

        while time_spent < max_duration || samples <= WARMUP_MIN_SAMPLES {
            let round = self.clock(count, false)?;
            time_spent += round.duration_ns;
            samples += 1;

            let window = ((max_duration - time_spent) / Timer::SCALE)
                .min(min_time)
                .max(0.0);
            count = iterations_for_op_duration(round.duration_per_op(), window);
        }

        debug!(benchmark = self.name, samples, "Warm-up complete");
        Ok(())
    }

    /// One repetition of the sampling loop. Returns `(iterations, ns spent)`.
    fn run_once(
        &mut self,
        histogram: &mut StatisticalHistogram,
        initial_iterations: u64,
        mode: BenchmarkMode,
        min_samples: u32,
    ) -> Result<(u64, f64), EngineError> {
        if mode == BenchmarkMode::Time {
            let round = self.clock(1, true)?;
            histogram.record(round.duration_ns)?;
            return Ok((round.iterations, round.duration_ns));
        }

        let max_duration = self.options.max_time * Timer::SCALE;
        let mut count = initial_iterations;
        let mut iterations = 0u64;
        let mut time_spent = 0.0;
        let mut samples = 0u32;

        // The floor counts samples that outlive the IQR filter
        while time_spent < max_duration
            || samples < min_samples
            || histogram.retained_len() < min_samples as usize
        {
            let round = self.clock(count, true)?;
            time_spent += round.duration_ns;
            iterations = iterations
                .saturating_add(round.iterations)
                .min(MAX_SAFE_INTEGER);

            let duration_per_op = round.duration_per_op();
            histogram.record(duration_per_op)?;
            samples += 1;

            let window = ((max_duration - time_spent) / Timer::SCALE)
                .min(self.options.min_time)
                .max(0.0);
            count = iterations_for_op_duration(duration_per_op, window);
        }

        Ok((iterations, time_spent))
    }

    /// Run every repetition and aggregate them into one result.
    ///
    /// Each repetition starts again from `initial_iterations`.
    pub fn run_benchmark(
        &mut self,
        initial_iterations: u64,
        mode: BenchmarkMode,
    ) -> Result<BenchmarkResult, EngineError> {
        let repeat_suite = self.options.repeat_suite.max(1);
        let min_samples = self.options.min_samples;
        debug!(
            benchmark = self.name,
            %mode,
            min_time = self.options.min_time,
            max_time = self.options.max_time,
            repeat_suite,
            min_samples,
            "Starting benchmark"
        );

        self.pipeline.reset();
        let mut histogram = StatisticalHistogram::new();
        let mut total_iterations = 0u64;
        let mut total_time = 0.0;
        let mut ops_sec_per_run = Vec::with_capacity(repeat_suite as usize);

        for _ in 0..repeat_suite {
            let (iterations, time_spent) =
                self.run_once(&mut histogram, initial_iterations, mode, min_samples)?;
            ops_sec_per_run.push(iterations as f64 / (time_spent / Timer::SCALE));
            total_iterations = total_iterations
                .saturating_add(iterations)
                .min(MAX_SAFE_INTEGER);
            total_time += time_spent;
        }

        let measurement = match mode {
            BenchmarkMode::Ops => {
                histogram.finish();
                let ops_sec = total_iterations as f64 / (total_time / Timer::SCALE);
                debug!(
                    benchmark = self.name,
                    "Completed {} samples with {:.2} ops/sec",
                    histogram.len(),
                    ops_sec
                );
                Measurement::Throughput {
                    ops_sec,
                    ops_sec_per_run,
                }
            }
            BenchmarkMode::Time => {
                histogram.finish_without_outlier_removal();
                let total_time_secs = total_time / Timer::SCALE / repeat_suite as f64;
                debug!(
                    benchmark = self.name,
                    "Completed {} repeats with average time {:.6} seconds",
                    repeat_suite,
                    total_time_secs
                );
                Measurement::Latency { total_time_secs }
            }
        };

        self.pipeline.on_complete_benchmark(self.name);

        Ok(BenchmarkResult {
            name: self.name.to_string(),
            iterations: total_iterations,
            measurement,
            histogram: histogram.summary(),
            plugins: self.pipeline.results(),
            baseline: self.options.baseline,
        })
    }
}

/// Calibrate and measure one definition against `registry`, without warm-up.
///
/// This is everything an isolated worker does per request.
pub fn run_definition(
    registry: &BenchmarkRegistry,
    definition: &BenchmarkDefinition,
    mode: BenchmarkMode,
    pipeline: &mut Pipeline,
) -> Result<BenchmarkResult, EngineError> {
    definition.options.validate()?;
    let work = registry
        .get(&definition.name)
        .ok_or_else(|| calibench_core::UsageError::UnknownBenchmark(definition.name.clone()))?;

    let mut engine = Engine::new(&definition.name, work, &definition.options, pipeline);
    let initial_iterations = engine.initial_iterations()?;
    engine.run_benchmark(initial_iterations, mode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use calibench_core::UsageError;

    use crate::instrument::{Capabilities, Instrument};

    fn quick_options() -> BenchmarkOptions {
        BenchmarkOptions {
            min_time: 0.001,
            max_time: 0.005,
            repeat_suite: 1,
            min_samples: 5,
            baseline: false,
        }
    }

    fn unmanaged<F: Fn() + Send + Sync + 'static>(f: F) -> WorkFn {
        WorkFn::Unmanaged(Box::new(move |count| {
            for _ in 0..count {
                f();
            }
        }))
    }

    #[test]
    fn test_iterations_for_op_duration() {
        // 1us per op for 1ms is 1000 ops
        assert_eq!(iterations_for_op_duration(1_000.0, 0.001), 1_000);
        assert_eq!(iterations_for_op_duration(1e9, 0.0), 1);
        assert_eq!(iterations_for_op_duration(1e9, 0.1), 1);
        assert_eq!(iterations_for_op_duration(MIN_RESOLUTION, 1e9), MAX_SAFE_INTEGER);
    }

    #[test]
    fn test_iterations_monotone_in_target() {
        let mut previous = 0;
        for step in 0..50 {
            let target = step as f64 * 0.01;
            let iterations = iterations_for_op_duration(37.0, target);
            assert!(iterations >= 1);
            assert!(iterations >= previous);
            previous = iterations;
        }
    }

    #[test]
    fn test_clocked_floor() {
        let round = Clocked {
            duration_ns: 0.0,
            iterations: 10,
        };
        assert_eq!(round.duration_per_op(), MIN_RESOLUTION);
    }

    #[test]
    fn test_trivial_work_terminates() {
        let work = unmanaged(|| {});
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("noop", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        assert!(initial >= 1);

        let result = engine.run_benchmark(initial, BenchmarkMode::Ops).unwrap();
        assert!(result.histogram.samples >= 1);
        assert!(result.histogram.min >= MIN_RESOLUTION);
        assert!(result.ops_sec().unwrap().is_finite());
        assert!(result.iterations >= initial);
    }

    #[test]
    fn test_slow_operation_is_not_fatal() {
        let work = unmanaged(|| std::thread::sleep(Duration::from_millis(2)));
        let options = BenchmarkOptions {
            min_time: 0.0005,
            max_time: 0.001,
            min_samples: 2,
            ..quick_options()
        };
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("slow", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        assert!(engine.exceeds_max_time());
        assert_eq!(initial, 1);

        let result = engine.run_benchmark(initial, BenchmarkMode::Ops).unwrap();
        assert!(result.histogram.samples >= 2);
        assert!(result.ops_sec().unwrap() < 500.0);
    }

    #[test]
    fn test_fast_operation_fits_max_time() {
        let work = unmanaged(|| {
            std::hint::black_box(1u64 + 1);
        });
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("fast", &work, &options, &mut pipeline);

        engine.initial_iterations().unwrap();
        assert!(!engine.exceeds_max_time());
    }

    #[test]
    fn test_min_samples_respected() {
        let work = unmanaged(|| std::thread::sleep(Duration::from_micros(50)));
        let options = BenchmarkOptions {
            min_samples: 12,
            ..quick_options()
        };
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("sleep", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        let result = engine.run_benchmark(initial, BenchmarkMode::Ops).unwrap();

        // Holds after outlier removal too
        assert!(result.histogram.samples >= 12);
        assert_eq!(result.ops_sec_per_run().len(), 1);
    }

    #[test]
    fn test_repetitions_collect_per_run_throughput() {
        let work = unmanaged(|| {
            std::hint::black_box((0..64u64).sum::<u64>());
        });
        let options = BenchmarkOptions {
            repeat_suite: 4,
            ..quick_options()
        };
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("sum", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        let result = engine.run_benchmark(initial, BenchmarkMode::Ops).unwrap();

        let per_run = result.ops_sec_per_run();
        assert_eq!(per_run.len(), 4);
        assert!(per_run.iter().all(|ops| *ops > 0.0 && ops.is_finite()));
    }

    #[test]
    fn test_time_mode_runs_once_per_repetition() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        let work = unmanaged(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        let options = BenchmarkOptions {
            repeat_suite: 3,
            ..quick_options()
        };
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("once", &work, &options, &mut pipeline);

        let result = engine.run_benchmark(1, BenchmarkMode::Time).unwrap();

        assert_eq!(calls.load(Ordering::Relaxed), 3);
        assert_eq!(result.iterations, 3);
        assert_eq!(result.histogram.samples, 3);
        assert!(result.total_time_secs().unwrap() > 0.0);
        assert!(result.ops_sec_per_run().is_empty());
    }

    #[test]
    fn test_managed_work() {
        let work = WorkFn::Managed(Box::new(|timer: &mut ManagedTimer| {
            let data: Vec<u64> = (0..32).collect();
            timer.start();
            for _ in 0..timer.count() {
                std::hint::black_box(data.iter().sum::<u64>());
            }
            timer.end(timer.count());
        }));
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("managed", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        let result = engine.run_benchmark(initial, BenchmarkMode::Ops).unwrap();
        assert!(result.ops_sec().unwrap() > 0.0);
    }

    #[test]
    fn test_managed_misuse_is_usage_error() {
        let work = WorkFn::Managed(Box::new(|timer: &mut ManagedTimer| {
            timer.start();
        }));
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("forgetful", &work, &options, &mut pipeline);

        let err = engine.initial_iterations().unwrap_err();
        assert_eq!(
            err,
            EngineError::Usage(UsageError::TimerMisuse(
                "You forgot to call end(count)".to_string()
            ))
        );
        assert!(err.is_usage());
    }

    #[test]
    fn test_panicking_work_fails() {
        let work = unmanaged(|| panic!("boom"));
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("boom", &work, &options, &mut pipeline);

        let err = engine.initial_iterations().unwrap_err();
        assert_eq!(
            err,
            EngineError::WorkFailed {
                name: "boom".to_string(),
                message: "boom".to_string(),
            }
        );
    }

    #[test]
    fn test_async_work() {
        let mut registry = BenchmarkRegistry::new();
        registry.register_async("yield", || async {
            tokio::task::yield_now().await;
        });
        let definition = BenchmarkDefinition::new("yield", quick_options()).unwrap();

        let result = run_definition(
            &registry,
            &definition,
            BenchmarkMode::Ops,
            &mut Pipeline::default(),
        )
        .unwrap();
        assert!(result.ops_sec().unwrap() > 0.0);
    }

    #[test]
    fn test_warmup_runs_minimum_rounds() {
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);
        // Ignores the requested count, so every round lasts about 1ms
        let work = WorkFn::Unmanaged(Box::new(move |_count| {
            counter.fetch_add(1, Ordering::Relaxed);
            std::thread::sleep(Duration::from_millis(1));
        }));
        let options = quick_options();
        let mut pipeline = Pipeline::default();
        let mut engine = Engine::new("warm", &work, &options, &mut pipeline);

        // No time budget, so only the round floor applies
        engine.run_warmup(1, WARMUP_MIN_TIME, 0.0).unwrap();
        assert_eq!(
            calls.load(Ordering::Relaxed),
            WARMUP_MIN_SAMPLES as u64 + 1
        );
    }

    #[test]
    fn test_unknown_definition() {
        let registry = BenchmarkRegistry::new();
        let definition = BenchmarkDefinition::new("ghost", quick_options()).unwrap();
        let err = run_definition(
            &registry,
            &definition,
            BenchmarkMode::Ops,
            &mut Pipeline::default(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EngineError::Usage(UsageError::UnknownBenchmark("ghost".to_string()))
        );
    }

    /// Counts measured rounds and doubles each reported duration.
    struct Doubler {
        rounds: Arc<AtomicU64>,
    }

    impl Instrument for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities::NONE.with_on_complete_clock()
        }

        fn on_complete_clock(&mut self, sample: &mut ClockSample) {
            self.rounds.fetch_add(1, Ordering::Relaxed);
            sample.duration_ns *= 2.0;
        }
    }

    #[test]
    fn test_instruments_only_see_measured_rounds() {
        let rounds = Arc::new(AtomicU64::new(0));
        let mut pipeline = Pipeline::new(vec![Box::new(Doubler {
            rounds: Arc::clone(&rounds),
        })])
        .unwrap();

        let work = unmanaged(|| std::thread::sleep(Duration::from_micros(20)));
        let options = quick_options();
        let mut engine = Engine::new("doubled", &work, &options, &mut pipeline);

        let initial = engine.initial_iterations().unwrap();
        assert_eq!(rounds.load(Ordering::Relaxed), 0);

        let result = engine.run_benchmark(initial, BenchmarkMode::Time).unwrap();
        assert_eq!(rounds.load(Ordering::Relaxed), 1);
        // Transformed durations feed the histogram
        assert!(result.histogram.min >= 40_000.0);
        assert_eq!(result.plugins.len(), 1);
        assert_eq!(result.plugins[0].name, "doubler");
    }
}
