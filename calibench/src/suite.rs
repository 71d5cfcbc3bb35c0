//! The benchmark suite: runs every added benchmark and reports once.
//!
//! Per benchmark the suite calibrates a starting iteration count, runs the
//! sampling repetitions and collects one result. Before any measurement,
//! every benchmark is warmed up and, when requested, a no-op baseline is
//! measured for elimination detection. With isolation enabled each
//! benchmark is calibrated and measured in its own worker process instead.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use calibench_core::definition::{
    DEFAULT_MAX_TIME, DEFAULT_MIN_SAMPLES, DEFAULT_MIN_TIME, DEFAULT_REPEAT_SUITE,
    MIN_REPEAT_FOR_TTEST,
};
use calibench_core::stats::compare_benchmarks;
use calibench_core::{
    BaselineComparison, BenchmarkDefinition, BenchmarkMode, BenchmarkOptions, IsolationFailure,
    ReportError, Reporter, RunSummary, TerminalReporter, UsageError,
};
use calibench_harness::{
    instrument_by_name, BenchmarkRegistry, EliminationDetector, Engine, EngineError, Instrument,
    Pipeline, DEFAULT_THRESHOLD, WARMUP_MAX_TIME, WARMUP_MIN_TIME,
};

use crate::config::Config;
use crate::dispatcher::{Dispatcher, IsolatedRun, IsolationError};

/// Errors that abort a whole run.
#[derive(Debug, Error)]
pub enum SuiteError {
    #[error(transparent)]
    Usage(#[from] UsageError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Isolation(#[from] IsolationError),

    #[error("Failed to report results: {0}")]
    Report(#[from] ReportError),

    #[error("Failed to start isolation runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

/// Worker process settings.
#[derive(Debug, Clone, PartialEq)]
pub struct IsolationOptions {
    pub base_port: u16,
    pub ready_timeout: Duration,
}

impl Default for IsolationOptions {
    fn default() -> Self {
        Self {
            base_port: 9200,
            ready_timeout: Duration::from_secs(30),
        }
    }
}

/// Run-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SuiteOptions {
    pub mode: BenchmarkMode,
    /// Defaults for benchmarks added without explicit options.
    pub min_time: f64,
    pub max_time: f64,
    pub min_samples: u32,
    /// Falls back to 1, or 30 when `ttest` is on.
    pub repeat_suite: Option<u32>,
    pub warmup: bool,
    pub ttest: bool,
    pub alpha: f64,
    /// Instruments resolved by name for every benchmark.
    pub instruments: Vec<String>,
    /// Run each benchmark in a worker process when set.
    pub isolation: Option<IsolationOptions>,
    pub detect_elimination: bool,
    pub elimination_threshold: f64,
}

impl Default for SuiteOptions {
    fn default() -> Self {
        Self {
            mode: BenchmarkMode::Ops,
            min_time: DEFAULT_MIN_TIME,
            max_time: DEFAULT_MAX_TIME,
            min_samples: DEFAULT_MIN_SAMPLES,
            repeat_suite: None,
            warmup: true,
            ttest: false,
            alpha: 0.05,
            instruments: Vec::new(),
            isolation: None,
            detect_elimination: false,
            elimination_threshold: DEFAULT_THRESHOLD,
        }
    }
}

impl SuiteOptions {
    /// Translate a loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        let isolation = config.isolation.enabled.then(|| IsolationOptions {
            base_port: config.isolation.base_port,
            ready_timeout: Duration::from_millis(config.isolation.ready_timeout_ms),
        });

        Self {
            mode: config.suite.mode,
            min_time: config.suite.min_time,
            max_time: config.suite.max_time,
            min_samples: config.suite.min_samples,
            repeat_suite: config.suite.repeat_suite,
            warmup: config.suite.warmup,
            ttest: config.suite.ttest,
            alpha: config.suite.alpha,
            instruments: config.suite.instruments.clone(),
            isolation,
            detect_elimination: config.elimination.enabled,
            elimination_threshold: config.elimination.threshold,
        }
    }

    /// Options given to benchmarks added with [`Suite::add`].
    pub fn benchmark_options(&self) -> BenchmarkOptions {
        let repeat_suite = match self.repeat_suite {
            Some(repeat) => repeat,
            None if self.ttest => MIN_REPEAT_FOR_TTEST,
            None => DEFAULT_REPEAT_SUITE,
        };
        BenchmarkOptions {
            min_time: self.min_time,
            max_time: self.max_time,
            repeat_suite,
            min_samples: self.min_samples,
            baseline: false,
        }
    }

    fn validate(&self) -> Result<(), UsageError> {
        if !(self.alpha > 0.0 && self.alpha < 1.0) {
            return Err(UsageError::option(
                "alpha",
                format!("must be between 0 and 1 (exclusive), got {}", self.alpha),
            ));
        }
        EliminationDetector::new(self.elimination_threshold)?;
        self.benchmark_options().validate()
    }
}

/// An ordered set of benchmark definitions and how to run them.
pub struct Suite {
    registry: Arc<BenchmarkRegistry>,
    options: SuiteOptions,
    definitions: Vec<BenchmarkDefinition>,
    pipeline: Pipeline,
    reporter: Box<dyn Reporter>,
}

impl std::fmt::Debug for Suite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suite")
            .field("options", &self.options)
            .field("definitions", &self.definitions)
            .field("pipeline", &self.pipeline)
            .finish()
    }
}

impl Suite {
    /// Create an empty suite over `registry`.
    ///
    /// # Errors
    ///
    /// Rejects out-of-range options and unknown, unsupported or repeated
    /// instrument names.
    pub fn new(
        registry: impl Into<Arc<BenchmarkRegistry>>,
        options: SuiteOptions,
    ) -> Result<Self, SuiteError> {
        options.validate()?;
        let instruments = options
            .instruments
            .iter()
            .map(|name| instrument_by_name(name))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            registry: registry.into(),
            pipeline: Pipeline::new(instruments)?,
            options,
            definitions: Vec::new(),
            reporter: Box::new(TerminalReporter::new()),
        })
    }

    /// Create a suite from configuration, adding every registered benchmark
    /// accepted by `filter`.
    ///
    /// The benchmark named by `suite.baseline` is marked as baseline.
    pub fn from_config(
        registry: impl Into<Arc<BenchmarkRegistry>>,
        config: &Config,
        filter: impl Fn(&str) -> bool,
    ) -> Result<Self, SuiteError> {
        let mut suite = Self::new(registry, SuiteOptions::from_config(config))?;
        let baseline = config.suite.baseline.as_deref();

        if let Some(name) = baseline {
            if !suite.registry.contains(name) {
                return Err(UsageError::UnknownBenchmark(name.to_string()).into());
            }
        }

        let names = suite.registry.list();
        for name in names.iter().filter(|name| filter(name)) {
            let mut options = suite.options.benchmark_options();
            options.baseline = baseline == Some(name.as_str());
            suite.add_with(name, options)?;
        }
        Ok(suite)
    }

    /// Replace the instruments given by name with `instruments`.
    ///
    /// With isolation, workers resolve instruments by name, so instruments
    /// that [`instrument_by_name`] does not know fail there.
    pub fn with_instruments(
        mut self,
        instruments: Vec<Box<dyn Instrument>>,
    ) -> Result<Self, SuiteError> {
        self.pipeline = Pipeline::new(instruments)?;
        Ok(self)
    }

    /// Send the run summary to `reporter` instead of the terminal.
    pub fn with_reporter(mut self, reporter: impl Reporter + 'static) -> Self {
        self.reporter = Box::new(reporter);
        self
    }

    pub fn options(&self) -> &SuiteOptions {
        &self.options
    }

    pub fn definitions(&self) -> &[BenchmarkDefinition] {
        &self.definitions
    }

    /// Add a registered benchmark with the suite's default options.
    pub fn add(&mut self, name: &str) -> Result<&mut Self, SuiteError> {
        let options = self.options.benchmark_options();
        self.add_with(name, options)
    }

    /// Add a registered benchmark with its own options.
    ///
    /// # Errors
    ///
    /// Fails for names missing from the registry, invalid options, or a
    /// second baseline.
    pub fn add_with(
        &mut self,
        name: &str,
        options: BenchmarkOptions,
    ) -> Result<&mut Self, SuiteError> {
        if !self.registry.contains(name) {
            return Err(UsageError::UnknownBenchmark(name.to_string()).into());
        }
        if options.baseline {
            if let Some(existing) = self.definitions.iter().find(|d| d.is_baseline()) {
                return Err(UsageError::DuplicateBaseline(existing.name.clone()).into());
            }
        }
        if self.options.ttest && options.repeat_suite < MIN_REPEAT_FOR_TTEST {
            warn!(
                "Benchmark \"{}\" runs {} repetitions; the t-test needs {} for reliable results",
                name, options.repeat_suite, MIN_REPEAT_FOR_TTEST
            );
        }

        self.definitions
            .push(BenchmarkDefinition::new(name, options)?);
        Ok(self)
    }

    /// Run every benchmark and hand the summary to the reporter.
    ///
    /// Results keep the order benchmarks were added in. A failing worker
    /// only drops its own benchmark; a failing work function aborts the
    /// run.
    ///
    /// Must not be called from within an async runtime.
    pub fn run(&mut self) -> Result<RunSummary, SuiteError> {
        let mut detector = if self.options.detect_elimination {
            Some(EliminationDetector::new(self.options.elimination_threshold)?)
        } else {
            None
        };

        let summary = if let Some(isolation) = self.options.isolation.clone() {
            self.run_isolated(&isolation, detector.as_mut())?
        } else {
            self.run_in_process(detector.as_mut())?
        };

        let mut summary = summary;
        if let Some(detector) = detector {
            summary.warnings = detector.into_warnings();
        }
        if self.options.ttest {
            summary.comparisons = compare_with_baseline(&summary, self.options.alpha);
        }

        self.reporter.report(&summary)?;
        Ok(summary)
    }

    fn run_in_process(
        &mut self,
        mut detector: Option<&mut EliminationDetector>,
    ) -> Result<RunSummary, SuiteError> {
        if let Some(detector) = detector.as_deref_mut() {
            if self.options.mode == BenchmarkMode::Ops {
                detector.measure_baseline()?;
            }
        }

        if self.options.warmup {
            self.warm_up()?;
        }

        let mut summary = RunSummary::default();
        for definition in &self.definitions {
            let work = self
                .registry
                .get(&definition.name)
                .ok_or_else(|| UsageError::UnknownBenchmark(definition.name.clone()))?;

            let mut engine = Engine::new(
                &definition.name,
                work,
                &definition.options,
                &mut self.pipeline,
            );
            let initial_iterations = engine.initial_iterations()?;
            let result = engine.run_benchmark(initial_iterations, self.options.mode)?;
            info!(benchmark = %result.name, iterations = result.iterations, "Finished");

            if let Some(detector) = detector.as_deref_mut() {
                detector.observe(&result);
            }
            summary.results.push(result);
        }
        Ok(summary)
    }

    /// Unrecorded rounds for every benchmark before any is measured.
    fn warm_up(&mut self) -> Result<(), SuiteError> {
        for definition in &self.definitions {
            let work = self
                .registry
                .get(&definition.name)
                .ok_or_else(|| UsageError::UnknownBenchmark(definition.name.clone()))?;

            debug!(benchmark = %definition.name, "Warming up");
            let mut engine = Engine::new(
                &definition.name,
                work,
                &definition.options,
                &mut self.pipeline,
            );
            let initial_iterations = engine.initial_iterations()?;
            engine.run_warmup(initial_iterations, WARMUP_MIN_TIME, WARMUP_MAX_TIME)?;
        }
        Ok(())
    }

    fn run_isolated(
        &mut self,
        isolation: &IsolationOptions,
        mut detector: Option<&mut EliminationDetector>,
    ) -> Result<RunSummary, SuiteError> {
        let dispatcher = Dispatcher::for_current_exe(
            isolation.base_port,
            isolation.ready_timeout,
            self.options.mode,
            self.pipeline.names(),
        )?;
        let runtime = tokio::runtime::Runtime::new().map_err(SuiteError::Runtime)?;

        let mut summary = RunSummary::default();
        for (index, definition) in self.definitions.iter().enumerate() {
            let run = runtime.block_on(dispatcher.dispatch(index, definition));
            record_isolated(&mut summary, detector.as_deref_mut(), run)?;
        }
        Ok(summary)
    }
}

/// Fold one isolated run into `summary`.
///
/// Worker and transport failures drop only this benchmark. A failed work
/// function aborts the run, as it does in process.
fn record_isolated(
    summary: &mut RunSummary,
    detector: Option<&mut EliminationDetector>,
    run: IsolatedRun,
) -> Result<(), SuiteError> {
    let name = run.name().to_string();
    match run.into_outcome() {
        Some(Ok(result)) => {
            info!(benchmark = %result.name, iterations = result.iterations, "Finished");
            if let Some(detector) = detector {
                detector.observe(&result);
            }
            summary.results.push(result);
        }
        Some(Err(IsolationError::WorkFailed { name, message })) => {
            return Err(EngineError::WorkFailed { name, message }.into());
        }
        Some(Err(e)) => {
            warn!("Benchmark \"{}\" failed in isolation: {}", name, e);
            summary.failures.push(IsolationFailure {
                name,
                error: e.to_string(),
            });
        }
        None => {
            summary.failures.push(IsolationFailure {
                name,
                error: "worker did not finish".to_string(),
            });
        }
    }
    Ok(())
}

/// Welch comparisons of each throughput result against the baseline.
fn compare_with_baseline(summary: &RunSummary, alpha: f64) -> Vec<BaselineComparison> {
    let Some(baseline) = summary.baseline() else {
        return Vec::new();
    };

    summary
        .results
        .iter()
        .filter(|result| !result.baseline)
        .filter(|result| result.ops_sec().is_some())
        .map(|result| BaselineComparison {
            name: result.name.clone(),
            baseline: baseline.name.clone(),
            comparison: compare_benchmarks(
                result.ops_sec_per_run(),
                baseline.ops_sec_per_run(),
                alpha,
            ),
        })
        .collect()
}
