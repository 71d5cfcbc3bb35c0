//! calibench: adaptive micro-benchmarks
//!
//! A bench binary registers its work functions in a [`BenchmarkRegistry`]
//! and hands it to [`run_main`]. Each benchmark is calibrated to a stable
//! iteration count, sampled until its time budget and sample floor are met,
//! stripped of outliers and reported as throughput or latency, optionally
//! compared against a baseline with Welch's t-test.
//!
//! ```no_run
//! use calibench::{run_main, BenchmarkRegistry};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut registry = BenchmarkRegistry::new();
//!     registry.register("sum", || (0..1000u64).sum::<u64>());
//!     run_main(registry)
//! }
//! ```

pub mod cli;
pub mod config;
pub mod dispatcher;
pub mod suite;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

// Re-export core types for convenience
pub use calibench_core::protocol;
pub use calibench_core::report::{
    BaselineComparison, IsolationFailure, ReportError, Reporter, RunSummary, TerminalReporter,
};
pub use calibench_core::stats::{ComparisonResult, StatisticalTest, Verdict, WelchTTest};
pub use calibench_core::{
    BenchmarkDefinition, BenchmarkMode, BenchmarkOptions, BenchmarkResult, ManagedTimer,
    Measurement, UsageError,
};
pub use calibench_harness::{
    BenchmarkRegistry, CompilationControl, CompilationControlInstrument, EliminationDetector,
    EngineError, Instrument, MemoryInstrument, TrackingAllocator,
};

// Re-export main types from this crate
pub use cli::Cli;
pub use config::Config;
pub use dispatcher::{DispatchState, Dispatcher, IsolatedRun, IsolationError, WorkerHandle};
pub use suite::{IsolationOptions, Suite, SuiteError, SuiteOptions};

/// Entry point for bench binaries.
///
/// Serves as an isolated worker when relaunched by the dispatcher,
/// otherwise parses the command line and runs the suite.
pub fn run_main(registry: BenchmarkRegistry) -> anyhow::Result<()> {
    // Worker mode comes first; workers take no arguments
    if let Ok(port) = std::env::var(protocol::WORKER_PORT_ENV) {
        let port: u16 = port
            .parse()
            .with_context(|| format!("{} must be a valid port number", protocol::WORKER_PORT_ENV))?;
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("calibench=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
        return calibench_harness::run_worker(Arc::new(registry), port);
    }

    run_with_cli(registry, Cli::parse())
}

/// Run the suite with pre-parsed arguments.
pub fn run_with_cli(registry: BenchmarkRegistry, cli: Cli) -> anyhow::Result<()> {
    let filter = if cli.verbose {
        "calibench=debug"
    } else {
        "calibench=info"
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();

    if cli.list {
        for name in registry.list().iter().filter(|name| cli.matches(name)) {
            println!("{}", name);
        }
        return Ok(());
    }

    // Only an explicitly given config file has to exist
    let explicit = cli.config != Path::new(config::DEFAULT_CONFIG_FILE);
    let mut config = Config::load_from(explicit.then_some(cli.config.as_path()))?;
    cli.apply_to_config(&mut config);
    debug!("Configuration: {:?}", config);

    let reporter = if cli.no_color {
        TerminalReporter::without_colors()
    } else {
        TerminalReporter::new()
    };
    let mut suite =
        Suite::from_config(registry, &config, |name| cli.matches(name))?.with_reporter(reporter);
    suite.run().context("Benchmark run failed")?;
    Ok(())
}
