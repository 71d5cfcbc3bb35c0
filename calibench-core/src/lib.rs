//! Core types and utilities for calibench.
//!
//! This crate provides the measurement primitives shared by the
//! calibench-harness runtime and the calibench runner: the clock, the
//! outlier-filtering histogram, the Welch comparator, the wire protocol
//! spoken with isolated workers, and the terminal reporter.

pub mod clock;
pub mod definition;
pub mod error;
pub mod histogram;
pub mod protocol;
pub mod report;
pub mod result;
pub mod stats;

// Re-export main types for convenience
pub use clock::{ManagedTimer, Timer, MAX_SAFE_INTEGER, MIN_RESOLUTION};
pub use definition::{BenchmarkDefinition, BenchmarkMode, BenchmarkOptions};
pub use error::UsageError;
pub use histogram::{HistogramSummary, StatisticalHistogram};
pub use protocol::{
    BenchmarkListResponse, FailureKind, HealthResponse, RunBenchmarkRequest,
    RunBenchmarkResponse, RunFailure, ShutdownResponse, WORKER_PORT_ENV,
};
pub use report::{
    BaselineComparison, IsolationFailure, RelativeSpeed, ReportError, Reporter, RunSummary,
    Standing, TerminalReporter,
};
pub use result::{BenchmarkResult, EliminationWarning, Measurement, PluginResult};
pub use stats::{ComparisonResult, StatisticalTest, TTestResult, Verdict, WelchTTest};
