//! Measurement runtime for calibench.
//!
//! This crate holds everything that executes benchmark code: the registry
//! of named work functions, the calibration and sampling engine, the
//! instrumentation pipeline, the elimination-risk detector and the HTTP
//! worker that runs benchmarks in an isolated process.

mod elimination;
mod error;
mod instrument;
mod instruments;
mod lifecycle;
mod registry;
mod server;

pub use elimination::{EliminationDetector, DEFAULT_THRESHOLD};
pub use error::EngineError;
pub use instrument::{Capabilities, ClockContext, ClockSample, Instrument, Pipeline};
pub use instruments::{
    current_allocation, format_bytes, instrument_by_name, reset_allocation_counter,
    CompilationControl, CompilationControlInstrument, MemoryInstrument, TrackingAllocator,
};
pub use lifecycle::{
    iterations_for_op_duration, run_definition, Clocked, Engine, CALIBRATION_ITERATIONS,
    WARMUP_MAX_TIME, WARMUP_MIN_SAMPLES, WARMUP_MIN_TIME,
};
pub use registry::{AsyncFn, BatchFn, BenchmarkRegistry, ManagedFn, WorkFn};
pub use server::{run_worker, run_worker_async, serve_worker};
