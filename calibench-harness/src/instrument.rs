//! Instrumentation hooks around the timed region.
//!
//! Every measured round runs as
//!
//! ```text
//! before_clock (pipeline order) -> start clock -> work -> stop clock
//!   -> after_clock (reverse order) -> on_complete_clock (pipeline order)
//! ```
//!
//! so instruments never execute inside the measured interval. Calibration
//! and warm-up rounds are not instrumented.

use std::collections::{BTreeMap, HashSet};

use calibench_core::{PluginResult, UsageError};

/// Hooks an instrument takes part in.
///
/// Declared up front by each instrument and checked when the pipeline is
/// built; undeclared hooks are never called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub before_clock: bool,
    pub after_clock: bool,
    pub on_complete_clock: bool,
    pub on_complete_benchmark: bool,
    pub report: bool,
    pub result: bool,
    pub reset: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        before_clock: false,
        after_clock: false,
        on_complete_clock: false,
        on_complete_benchmark: false,
        report: false,
        result: false,
        reset: false,
    };

    pub const fn with_clock_hooks(mut self) -> Self {
        self.before_clock = true;
        self.after_clock = true;
        self
    }

    pub const fn with_on_complete_clock(mut self) -> Self {
        self.on_complete_clock = true;
        self
    }

    pub const fn with_on_complete_benchmark(mut self) -> Self {
        self.on_complete_benchmark = true;
        self
    }

    pub const fn with_report(mut self) -> Self {
        self.report = true;
        self
    }

    pub const fn with_result(mut self) -> Self {
        self.result = true;
        self
    }

    pub const fn with_reset(mut self) -> Self {
        self.reset = true;
        self
    }
}

/// Per-round scratch space shared by the instruments of one round.
#[derive(Debug, Clone, Default)]
pub struct ClockContext {
    managed: bool,
    values: BTreeMap<&'static str, f64>,
}

impl ClockContext {
    /// Context for a round of a managed (`true`) or unmanaged benchmark.
    pub fn new(managed: bool) -> Self {
        Self {
            managed,
            values: BTreeMap::new(),
        }
    }

    /// Whether the work function drives its own timer this round.
    pub fn is_managed(&self) -> bool {
        self.managed
    }

    pub fn insert(&mut self, key: &'static str, value: f64) {
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.values.get(key).copied()
    }
}

/// Outcome of one measured round, open to observation and adjustment.
#[derive(Debug, Clone)]
pub struct ClockSample {
    /// Nanoseconds spent in the timed region.
    pub duration_ns: f64,
    pub iterations: u64,
    pub context: ClockContext,
}

/// A unit of instrumentation attached to benchmark rounds.
///
/// All hooks default to no-ops; [`Instrument::capabilities`] tells the
/// pipeline which ones to call.
pub trait Instrument: Send {
    /// Identifier used in results and for lookup by name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> Capabilities;

    /// Whether the instrument can work in this process.
    fn is_supported(&self) -> bool {
        true
    }

    fn before_clock(&mut self, _ctx: &mut ClockContext) {}

    fn after_clock(&mut self, _ctx: &mut ClockContext) {}

    /// Observe, and possibly adjust, a finished round.
    fn on_complete_clock(&mut self, _sample: &mut ClockSample) {}

    /// Finalize cross-round accumulators once the benchmark is done.
    fn on_complete_benchmark(&mut self, _benchmark: &str) {}

    /// One-line fragment for human reports.
    fn report(&self) -> Option<String> {
        None
    }

    /// Structured payload for machine consumers.
    fn result(&self) -> serde_json::Value {
        serde_json::Value::String("enabled".to_string())
    }

    /// Clear accumulated state before the next benchmark.
    fn reset(&mut self) {}
}

/// Instruments in a fixed order, with hook dispatch lists computed once.
#[derive(Default)]
pub struct Pipeline {
    instruments: Vec<Box<dyn Instrument>>,
    before_clock: Vec<usize>,
    after_clock: Vec<usize>,
    on_complete_clock: Vec<usize>,
    on_complete_benchmark: Vec<usize>,
    reset: Vec<usize>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pipeline")
            .field("instruments", &self.names())
            .finish()
    }
}

impl Pipeline {
    /// Build a pipeline, rejecting unsupported or repeated instruments.
    pub fn new(instruments: Vec<Box<dyn Instrument>>) -> Result<Self, UsageError> {
        let mut seen = HashSet::new();
        let mut pipeline = Pipeline::default();

        for (idx, instrument) in instruments.iter().enumerate() {
            let name = instrument.name();
            if !seen.insert(name.to_string()) {
                return Err(UsageError::DuplicateInstrument(name.to_string()));
            }
            if !instrument.is_supported() {
                return Err(UsageError::UnsupportedInstrument(name.to_string()));
            }

            let caps = instrument.capabilities();
            if caps.before_clock {
                pipeline.before_clock.push(idx);
            }
            if caps.after_clock {
                pipeline.after_clock.push(idx);
            }
            if caps.on_complete_clock {
                pipeline.on_complete_clock.push(idx);
            }
            if caps.on_complete_benchmark {
                pipeline.on_complete_benchmark.push(idx);
            }
            if caps.reset {
                pipeline.reset.push(idx);
            }
        }
        pipeline.after_clock.reverse();
        pipeline.instruments = instruments;
        Ok(pipeline)
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Instrument names in pipeline order.
    pub fn names(&self) -> Vec<String> {
        self.instruments.iter().map(|i| i.name().to_string()).collect()
    }

    pub fn reset(&mut self) {
        for &idx in &self.reset {
            self.instruments[idx].reset();
        }
    }

    pub fn before_clock(&mut self, ctx: &mut ClockContext) {
        for &idx in &self.before_clock {
            self.instruments[idx].before_clock(ctx);
        }
    }

    pub fn after_clock(&mut self, ctx: &mut ClockContext) {
        for &idx in &self.after_clock {
            self.instruments[idx].after_clock(ctx);
        }
    }

    pub fn on_complete_clock(&mut self, sample: &mut ClockSample) {
        for &idx in &self.on_complete_clock {
            self.instruments[idx].on_complete_clock(sample);
        }
    }

    pub fn on_complete_benchmark(&mut self, benchmark: &str) {
        for &idx in &self.on_complete_benchmark {
            self.instruments[idx].on_complete_benchmark(benchmark);
        }
    }

    /// One entry per instrument, in pipeline order.
    pub fn results(&self) -> Vec<PluginResult> {
        self.instruments
            .iter()
            .map(|instrument| {
                let caps = instrument.capabilities();
                PluginResult {
                    name: instrument.name().to_string(),
                    report: if caps.report {
                        instrument.report()
                    } else {
                        None
                    },
                    result: if caps.result {
                        instrument.result()
                    } else {
                        serde_json::Value::String("enabled".to_string())
                    },
                }
            })
            .collect()
    }
}
