use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::clock::Timer;
use crate::result::{BenchmarkResult, EliminationWarning};
use crate::stats::ComparisonResult;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A candidate benchmark tested against the run's baseline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaselineComparison {
    pub name: String,
    pub baseline: String,
    pub comparison: ComparisonResult,
}

/// A benchmark that produced no result because its worker failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IsolationFailure {
    pub name: String,
    pub error: String,
}

/// Everything a run produced, handed to the reporter once at the end.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    /// One entry per successful benchmark, in registration order.
    pub results: Vec<BenchmarkResult>,
    pub comparisons: Vec<BaselineComparison>,
    pub failures: Vec<IsolationFailure>,
    pub warnings: Vec<EliminationWarning>,
}

/// Speed of a benchmark relative to the baseline, as a ratio >= 1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RelativeSpeed {
    Baseline,
    Faster(f64),
    Slower(f64),
}

/// Position of one result within the run.
#[derive(Debug, Clone, PartialEq)]
pub struct Standing {
    pub name: String,
    pub relative: Option<RelativeSpeed>,
    pub fastest: bool,
    pub slowest: bool,
}

impl RunSummary {
    /// The result flagged as baseline, if any.
    pub fn baseline(&self) -> Option<&BenchmarkResult> {
        self.results.iter().find(|r| r.baseline)
    }

    /// Relative speed of every result against the baseline.
    ///
    /// Rates are compared as operations per second in both modes. Results
    /// keep registration order; `relative` is `None` without a baseline.
    pub fn analyze(&self) -> Vec<Standing> {
        let rate = |r: &BenchmarkResult| Timer::SCALE / r.duration_per_op_ns();
        let baseline_rate = self.baseline().map(rate);

        let mut fastest: Option<(usize, f64)> = None;
        let mut slowest: Option<(usize, f64)> = None;
        for (idx, result) in self.results.iter().enumerate() {
            let hz = rate(result);
            match fastest {
                Some((_, max)) if hz <= max => {}
                _ => fastest = Some((idx, hz)),
            }
            match slowest {
                Some((_, min)) if hz >= min => {}
                _ => slowest = Some((idx, hz)),
            }
        }

        self.results
            .iter()
            .enumerate()
            .map(|(idx, result)| {
                let relative = baseline_rate.map(|base| {
                    let hz = rate(result);
                    if result.baseline {
                        RelativeSpeed::Baseline
                    } else if hz > base {
                        RelativeSpeed::Faster(hz / base)
                    } else {
                        RelativeSpeed::Slower(base / hz)
                    }
                });
                Standing {
                    name: result.name.clone(),
                    relative,
                    fastest: fastest.is_some_and(|(i, _)| i == idx),
                    slowest: slowest.is_some_and(|(i, _)| i == idx),
                }
            })
            .collect()
    }
}

pub trait Reporter: Send + Sync {
    fn report(&self, summary: &RunSummary) -> Result<(), ReportError>;
}

mod terminal;
pub use terminal::TerminalReporter;
