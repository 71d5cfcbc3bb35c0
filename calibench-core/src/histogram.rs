//! Per-round sample accumulation with IQR outlier removal.

use serde::{Deserialize, Serialize};

use crate::clock::MAX_SAFE_INTEGER;
use crate::error::UsageError;

/// Accumulates per-round duration samples and derives statistics once.
///
/// Samples are appended with [`record`](Self::record) and finalized with
/// [`finish`](Self::finish). Finalization sorts the samples, drops outliers
/// outside `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` and computes the summary
/// statistics. Dropped samples are gone for good. Statistics read as zero
/// until the histogram is finished.
#[derive(Debug, Clone, Default)]
pub struct StatisticalHistogram {
    all: Vec<f64>,
    min: f64,
    max: f64,
    mean: f64,
    stddev: f64,
    cv: f64,
    finished: bool,
}

impl StatisticalHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a sample. Values must be finite and non-negative.
    pub fn record(&mut self, value: f64) -> Result<(), UsageError> {
        if self.finished {
            return Err(UsageError::HistogramFinished);
        }
        if !value.is_finite() || value < 0.0 {
            return Err(UsageError::InvalidSample(value));
        }
        self.all.push(value);
        Ok(())
    }

    /// Remove outliers and compute statistics. Calling it again is a no-op.
    pub fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.sort();
        self.remove_outliers();
        self.finalize();
    }

    /// Compute statistics over every recorded sample, keeping outliers.
    ///
    /// Used by latency mode, where each repetition yields exactly one sample.
    pub fn finish_without_outlier_removal(&mut self) {
        if self.finished {
            return;
        }
        self.sort();
        self.finalize();
    }

    fn sort(&mut self) {
        self.all.sort_by(|a, b| a.total_cmp(b));
    }

    fn finalize(&mut self) {
        self.finished = true;
        self.calculate_min_max();
        self.calculate_mean();
        self.calculate_stddev();
        self.calculate_cv();
    }

    fn remove_outliers(&mut self) {
        if let Some((min_value, max_value)) = iqr_bounds(&self.all) {
            self.all.retain(|&v| v >= min_value && v <= max_value);
        }
    }

    fn calculate_min_max(&mut self) {
        // Sorted by now
        self.min = self.all.first().copied().unwrap_or(0.0);
        self.max = self.all.last().copied().unwrap_or(0.0);
    }

    fn calculate_mean(&mut self) {
        self.mean = match self.all.len() {
            0 => 0.0,
            1 => self.all[0],
            n => {
                let cap = MAX_SAFE_INTEGER as f64;
                let sum = self.all.iter().fold(0.0, |acc, v| (acc + v).min(cap));
                sum / n as f64
            }
        };
    }

    fn calculate_stddev(&mut self) {
        let n = self.all.len();
        if n < 2 {
            self.stddev = 0.0;
            return;
        }
        let sum_sq: f64 = self.all.iter().map(|v| (v - self.mean).powi(2)).sum();
        self.stddev = (sum_sq / (n - 1) as f64).sqrt();
    }

    fn calculate_cv(&mut self) {
        if self.all.len() < 2 || self.mean == 0.0 {
            self.cv = 0.0;
            return;
        }
        self.cv = self.stddev / self.mean;
    }

    /// Value at percentile `p` of the sorted, outlier-free samples.
    pub fn percentile(&self, p: f64) -> Result<f64, UsageError> {
        if self.finished {
            return percentile_of_sorted(&self.all, p);
        }
        let mut sorted = self.all.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        percentile_of_sorted(&sorted, p)
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn stddev(&self) -> f64 {
        self.stddev
    }

    /// Coefficient of variation, `stddev / mean`.
    pub fn cv(&self) -> f64 {
        self.cv
    }

    /// Number of samples [`finish`](Self::finish) would keep.
    ///
    /// Equal to [`len`](Self::len) once finished.
    pub fn retained_len(&self) -> usize {
        if self.finished {
            return self.all.len();
        }
        let mut sorted = self.all.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        match iqr_bounds(&sorted) {
            Some((min_value, max_value)) => sorted
                .iter()
                .filter(|&&v| v >= min_value && v <= max_value)
                .count(),
            None => sorted.len(),
        }
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.all.len()
    }

    pub fn is_empty(&self) -> bool {
        self.all.is_empty()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Retained samples; sorted once finished.
    pub fn samples(&self) -> &[f64] {
        &self.all
    }

    /// Serializable snapshot of the derived statistics.
    pub fn summary(&self) -> HistogramSummary {
        HistogramSummary {
            samples: self.all.len(),
            min: self.min,
            max: self.max,
            mean: self.mean,
            stddev: self.stddev,
            cv: self.cv,
            sample_data: self.all.clone(),
        }
    }
}

/// Finalized histogram as carried in a benchmark result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSummary {
    /// Number of samples retained after outlier removal.
    pub samples: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub stddev: f64,
    pub cv: f64,
    /// Retained samples in ascending order.
    pub sample_data: Vec<f64>,
}

impl HistogramSummary {
    /// Value at percentile `p` of the retained samples.
    pub fn percentile(&self, p: f64) -> Result<f64, UsageError> {
        percentile_of_sorted(&self.sample_data, p)
    }
}

/// Tukey fences `[Q1 - 1.5*IQR, Q3 + 1.5*IQR]` of sorted samples.
///
/// `None` below 4 samples, where nothing is filtered.
fn iqr_bounds(sorted: &[f64]) -> Option<(f64, f64)> {
    let size = sorted.len();
    if size < 4 {
        return None;
    }

    let (q1, q3) = if (size - 1) % 4 == 0 || size % 4 == 0 {
        let lower = size / 4;
        let upper = (size * 3).div_ceil(4);
        (
            0.5 * (sorted[lower - 1] + sorted[lower]),
            0.5 * (sorted[upper - 1] + sorted[upper]),
        )
    } else {
        (sorted[size / 4], sorted[size * 3 / 4])
    };

    let iqr = q3 - q1;
    Some((q1 - iqr * 1.5, q3 + iqr * 1.5))
}

fn percentile_of_sorted(sorted: &[f64], p: f64) -> Result<f64, UsageError> {
    if p.is_nan() || !(0.0..=100.0).contains(&p) {
        return Err(UsageError::InvalidPercentile(p));
    }
    if sorted.is_empty() {
        return Ok(0.0);
    }
    if p == 0.0 {
        return Ok(sorted[0]);
    }
    let rank = (sorted.len() as f64 * (p / 100.0)).ceil() as usize;
    Ok(sorted[rank.clamp(1, sorted.len()) - 1])
}
