use serde::{Deserialize, Serialize};

/// Raw output of Welch's two-sample t-test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TTestResult {
    /// Welch's t-statistic, `(mean1 - mean2) / sqrt(var1/n1 + var2/n2)`.
    pub t_statistic: f64,
    /// Welch-Satterthwaite degrees of freedom.
    pub degrees_of_freedom: f64,
    /// Two-tailed p-value.
    pub p_value: f64,
    /// Whether `p_value` is below the default alpha of 0.05.
    pub significant: bool,
    pub mean1: f64,
    pub mean2: f64,
    pub variance1: f64,
    pub variance2: f64,
}

/// How a candidate's throughput relates to the baseline's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Faster,
    Slower,
    Same,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Faster => write!(f, "faster"),
            Verdict::Slower => write!(f, "slower"),
            Verdict::Same => write!(f, "same"),
        }
    }
}

/// A candidate benchmark compared against the baseline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// Whether the difference is significant at the configured alpha.
    pub significant: bool,
    pub p_value: f64,
    /// `(1 - p) * 100`.
    pub confidence: f64,
    /// `***`, `**`, `*` or empty.
    pub stars: String,
    pub verdict: Verdict,
    pub t_statistic: f64,
    pub degrees_of_freedom: f64,
}

/// Trait for tests that compare two series of per-repetition throughput.
pub trait StatisticalTest: Send + Sync {
    /// Compare `candidate` against `baseline` (both in operations per second).
    fn compare(&self, candidate: &[f64], baseline: &[f64]) -> ComparisonResult;
}

mod ttest;
pub use ttest::{
    compare_benchmarks, mean, significance_stars, t_dist_cdf, variance, welch_t_test, WelchTTest,
};
