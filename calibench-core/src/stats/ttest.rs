use statrs::function::beta::checked_beta_reg;

use super::{ComparisonResult, StatisticalTest, TTestResult, Verdict};

/// Default significance threshold.
const DEFAULT_ALPHA: f64 = 0.05;

/// Welch's t-test for comparing two independent samples with potentially unequal variances.
///
/// Benchmarks rarely share a variance, so Welch's variant is used instead of
/// Student's pooled test.
#[derive(Debug, Clone)]
pub struct WelchTTest {
    /// Significance threshold (default: 0.05).
    pub alpha: f64,
}

impl Default for WelchTTest {
    fn default() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
        }
    }
}

impl WelchTTest {
    /// Create a new Welch's t-test with the specified significance threshold.
    ///
    /// # Panics
    /// Panics if alpha is not in the range (0, 1).
    pub fn new(alpha: f64) -> Self {
        assert!(
            alpha > 0.0 && alpha < 1.0,
            "alpha must be between 0 and 1 (exclusive)"
        );
        Self { alpha }
    }
}

impl StatisticalTest for WelchTTest {
    fn compare(&self, candidate: &[f64], baseline: &[f64]) -> ComparisonResult {
        compare_benchmarks(candidate, baseline, self.alpha)
    }
}

/// Arithmetic mean, 0 for an empty sample.
pub fn mean(samples: &[f64]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().sum::<f64>() / samples.len() as f64
}

/// Sample variance with Bessel's correction (n-1 denominator).
pub fn variance(samples: &[f64], mean: f64) -> f64 {
    if samples.len() < 2 {
        return 0.0;
    }
    let sum_sq_diff: f64 = samples.iter().map(|v| (v - mean).powi(2)).sum();
    sum_sq_diff / (samples.len() - 1) as f64
}

/// Cumulative distribution function of Student's t with `df` degrees of freedom.
///
/// Evaluated through the regularized incomplete beta function
/// `I_x(df/2, 1/2)` with `x = df / (df + t^2)`. statrs computes it with a
/// continued fraction, switching to `1 - I_{1-x}(b, a)` past the mode, and
/// a Lanczos log-gamma for the beta prefactor.
pub fn t_dist_cdf(t: f64, df: f64) -> f64 {
    let x = df / (df + t * t);
    let tail = match checked_beta_reg(df / 2.0, 0.5, x) {
        Ok(value) => 0.5 * value,
        // Degenerate df; treat as no evidence either way
        Err(_) => 0.5,
    };

    if t >= 0.0 {
        1.0 - tail
    } else {
        tail
    }
}

/// Welch's t-test between two samples.
///
/// Fewer than two observations on either side yields a non-significant
/// result with `p = 1`. Two zero-variance samples yield `p = 1` when their
/// means agree and `p = 0` otherwise.
pub fn welch_t_test(sample1: &[f64], sample2: &[f64]) -> TTestResult {
    let n1 = sample1.len();
    let n2 = sample2.len();

    if n1 < 2 || n2 < 2 {
        return TTestResult {
            t_statistic: 0.0,
            degrees_of_freedom: 0.0,
            p_value: 1.0,
            significant: false,
            mean1: mean(sample1),
            mean2: mean(sample2),
            variance1: 0.0,
            variance2: 0.0,
        };
    }

    let mean1 = mean(sample1);
    let mean2 = mean(sample2);
    let var1 = variance(sample1, mean1);
    let var2 = variance(sample2, mean2);

    // Squared standard error of the difference
    let se1 = var1 / n1 as f64;
    let se2 = var2 / n2 as f64;
    let se = se1 + se2;

    if se == 0.0 {
        return TTestResult {
            t_statistic: 0.0,
            degrees_of_freedom: (n1 + n2 - 2) as f64,
            p_value: if mean1 == mean2 { 1.0 } else { 0.0 },
            significant: mean1 != mean2,
            mean1,
            mean2,
            variance1: var1,
            variance2: var2,
        };
    }

    let t = (mean1 - mean2) / se.sqrt();
    let df = (se * se) / ((se1 * se1) / (n1 - 1) as f64 + (se2 * se2) / (n2 - 1) as f64);

    let p_value = (2.0 * (1.0 - t_dist_cdf(t.abs(), df))).clamp(0.0, 1.0);

    TTestResult {
        t_statistic: t,
        degrees_of_freedom: df,
        p_value,
        significant: p_value < DEFAULT_ALPHA,
        mean1,
        mean2,
        variance1: var1,
        variance2: var2,
    }
}

/// Star rating for a p-value.
pub fn significance_stars(p_value: f64) -> &'static str {
    if p_value < 0.001 {
        "***"
    } else if p_value < 0.01 {
        "**"
    } else if p_value < 0.05 {
        "*"
    } else {
        ""
    }
}

/// Compare two throughput series at significance level `alpha`.
///
/// The verdict reads from the first sample's point of view: higher
/// throughput in `sample1` means it is `Faster` than `sample2`.
pub fn compare_benchmarks(sample1: &[f64], sample2: &[f64], alpha: f64) -> ComparisonResult {
    let result = welch_t_test(sample1, sample2);
    let significant = result.p_value < alpha;

    let verdict = if !significant {
        Verdict::Same
    } else if result.mean1 > result.mean2 {
        Verdict::Faster
    } else {
        Verdict::Slower
    };

    ComparisonResult {
        significant,
        p_value: result.p_value,
        confidence: (1.0 - result.p_value) * 100.0,
        stars: significance_stars(result.p_value).to_string(),
        verdict,
        t_statistic: result.t_statistic,
        degrees_of_freedom: result.degrees_of_freedom,
    }
}
