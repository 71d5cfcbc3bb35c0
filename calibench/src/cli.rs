//! Command-line interface for calibench bench binaries.

use crate::config::{Config, DEFAULT_CONFIG_FILE};
use calibench_core::BenchmarkMode;
use clap::Parser;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "calibench")]
#[command(about = "Adaptive micro-benchmarks with calibration, isolation and significance testing")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Measurement mode: "ops" (throughput) or "time" (latency)
    #[arg(long)]
    pub mode: Option<BenchmarkMode>,

    /// Minimum rounds per repetition
    #[arg(long)]
    pub min_samples: Option<u32>,

    /// Repetitions per benchmark
    #[arg(long)]
    pub repeat_suite: Option<u32>,

    /// Run each benchmark in its own worker process
    #[arg(long)]
    pub isolate: bool,

    /// Compare every benchmark against the baseline with Welch's t-test
    #[arg(long)]
    pub ttest: bool,

    /// Significance threshold for the t-test
    #[arg(long)]
    pub alpha: Option<f64>,

    /// Warn about benchmarks that run about as fast as a no-op
    #[arg(long)]
    pub detect_elimination: bool,

    /// Ratio to the no-op baseline under which a benchmark is flagged
    #[arg(long)]
    pub elimination_threshold: Option<f64>,

    /// Only run benchmarks whose name contains this string
    #[arg(long)]
    pub filter: Option<String>,

    /// List registered benchmarks and exit
    #[arg(long)]
    pub list: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Absorbs the --bench flag passed by cargo bench
    #[arg(long, hide = true)]
    pub bench: bool,
}

impl Cli {
    /// Whether a registered benchmark passes `--filter`.
    pub fn matches(&self, name: &str) -> bool {
        self.filter
            .as_deref()
            .map_or(true, |filter| name.contains(filter))
    }

    /// Apply CLI overrides to the configuration.
    ///
    /// CLI arguments take precedence over config file values. Flags only
    /// switch features on; they never turn off what the file enables.
    pub fn apply_to_config(&self, config: &mut Config) {
        if let Some(mode) = self.mode {
            config.suite.mode = mode;
        }

        if let Some(min_samples) = self.min_samples {
            config.suite.min_samples = min_samples;
        }

        if let Some(repeat_suite) = self.repeat_suite {
            config.suite.repeat_suite = Some(repeat_suite);
        }

        if self.isolate {
            config.isolation.enabled = true;
        }

        if self.ttest {
            config.suite.ttest = true;
        }

        if let Some(alpha) = self.alpha {
            config.suite.alpha = alpha;
        }

        if self.detect_elimination {
            config.elimination.enabled = true;
        }

        if let Some(threshold) = self.elimination_threshold {
            config.elimination.threshold = threshold;
        }
    }
}
