//! Configuration loading for calibench.
//!
//! Supports loading configuration from TOML files, with sensible defaults
//! for all settings.

use anyhow::{Context, Result};
use calibench_core::definition::{DEFAULT_MAX_TIME, DEFAULT_MIN_SAMPLES, DEFAULT_MIN_TIME};
use calibench_core::BenchmarkMode;
use calibench_harness::DEFAULT_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Top-level configuration for calibench.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How benchmarks are measured and compared.
    pub suite: SuiteConfig,
    /// Per-benchmark worker processes.
    pub isolation: IsolationConfig,
    /// Dead-code elimination detection.
    pub elimination: EliminationConfig,
}

/// Configuration for the benchmark suite.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteConfig {
    /// Report throughput ("ops") or per-call latency ("time").
    pub mode: BenchmarkMode,
    /// Minimum rounds per repetition.
    pub min_samples: u32,
    /// Repetitions per benchmark. Defaults to 1, or 30 with `ttest`.
    pub repeat_suite: Option<u32>,
    /// Lower bound of a sampling window, in seconds.
    pub min_time: f64,
    /// Time budget of one repetition, in seconds.
    pub max_time: f64,
    /// Warm every benchmark up before measuring any of them.
    pub warmup: bool,
    /// Name of the benchmark others are compared against.
    pub baseline: Option<String>,
    /// Run Welch's t-test against the baseline.
    pub ttest: bool,
    /// Significance threshold for the t-test.
    pub alpha: f64,
    /// Instruments attached to every benchmark, by name.
    pub instruments: Vec<String>,
}

/// Configuration for isolated execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IsolationConfig {
    /// Run each benchmark in its own worker process.
    pub enabled: bool,
    /// Port of the first worker; worker `n` listens on `base_port + n`.
    pub base_port: u16,
    /// How long to wait for a worker to answer health checks.
    pub ready_timeout_ms: u64,
}

/// Configuration for dead-code elimination detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EliminationConfig {
    pub enabled: bool,
    /// Flag benchmarks less than this many times slower than a no-op.
    pub threshold: f64,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            mode: BenchmarkMode::Ops,
            min_samples: DEFAULT_MIN_SAMPLES,
            repeat_suite: None,
            min_time: DEFAULT_MIN_TIME,
            max_time: DEFAULT_MAX_TIME,
            warmup: true,
            baseline: None,
            ttest: false,
            alpha: 0.05,
            instruments: Vec::new(),
        }
    }
}

impl Default for IsolationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_port: 9200,
            ready_timeout_ms: 30_000, // 30 seconds
        }
    }
}

impl Default for EliminationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = ".calibench.toml";

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Config> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Load `.calibench.toml` from the current directory, or use defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration file exists but cannot be parsed.
    pub fn load_or_default() -> Result<Config> {
        let path = Path::new(DEFAULT_CONFIG_FILE);

        if path.exists() {
            Self::load(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load configuration from the specified path, or try the default location.
    ///
    /// # Errors
    ///
    /// Returns an error if the specified file cannot be read or parsed.
    pub fn load_from(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(p) => Self::load(p),
            None => Self::load_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.suite.mode, BenchmarkMode::Ops);
        assert_eq!(config.suite.min_samples, 10);
        assert_eq!(config.suite.repeat_suite, None);
        assert_eq!(config.suite.min_time, 0.05);
        assert_eq!(config.suite.max_time, 0.5);
        assert!(config.suite.warmup);
        assert!(config.suite.baseline.is_none());
        assert!(!config.suite.ttest);
        assert_eq!(config.suite.alpha, 0.05);
        assert!(config.suite.instruments.is_empty());
        assert!(!config.isolation.enabled);
        assert_eq!(config.isolation.base_port, 9200);
        assert_eq!(config.isolation.ready_timeout_ms, 30_000);
        assert!(!config.elimination.enabled);
        assert_eq!(config.elimination.threshold, 10.0);
    }

    #[test]
    fn test_load_partial_config() {
        let toml_content = r#"
[suite]
mode = "time"
baseline = "vec_push"

[elimination]
enabled = true
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();

        // Overridden values
        assert_eq!(config.suite.mode, BenchmarkMode::Time);
        assert_eq!(config.suite.baseline.as_deref(), Some("vec_push"));
        assert!(config.elimination.enabled);

        // Default values
        assert_eq!(config.suite.min_samples, 10);
        assert_eq!(config.elimination.threshold, 10.0);
        assert_eq!(config.isolation.base_port, 9200);
    }

    #[test]
    fn test_load_full_config() {
        let toml_content = r#"
[suite]
mode = "ops"
min_samples = 20
repeat_suite = 40
min_time = 0.01
max_time = 0.2
warmup = false
baseline = "naive"
ttest = true
alpha = 0.01
instruments = ["memory"]

[isolation]
enabled = true
base_port = 8000
ready_timeout_ms = 5000

[elimination]
enabled = true
threshold = 4.0
"#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();

        assert_eq!(config.suite.min_samples, 20);
        assert_eq!(config.suite.repeat_suite, Some(40));
        assert_eq!(config.suite.min_time, 0.01);
        assert_eq!(config.suite.max_time, 0.2);
        assert!(!config.suite.warmup);
        assert_eq!(config.suite.baseline.as_deref(), Some("naive"));
        assert!(config.suite.ttest);
        assert_eq!(config.suite.alpha, 0.01);
        assert_eq!(config.suite.instruments, vec!["memory"]);
        assert!(config.isolation.enabled);
        assert_eq!(config.isolation.base_port, 8000);
        assert_eq!(config.isolation.ready_timeout_ms, 5000);
        assert!(config.elimination.enabled);
        assert_eq!(config.elimination.threshold, 4.0);
    }

    #[test]
    fn test_load_unknown_mode() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[suite]\nmode = \"fast\"\n").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load(Path::new("/nonexistent/path/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_invalid_toml() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"this is not valid toml {{{{").unwrap();

        let result = Config::load(file.path());
        assert!(result.is_err());
    }

    #[test]
    fn test_load_from_explicit_path() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[isolation]\nbase_port = 7000\n").unwrap();

        let config = Config::load_from(Some(file.path())).unwrap();
        assert_eq!(config.isolation.base_port, 7000);
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let mut config = Config::default();
        config.suite.baseline = Some("base".to_string());
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.suite.mode, parsed.suite.mode);
        assert_eq!(config.suite.baseline, parsed.suite.baseline);
        assert_eq!(config.isolation.base_port, parsed.isolation.base_port);
        assert_eq!(config.elimination.threshold, parsed.elimination.threshold);
    }
}
