use serde::{Deserialize, Serialize};

use crate::clock::Timer;
use crate::histogram::HistogramSummary;

/// Mode-dependent headline figure of a benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Measurement {
    /// Throughput mode: total iterations over total time.
    Throughput {
        ops_sec: f64,
        /// One figure per repetition, the input of significance testing.
        ops_sec_per_run: Vec<f64>,
    },
    /// Latency mode: average wall time of one call, in seconds.
    Latency { total_time_secs: f64 },
}

/// Output of one instrument for one benchmark.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginResult {
    pub name: String,
    /// One-line fragment for human reports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report: Option<String>,
    /// Structured payload, `"enabled"` when the instrument has none.
    pub result: serde_json::Value,
}

/// Final record of a benchmark run. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkResult {
    pub name: String,
    /// Iterations executed across all repetitions.
    pub iterations: u64,
    pub measurement: Measurement,
    pub histogram: HistogramSummary,
    pub plugins: Vec<PluginResult>,
    pub baseline: bool,
}

impl BenchmarkResult {
    /// Operations per second, throughput mode only.
    pub fn ops_sec(&self) -> Option<f64> {
        match &self.measurement {
            Measurement::Throughput { ops_sec, .. } => Some(*ops_sec),
            Measurement::Latency { .. } => None,
        }
    }

    /// Per-repetition throughput; empty in latency mode.
    pub fn ops_sec_per_run(&self) -> &[f64] {
        match &self.measurement {
            Measurement::Throughput {
                ops_sec_per_run, ..
            } => ops_sec_per_run,
            Measurement::Latency { .. } => &[],
        }
    }

    /// Average seconds per call, latency mode only.
    pub fn total_time_secs(&self) -> Option<f64> {
        match &self.measurement {
            Measurement::Latency { total_time_secs } => Some(*total_time_secs),
            Measurement::Throughput { .. } => None,
        }
    }

    /// Average nanoseconds per operation in either mode.
    pub fn duration_per_op_ns(&self) -> f64 {
        match &self.measurement {
            Measurement::Throughput { ops_sec, .. } if *ops_sec > 0.0 => Timer::SCALE / ops_sec,
            Measurement::Throughput { .. } => f64::INFINITY,
            Measurement::Latency { total_time_secs } => total_time_secs * Timer::SCALE,
        }
    }
}

/// A benchmark that ran suspiciously close to an empty function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EliminationWarning {
    pub name: String,
    pub time_per_op_ns: f64,
    pub baseline_ns: f64,
    /// `time_per_op_ns / baseline_ns`.
    pub ratio: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> HistogramSummary {
        HistogramSummary {
            samples: 1,
            min: 1.0,
            max: 1.0,
            mean: 1.0,
            stddev: 0.0,
            cv: 0.0,
            sample_data: vec![1.0],
        }
    }

    #[test]
    fn test_throughput_accessors() {
        let result = BenchmarkResult {
            name: "a".to_string(),
            iterations: 10,
            measurement: Measurement::Throughput {
                ops_sec: 2_000_000.0,
                ops_sec_per_run: vec![1_900_000.0, 2_100_000.0],
            },
            histogram: summary(),
            plugins: vec![],
            baseline: false,
        };

        assert_eq!(result.ops_sec(), Some(2_000_000.0));
        assert_eq!(result.ops_sec_per_run().len(), 2);
        assert_eq!(result.total_time_secs(), None);
        assert_eq!(result.duration_per_op_ns(), 500.0);
    }

    #[test]
    fn test_latency_accessors() {
        let result = BenchmarkResult {
            name: "b".to_string(),
            iterations: 3,
            measurement: Measurement::Latency {
                total_time_secs: 0.25,
            },
            histogram: summary(),
            plugins: vec![],
            baseline: true,
        };

        assert_eq!(result.ops_sec(), None);
        assert!(result.ops_sec_per_run().is_empty());
        assert_eq!(result.total_time_secs(), Some(0.25));
        assert_eq!(result.duration_per_op_ns(), 250_000_000.0);
    }

    #[test]
    fn test_measurement_tagged_json() {
        let json = serde_json::to_value(Measurement::Latency {
            total_time_secs: 1.5,
        })
        .unwrap();
        assert_eq!(json["kind"], "latency");
        assert_eq!(json["total_time_secs"], 1.5);
    }
}
