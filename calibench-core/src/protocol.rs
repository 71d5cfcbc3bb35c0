//! Wire protocol between the runner and an isolated worker process.
//!
//! Each isolated benchmark costs exactly one `/run` request and one reply;
//! the remaining endpoints manage the worker's lifecycle.

use serde::{Deserialize, Serialize};

use crate::definition::{BenchmarkDefinition, BenchmarkMode};
use crate::result::BenchmarkResult;

/// Environment variable carrying the port an isolated worker listens on.
///
/// Its presence switches a benchmark binary into worker mode.
pub const WORKER_PORT_ENV: &str = "CALIBENCH_WORKER_PORT";

/// Health check response from the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

impl HealthResponse {
    /// Create a healthy response.
    pub fn healthy() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

/// Response containing the benchmarks registered in the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkListResponse {
    pub benchmarks: Vec<String>,
}

impl BenchmarkListResponse {
    /// Create a new benchmark list response.
    pub fn new(benchmarks: Vec<String>) -> Self {
        Self { benchmarks }
    }
}

/// Request to run one benchmark to completion inside the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBenchmarkRequest {
    pub definition: BenchmarkDefinition,
    pub mode: BenchmarkMode,
    /// Names of the instruments to attach, in pipeline order.
    #[serde(default)]
    pub instruments: Vec<String>,
}

impl RunBenchmarkRequest {
    /// Create a new run request.
    pub fn new(definition: BenchmarkDefinition, mode: BenchmarkMode) -> Self {
        Self {
            definition,
            mode,
            instruments: Vec::new(),
        }
    }

    /// Attach instruments by name.
    pub fn with_instruments(mut self, instruments: Vec<String>) -> Self {
        self.instruments = instruments;
        self
    }
}

/// Why a worker could not produce a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The work function itself failed. Aborts the whole run.
    Work,
    /// The request was invalid for this worker.
    Usage,
    /// The worker could not drive the benchmark.
    #[default]
    Internal,
}

/// A failed run as reported by the worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

/// Reply carrying the aggregated result, or the reason there is none.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunBenchmarkResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<BenchmarkResult>,
    /// Error message if the benchmark failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set together with `error`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<FailureKind>,
}

impl RunBenchmarkResponse {
    /// Create a successful response.
    pub fn success(result: BenchmarkResult) -> Self {
        Self {
            result: Some(result),
            error: None,
            kind: None,
        }
    }

    /// Create a failed response.
    pub fn failure(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            result: None,
            error: Some(error.into()),
            kind: Some(kind),
        }
    }

    /// Split into a `Result`.
    pub fn into_result(self) -> Result<BenchmarkResult, RunFailure> {
        match (self.result, self.error) {
            (Some(result), None) => Ok(result),
            (_, Some(message)) => Err(RunFailure {
                kind: self.kind.unwrap_or_default(),
                message,
            }),
            (None, None) => Err(RunFailure {
                kind: FailureKind::Internal,
                message: "Worker replied without a result".to_string(),
            }),
        }
    }
}

/// Response to a shutdown request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownResponse {
    pub status: String,
}

impl ShutdownResponse {
    /// Create a shutdown acknowledgment response.
    pub fn acknowledged() -> Self {
        Self {
            status: "shutting_down".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::BenchmarkOptions;
    use crate::histogram::HistogramSummary;
    use crate::result::Measurement;

    fn sample_result() -> BenchmarkResult {
        BenchmarkResult {
            name: "bench".to_string(),
            iterations: 100,
            measurement: Measurement::Throughput {
                ops_sec: 1000.0,
                ops_sec_per_run: vec![1000.0],
            },
            histogram: HistogramSummary {
                samples: 2,
                min: 1.0,
                max: 2.0,
                mean: 1.5,
                stddev: 0.7,
                cv: 0.47,
                sample_data: vec![1.0, 2.0],
            },
            plugins: vec![],
            baseline: false,
        }
    }

    #[test]
    fn test_health_response_healthy() {
        let response = HealthResponse::healthy();
        assert_eq!(response.status, "healthy");
    }

    #[test]
    fn test_benchmark_list_response() {
        let benchmarks = vec!["bench1".to_string(), "bench2".to_string()];
        let response = BenchmarkListResponse::new(benchmarks.clone());
        assert_eq!(response.benchmarks, benchmarks);
    }

    #[test]
    fn test_run_request_carries_definition() {
        let definition = BenchmarkDefinition::new("sum", BenchmarkOptions::default()).unwrap();
        let request = RunBenchmarkRequest::new(definition, BenchmarkMode::Time)
            .with_instruments(vec!["memory".to_string()]);

        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"mode\":\"time\""));

        let decoded: RunBenchmarkRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.definition.name, "sum");
        assert_eq!(decoded.instruments, vec!["memory".to_string()]);
    }

    #[test]
    fn test_instruments_default_to_empty() {
        let json = r#"{"definition":{"name":"x","options":{}},"mode":"ops"}"#;
        let request: RunBenchmarkRequest = serde_json::from_str(json).unwrap();
        assert!(request.instruments.is_empty());
        assert_eq!(request.definition.options.max_time, 0.5);
    }

    #[test]
    fn test_run_response_success() {
        let response = RunBenchmarkResponse::success(sample_result());
        let json = serde_json::to_string(&response).unwrap();
        assert!(!json.contains("error"));

        let decoded: RunBenchmarkResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded.into_result().unwrap(), sample_result());
    }

    #[test]
    fn test_run_response_failure() {
        let response = RunBenchmarkResponse::failure(FailureKind::Work, "benchmark panicked");
        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"kind\":\"work\""));

        let decoded: RunBenchmarkResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(
            decoded.into_result().unwrap_err(),
            RunFailure {
                kind: FailureKind::Work,
                message: "benchmark panicked".to_string(),
            }
        );
    }

    #[test]
    fn test_run_response_failure_without_kind() {
        let json = r#"{"error":"connection reset"}"#;
        let response: RunBenchmarkResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.into_result().unwrap_err().kind, FailureKind::Internal);
    }

    #[test]
    fn test_shutdown_response() {
        let response = ShutdownResponse::acknowledged();
        assert_eq!(response.status, "shutting_down");
    }
}
