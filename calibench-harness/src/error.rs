use calibench_core::UsageError;
use thiserror::Error;

/// Errors raised while executing a benchmark.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// The benchmark or its options were misused. Never retried.
    #[error(transparent)]
    Usage(#[from] UsageError),

    /// The work function panicked or could not be driven to completion.
    #[error("Benchmark '{name}' failed: {message}")]
    WorkFailed { name: String, message: String },
}

impl EngineError {
    pub(crate) fn work_failed(name: &str, message: impl Into<String>) -> Self {
        EngineError::WorkFailed {
            name: name.to_string(),
            message: message.into(),
        }
    }

    /// Whether this error comes from misuse rather than the work itself.
    pub fn is_usage(&self) -> bool {
        matches!(self, EngineError::Usage(_))
    }
}
