use thiserror::Error;

/// Misuse of the harness API.
///
/// Usage errors are raised synchronously at the point of misuse and are
/// never retried.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum UsageError {
    /// A numeric option is outside its accepted range.
    #[error("Invalid option `{name}`: {reason}")]
    InvalidOption { name: String, reason: String },

    /// A second definition tried to claim the baseline slot.
    #[error("There is already a baseline benchmark: {0}")]
    DuplicateBaseline(String),

    /// The definition refers to a function that was never registered.
    #[error("Benchmark not registered: {0}")]
    UnknownBenchmark(String),

    /// A managed benchmark did not drive its timer correctly.
    #[error("Managed timer misuse: {0}")]
    TimerMisuse(String),

    /// Histogram samples must be finite and non-negative.
    #[error("Invalid histogram sample: {0}")]
    InvalidSample(f64),

    /// The histogram was already finalized.
    #[error("Histogram is finished, no more samples can be recorded")]
    HistogramFinished,

    /// Percentiles are defined on [0, 100].
    #[error("Invalid percentile value {0}, must be between 0 and 100")]
    InvalidPercentile(f64),

    /// The instrument cannot run in this environment.
    #[error("Instrument `{0}` is not supported in this environment")]
    UnsupportedInstrument(String),

    /// The same instrument was attached twice.
    #[error("Instrument `{0}` is attached more than once")]
    DuplicateInstrument(String),

    /// No built-in instrument has the requested name.
    #[error("Unknown instrument: {0}")]
    UnknownInstrument(String),
}

impl UsageError {
    /// Shorthand for [`UsageError::InvalidOption`].
    pub fn option(name: &str, reason: impl Into<String>) -> Self {
        UsageError::InvalidOption {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}
