//! Isolated execution of benchmarks in worker processes.
//!
//! The dispatcher relaunches the current bench binary as a worker (with
//! [`WORKER_PORT_ENV`] set), ships it one benchmark definition over HTTP and
//! waits for the aggregated result. Each benchmark gets a fresh worker, so
//! nothing one benchmark leaves behind can skew the next.

use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, warn};

use calibench_core::protocol::{
    BenchmarkListResponse, FailureKind, HealthResponse, RunBenchmarkRequest, RunBenchmarkResponse,
    ShutdownResponse, WORKER_PORT_ENV,
};
use calibench_core::{BenchmarkDefinition, BenchmarkMode, BenchmarkResult};

/// How long a worker gets to exit after being asked to shut down.
const EXIT_GRACE: Duration = Duration::from_secs(5);

/// Errors that can occur while running a benchmark in isolation.
#[derive(Debug, Error)]
pub enum IsolationError {
    /// Failed to spawn a worker process.
    #[error("Failed to spawn worker: {0}")]
    SpawnError(String),

    /// Worker did not become ready within the timeout period.
    #[error("Worker at {url} not ready after {timeout_secs}s timeout. Last error: {last_error}")]
    TimeoutError {
        url: String,
        timeout_secs: u64,
        last_error: String,
    },

    /// HTTP request to the worker failed.
    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    /// Worker reported an error while running the benchmark.
    #[error("Worker error: {0}")]
    WorkerError(String),

    /// The work function failed inside the worker.
    #[error("Benchmark '{name}' failed: {message}")]
    WorkFailed { name: String, message: String },

    /// Worker process terminated unsuccessfully.
    #[error("Worker exited with {0}")]
    WorkerExited(ExitStatus),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Handle to a worker, either spawned by us or already running.
pub struct WorkerHandle {
    /// The child process (None for remote workers).
    process: Option<Child>,
    /// Base URL for the worker.
    base_url: String,
    /// HTTP client for communication.
    client: reqwest::Client,
}

impl WorkerHandle {
    /// Spawn `binary` as a worker listening on `port`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned.
    pub fn spawn(binary: &Path, port: u16) -> Result<Self, IsolationError> {
        let process = Command::new(binary)
            .env(WORKER_PORT_ENV, port.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| {
                IsolationError::SpawnError(format!("Failed to spawn {}: {}", binary.display(), e))
            })?;

        Ok(Self {
            process: Some(process),
            base_url: format!("http://127.0.0.1:{}", port),
            client: build_client()?,
        })
    }

    /// Connect to an already-running worker at the given URL.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is invalid or the client cannot be created.
    pub fn connect(url: &str) -> Result<Self, IsolationError> {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(IsolationError::InvalidUrl(format!(
                "URL must start with http:// or https://: {}",
                url
            )));
        }

        Ok(Self {
            process: None,
            base_url: url.trim_end_matches('/').to_string(),
            client: build_client()?,
        })
    }

    /// Get the base URL for this worker.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Check if the worker is healthy.
    pub async fn health_check(&self) -> Result<HealthResponse, IsolationError> {
        let url = format!("{}/health", self.base_url());
        let response: HealthResponse = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(1))
            .send()
            .await?
            .json()
            .await?;

        if response.status == "healthy" {
            Ok(response)
        } else {
            Err(IsolationError::WorkerError(format!(
                "Unhealthy status: {}",
                response.status
            )))
        }
    }

    /// Get the list of benchmarks the worker knows.
    pub async fn list_benchmarks(&self) -> Result<Vec<String>, IsolationError> {
        let url = format!("{}/benchmarks", self.base_url());
        let response: BenchmarkListResponse = self.client.get(&url).send().await?.json().await?;
        Ok(response.benchmarks)
    }

    /// Run one benchmark to completion in the worker.
    ///
    /// No timeout applies: a benchmark runs as long as its options allow.
    pub async fn run_benchmark(
        &self,
        request: &RunBenchmarkRequest,
    ) -> Result<BenchmarkResult, IsolationError> {
        let url = format!("{}/run", self.base_url());
        let response: RunBenchmarkResponse = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await?
            .json()
            .await?;

        response.into_result().map_err(|failure| match failure.kind {
            FailureKind::Work => IsolationError::WorkFailed {
                name: request.definition.name.clone(),
                message: failure.message,
            },
            FailureKind::Usage | FailureKind::Internal => {
                IsolationError::WorkerError(failure.message)
            }
        })
    }

    /// Request the worker to shut down gracefully.
    pub async fn shutdown(&self) -> Result<(), IsolationError> {
        let url = format!("{}/shutdown", self.base_url());
        let _response: ShutdownResponse = self.client.post(&url).send().await?.json().await?;
        Ok(())
    }

    /// Exit status of a spawned worker, if it has exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        self.process
            .as_mut()
            .and_then(|process| process.try_wait().ok().flatten())
    }

    /// Wait up to `grace` for a spawned worker to exit, killing it after.
    ///
    /// Returns `None` for remote workers.
    pub async fn wait_for_exit(&mut self, grace: Duration) -> Option<ExitStatus> {
        self.process.as_ref()?;
        let start = Instant::now();

        loop {
            if let Some(status) = self.try_exit_status() {
                return Some(status);
            }
            if start.elapsed() >= grace {
                warn!("Worker at {} did not exit, killing it", self.base_url);
                self.kill();
                return self
                    .process
                    .as_mut()
                    .and_then(|process| process.wait().ok());
            }
            sleep(Duration::from_millis(20)).await;
        }
    }

    /// Kill the worker process forcefully (only for spawned workers).
    pub fn kill(&mut self) {
        if let Some(ref mut process) = self.process {
            let _ = process.kill();
        }
    }

    /// Get the process ID of the worker (only for spawned workers).
    pub fn pid(&self) -> Option<u32> {
        self.process.as_ref().map(|p| p.id())
    }

    /// Check if this is a spawned worker.
    pub fn is_managed(&self) -> bool {
        self.process.is_some()
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        if let Some(ref mut process) = self.process {
            if let Ok(None) = process.try_wait() {
                let _ = process.kill();
                let _ = process.wait();
            }
        }
    }
}

fn build_client() -> Result<reqwest::Client, IsolationError> {
    reqwest::Client::builder()
        .build()
        .map_err(|e| IsolationError::SpawnError(format!("Failed to create HTTP client: {}", e)))
}

/// Wait for a worker to become healthy, with retries.
pub async fn wait_for_health(
    worker: &WorkerHandle,
    timeout: Duration,
) -> Result<(), IsolationError> {
    let start = Instant::now();
    let retry_interval = Duration::from_millis(100);
    let mut last_error: Option<IsolationError> = None;

    loop {
        match worker.health_check().await {
            Ok(_) => return Ok(()),
            Err(e) if start.elapsed() < timeout => {
                last_error = Some(e);
                sleep(retry_interval).await;
            }
            Err(e) => {
                let error_msg = last_error
                    .map(|le| le.to_string())
                    .unwrap_or_else(|| e.to_string());
                return Err(IsolationError::TimeoutError {
                    url: worker.base_url().to_string(),
                    timeout_secs: timeout.as_secs(),
                    last_error: error_msg,
                });
            }
        }
    }
}

/// Where an isolated benchmark is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchState {
    Pending,
    Dispatched,
    Completed,
    Failed,
}

impl DispatchState {
    /// Whether no further transition is possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, DispatchState::Completed | DispatchState::Failed)
    }
}

/// One benchmark's trip through a worker.
#[derive(Debug)]
pub struct IsolatedRun {
    name: String,
    state: DispatchState,
    outcome: Option<Result<BenchmarkResult, IsolationError>>,
}

impl IsolatedRun {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: DispatchState::Pending,
            outcome: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> DispatchState {
        self.state
    }

    /// The request has been handed to a worker.
    pub fn dispatched(&mut self) {
        if self.state == DispatchState::Pending {
            self.transition(DispatchState::Dispatched);
        }
    }

    /// Record the worker's result. Ignored once terminal.
    pub fn complete(&mut self, result: BenchmarkResult) {
        if !self.state.is_terminal() {
            self.transition(DispatchState::Completed);
            self.outcome = Some(Ok(result));
        }
    }

    /// Record why the benchmark produced no result. Ignored once terminal.
    pub fn fail(&mut self, error: IsolationError) {
        if !self.state.is_terminal() {
            self.transition(DispatchState::Failed);
            self.outcome = Some(Err(error));
        }
    }

    /// The result or failure, once terminal.
    pub fn into_outcome(self) -> Option<Result<BenchmarkResult, IsolationError>> {
        self.outcome
    }

    fn transition(&mut self, next: DispatchState) {
        debug!(benchmark = %self.name, from = ?self.state, to = ?next, "Isolated run");
        self.state = next;
    }
}

/// Runs benchmarks one at a time, each in a fresh worker process.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Binary to launch as worker; it must register the same benchmarks.
    binary: PathBuf,
    /// Port of the first worker.
    base_port: u16,
    /// Timeout for waiting for workers to become ready.
    ready_timeout: Duration,
    mode: BenchmarkMode,
    /// Instrument names sent with every request.
    instruments: Vec<String>,
}

impl Dispatcher {
    pub fn new(
        binary: PathBuf,
        base_port: u16,
        ready_timeout: Duration,
        mode: BenchmarkMode,
        instruments: Vec<String>,
    ) -> Self {
        Self {
            binary,
            base_port,
            ready_timeout,
            mode,
            instruments,
        }
    }

    /// A dispatcher relaunching the running executable.
    pub fn for_current_exe(
        base_port: u16,
        ready_timeout: Duration,
        mode: BenchmarkMode,
        instruments: Vec<String>,
    ) -> Result<Self, IsolationError> {
        let binary = std::env::current_exe().map_err(|e| {
            IsolationError::SpawnError(format!("Failed to locate current executable: {}", e))
        })?;
        Ok(Self::new(binary, base_port, ready_timeout, mode, instruments))
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Port used for the `index`-th benchmark of the run.
    pub fn port_for(&self, index: usize) -> Result<u16, IsolationError> {
        u16::try_from(index)
            .ok()
            .and_then(|offset| self.base_port.checked_add(offset))
            .ok_or_else(|| {
                IsolationError::SpawnError(format!(
                    "No port left for benchmark #{} above {}",
                    index, self.base_port
                ))
            })
    }

    fn request(&self, definition: &BenchmarkDefinition) -> RunBenchmarkRequest {
        RunBenchmarkRequest::new(definition.clone(), self.mode)
            .with_instruments(self.instruments.clone())
    }

    /// Spawn a worker, run `definition` in it and shut it down.
    ///
    /// A transport error or an unsuccessful worker exit fails only this
    /// benchmark.
    pub async fn dispatch(&self, index: usize, definition: &BenchmarkDefinition) -> IsolatedRun {
        let mut run = IsolatedRun::new(&definition.name);

        let spawned = self
            .port_for(index)
            .and_then(|port| WorkerHandle::spawn(&self.binary, port));
        let mut worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                run.fail(e);
                return run;
            }
        };
        debug!(
            benchmark = %definition.name,
            pid = ?worker.pid(),
            url = worker.base_url(),
            "Spawned worker"
        );

        let outcome = match wait_for_health(&worker, self.ready_timeout).await {
            Ok(()) => {
                run.dispatched();
                worker.run_benchmark(&self.request(definition)).await
            }
            Err(e) => Err(e),
        };

        let _ = worker.shutdown().await;
        let status = worker.wait_for_exit(EXIT_GRACE).await;

        match (outcome, status) {
            (_, Some(status)) if !status.success() => {
                run.fail(IsolationError::WorkerExited(status))
            }
            (Ok(result), _) => run.complete(result),
            (Err(e), _) => run.fail(e),
        }
        run
    }

    /// Run `definition` on an already-running worker, leaving it running.
    pub async fn run_on(
        &self,
        worker: &WorkerHandle,
        definition: &BenchmarkDefinition,
    ) -> IsolatedRun {
        let mut run = IsolatedRun::new(&definition.name);

        if let Err(e) = wait_for_health(worker, self.ready_timeout).await {
            run.fail(e);
            return run;
        }
        run.dispatched();

        match worker.run_benchmark(&self.request(definition)).await {
            Ok(result) => run.complete(result),
            Err(e) => run.fail(e),
        }
        run
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calibench_core::{HistogramSummary, Measurement};

    fn result(name: &str) -> BenchmarkResult {
        BenchmarkResult {
            name: name.to_string(),
            iterations: 10,
            measurement: Measurement::Throughput {
                ops_sec: 100.0,
                ops_sec_per_run: vec![100.0],
            },
            histogram: HistogramSummary {
                samples: 1,
                min: 1.0,
                max: 1.0,
                mean: 1.0,
                stddev: 0.0,
                cv: 0.0,
                sample_data: vec![1.0],
            },
            plugins: vec![],
            baseline: false,
        }
    }

    fn dispatcher(base_port: u16) -> Dispatcher {
        Dispatcher::new(
            PathBuf::from("/path/to/bench"),
            base_port,
            Duration::from_millis(200),
            BenchmarkMode::Ops,
            vec!["memory".to_string()],
        )
    }

    #[test]
    fn test_isolated_run_completes() {
        let mut run = IsolatedRun::new("sum");
        assert_eq!(run.state(), DispatchState::Pending);

        run.dispatched();
        assert_eq!(run.state(), DispatchState::Dispatched);

        run.complete(result("sum"));
        assert_eq!(run.state(), DispatchState::Completed);

        // Terminal states are final
        run.fail(IsolationError::WorkerError("late".to_string()));
        assert_eq!(run.state(), DispatchState::Completed);

        let outcome = run.into_outcome().unwrap();
        assert_eq!(outcome.unwrap().name, "sum");
    }

    #[test]
    fn test_isolated_run_fails_from_pending() {
        let mut run = IsolatedRun::new("sum");
        run.fail(IsolationError::SpawnError("nope".to_string()));
        assert_eq!(run.state(), DispatchState::Failed);

        run.dispatched();
        assert_eq!(run.state(), DispatchState::Failed);
        assert!(run.into_outcome().unwrap().is_err());
    }

    #[test]
    fn test_pending_run_has_no_outcome() {
        let run = IsolatedRun::new("idle");
        assert!(!run.state().is_terminal());
        assert!(run.into_outcome().is_none());
    }

    #[test]
    fn test_port_for() {
        let dispatcher = dispatcher(9200);
        assert_eq!(dispatcher.port_for(0).unwrap(), 9200);
        assert_eq!(dispatcher.port_for(7).unwrap(), 9207);

        let dispatcher = self::dispatcher(u16::MAX);
        assert!(dispatcher.port_for(0).is_ok());
        assert!(matches!(
            dispatcher.port_for(1),
            Err(IsolationError::SpawnError(_))
        ));
    }

    #[test]
    fn test_request_carries_mode_and_instruments() {
        let definition = BenchmarkDefinition::new("sum", Default::default()).unwrap();
        let request = dispatcher(9200).request(&definition);

        assert_eq!(request.definition, definition);
        assert_eq!(request.mode, BenchmarkMode::Ops);
        assert_eq!(request.instruments, vec!["memory"]);
    }

    #[tokio::test]
    async fn test_dispatch_missing_binary_fails() {
        let definition = BenchmarkDefinition::new("sum", Default::default()).unwrap();
        let run = dispatcher(9200).dispatch(0, &definition).await;

        assert_eq!(run.state(), DispatchState::Failed);
        match run.into_outcome() {
            Some(Err(IsolationError::SpawnError(msg))) => assert!(msg.contains("/path/to/bench")),
            other => panic!("Expected spawn error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_run_on_unreachable_worker_times_out() {
        // Nothing listens on port 9 (discard) on loopback in test environments
        let worker = WorkerHandle::connect("http://127.0.0.1:9").unwrap();
        let definition = BenchmarkDefinition::new("sum", Default::default()).unwrap();
        let run = dispatcher(9200).run_on(&worker, &definition).await;

        assert_eq!(run.state(), DispatchState::Failed);
        assert!(matches!(
            run.into_outcome(),
            Some(Err(IsolationError::TimeoutError { .. }))
        ));
    }

    #[test]
    fn test_worker_handle_connect() {
        let handle = WorkerHandle::connect("http://localhost:9200/").unwrap();
        assert!(!handle.is_managed());
        assert!(handle.pid().is_none());
        assert_eq!(handle.base_url(), "http://localhost:9200");

        assert!(matches!(
            WorkerHandle::connect("localhost:9200"),
            Err(IsolationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_isolation_error_display() {
        let err = IsolationError::SpawnError("test error".to_string());
        assert_eq!(err.to_string(), "Failed to spawn worker: test error");

        let err = IsolationError::TimeoutError {
            url: "http://localhost:9200".to_string(),
            timeout_secs: 30,
            last_error: "connection refused".to_string(),
        };
        assert!(err.to_string().contains("not ready after"));
        assert!(err.to_string().contains("30s timeout"));
        assert!(err.to_string().contains("connection refused"));

        let err = IsolationError::WorkerError("crash".to_string());
        assert_eq!(err.to_string(), "Worker error: crash");
    }
}
