//! HTTP server for isolated benchmark workers.
//!
//! A worker is the benchmark binary relaunched with
//! [`WORKER_PORT_ENV`](calibench_core::WORKER_PORT_ENV) set. It exposes its
//! registry over HTTP so the runner can execute one benchmark per request,
//! each request yielding one aggregated result.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use calibench_core::protocol::{
    BenchmarkListResponse, FailureKind, HealthResponse, RunBenchmarkRequest, RunBenchmarkResponse,
    ShutdownResponse,
};
use calibench_core::{BenchmarkResult, UsageError};
use tokio::net::TcpListener;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::error::EngineError;
use crate::instrument::Pipeline;
use crate::instruments::instrument_by_name;
use crate::lifecycle::run_definition;
use crate::registry::BenchmarkRegistry;

/// Shared state for the HTTP server.
struct AppState {
    /// The benchmark registry containing all registered benchmarks.
    registry: Arc<BenchmarkRegistry>,
    /// Sender to signal shutdown.
    shutdown_tx: watch::Sender<bool>,
}

/// Health check endpoint.
///
/// GET /health
/// Returns: { "status": "healthy" }
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse::healthy())
}

/// List all available benchmarks.
///
/// GET /benchmarks
/// Returns: { "benchmarks": ["bench1", "bench2", ...] }
async fn list_benchmarks(State(state): State<Arc<AppState>>) -> Json<BenchmarkListResponse> {
    let benchmarks = state.registry.list();
    debug!("Listed {} benchmark(s)", benchmarks.len());
    Json(BenchmarkListResponse::new(benchmarks))
}

/// Calibrate and measure one benchmark on a dedicated OS thread.
fn execute(
    registry: &BenchmarkRegistry,
    request: &RunBenchmarkRequest,
) -> Result<BenchmarkResult, EngineError> {
    let instruments = request
        .instruments
        .iter()
        .map(|name| instrument_by_name(name))
        .collect::<Result<Vec<_>, _>>()?;
    let mut pipeline = Pipeline::new(instruments)?;
    run_definition(registry, &request.definition, request.mode, &mut pipeline)
}

/// Run a benchmark to completion.
///
/// POST /run
/// Body: { "definition": {...}, "mode": "ops", "instruments": [...] }
/// Returns: { "result": {...} } or { "error": "..." }
async fn run_benchmark(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RunBenchmarkRequest>,
) -> impl IntoResponse {
    let name = request.definition.name.clone();
    let registry = Arc::clone(&state.registry);
    let (tx, rx) = oneshot::channel();

    // Measurement must not share a thread with the async server
    let spawned = std::thread::Builder::new()
        .name(format!("bench-{name}"))
        .spawn(move || {
            let _ = tx.send(execute(&registry, &request));
        });
    if let Err(e) = spawned {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RunBenchmarkResponse::failure(
                FailureKind::Internal,
                format!("Failed to start benchmark thread: {e}"),
            )),
        );
    }

    match rx.await {
        Ok(Ok(result)) => {
            info!("Ran '{}': {} iterations", name, result.iterations);
            (StatusCode::OK, Json(RunBenchmarkResponse::success(result)))
        }
        Ok(Err(e)) => {
            warn!("Benchmark '{}' failed: {}", name, e);
            let (status, response) = match &e {
                EngineError::Usage(UsageError::UnknownBenchmark(_)) => (
                    StatusCode::NOT_FOUND,
                    RunBenchmarkResponse::failure(FailureKind::Usage, e.to_string()),
                ),
                EngineError::Usage(_) => (
                    StatusCode::BAD_REQUEST,
                    RunBenchmarkResponse::failure(FailureKind::Usage, e.to_string()),
                ),
                // The runner already knows the name
                EngineError::WorkFailed { message, .. } => (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    RunBenchmarkResponse::failure(FailureKind::Work, message.clone()),
                ),
            };
            (status, Json(response))
        }
        Err(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(RunBenchmarkResponse::failure(
                FailureKind::Internal,
                format!("Benchmark thread for '{name}' exited without a result"),
            )),
        ),
    }
}

/// Trigger graceful shutdown of the server.
///
/// POST /shutdown
/// Returns: { "status": "shutting_down" }
async fn shutdown(State(state): State<Arc<AppState>>) -> Json<ShutdownResponse> {
    // Signal shutdown to the server
    let _ = state.shutdown_tx.send(true);
    Json(ShutdownResponse::acknowledged())
}

/// Build the router with all endpoints.
fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/benchmarks", get(list_benchmarks))
        .route("/run", post(run_benchmark))
        .route("/shutdown", post(shutdown))
        .with_state(state)
}

/// Run the worker HTTP server.
///
/// Starts a server on `127.0.0.1:port` and blocks until shutdown is
/// requested via the `/shutdown` endpoint.
///
/// # Errors
///
/// Returns an error if the server fails to bind or encounters a runtime error.
pub fn run_worker(registry: Arc<BenchmarkRegistry>, port: u16) -> anyhow::Result<()> {
    // Create a tokio runtime for the async server
    let runtime = tokio::runtime::Runtime::new()?;

    runtime.block_on(async { run_worker_async(registry, port).await })
}

/// Async implementation of the worker server.
///
/// Use this when you're already in a tokio runtime (e.g., in async tests).
/// For standalone use, prefer `run_worker` which creates its own runtime.
pub async fn run_worker_async(registry: Arc<BenchmarkRegistry>, port: u16) -> anyhow::Result<()> {
    let addr = format!("127.0.0.1:{}", port);
    let listener = TcpListener::bind(&addr).await?;
    serve_worker(registry, listener).await
}

/// Serve the worker endpoints on an already bound listener.
pub async fn serve_worker(
    registry: Arc<BenchmarkRegistry>,
    listener: TcpListener,
) -> anyhow::Result<()> {
    // Create shutdown channel
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let state = Arc::new(AppState {
        registry,
        shutdown_tx,
    });
    let app = build_router(state);

    info!("Benchmark worker listening on {}", listener.local_addr()?);

    // Run the server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            // Wait for shutdown signal
            while !*shutdown_rx.borrow() {
                if shutdown_rx.changed().await.is_err() {
                    break;
                }
            }
            info!("Shutting down benchmark worker");
        })
        .await?;

    Ok(())
}
