//! HTTP status surface for a worker instance.

use super::worker::{StatusSnapshot, WorkerState, WorkerStatus};
use crate::domain::segments::ENGINE_VERSION;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;

#[derive(Clone)]
struct HealthState {
    workers: Arc<Vec<Arc<WorkerStatus>>>,
}

#[derive(Debug, Serialize)]
struct StatusBody {
    engine_version: &'static str,
    workers: Vec<StatusSnapshot>,
    processed: u64,
    failed: u64,
    dead_lettered: u64,
}

/// `GET /health` answers 200 while any worker is still running, 503 once all
/// have stopped. `GET /status` returns per-worker counters as JSON.
pub fn router(workers: Vec<Arc<WorkerStatus>>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .with_state(HealthState {
            workers: Arc::new(workers),
        })
}

async fn health(State(state): State<HealthState>) -> (StatusCode, &'static str) {
    let running = state
        .workers
        .iter()
        .any(|w| w.state() != WorkerState::Stopped);
    if running {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "stopped")
    }
}

async fn status(State(state): State<HealthState>) -> Json<StatusBody> {
    let workers: Vec<StatusSnapshot> = state.workers.iter().map(|w| w.snapshot()).collect();
    Json(StatusBody {
        engine_version: ENGINE_VERSION,
        processed: workers.iter().map(|w| w.processed).sum(),
        failed: workers.iter().map(|w| w.failed).sum(),
        dead_lettered: workers.iter().map(|w| w.dead_lettered).sum(),
        workers,
    })
}
