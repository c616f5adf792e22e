// crates/server/src/routes/health.rs
//! Liveness and store readiness.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// What the job store currently holds and owes to disk.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct StoreHealth {
    pub jobs: usize,
    pub nodes: usize,
    /// Job records whose last write failed and waits on the retry worker.
    pub pending_retries: usize,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// `ok`, or `degraded` while job records are waiting on a write retry.
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub store: StoreHealth,
}

fn status_for(store: &StoreHealth) -> &'static str {
    if store.pending_retries == 0 {
        "ok"
    } else {
        "degraded"
    }
}

/// GET /api/health
pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let store = StoreHealth {
        jobs: state.store.job_count(),
        nodes: state.store.nodes().len(),
        pending_retries: state.store.persistence().retries().len(),
    };
    Json(HealthResponse {
        status: status_for(&store).to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.uptime_secs(),
        store,
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}
