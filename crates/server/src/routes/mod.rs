// crates/server/src/routes/mod.rs
//! API route handlers for the sensorhub server.

pub mod health;
pub mod jobs;
pub mod metrics;
pub mod nodes;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

/// Create the combined router: API routes under /api plus /metrics.
///
/// Routes:
/// - GET /api/health - Health check
/// - GET /api/jobs - Jobs visible to the caller
/// - POST /api/job, POST /api/job/pivot, PUT /api/job - Create, pivot, update
/// - GET|DELETE /api/job/{id}, GET /api/job/{id}/stream
/// - GET /api/nodes, POST /api/node
/// - GET /api/node/{node_id}/job - Poll for work
/// - PUT /api/node/{node_id}/job/{id}/start|complete|fail
/// - GET /metrics - Prometheus metrics
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api", health::router())
        .nest("/api", jobs::router())
        .nest("/api", nodes::router())
        .merge(metrics::router())
        .with_state(state)
}
