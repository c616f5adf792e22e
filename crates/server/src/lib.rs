// crates/server/src/lib.rs
//! Sensorhub server library.
//!
//! Axum HTTP front end for the job store: operators create and inspect jobs,
//! sensor nodes poll for work and upload results.

pub mod config;
pub mod error;
pub mod identity;
pub mod metrics;
pub mod routes;
pub mod shutdown;
pub mod state;

pub use config::ServerConfig;
pub use error::*;
pub use metrics::{init_metrics, render_metrics};
pub use routes::api_routes;
pub use state::AppState;

use std::sync::Arc;

use axum::Router;
use sensorhub_core::JobStore;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Create the Axum application with all routes and middleware.
///
/// This sets up:
/// - API routes (health, jobs, nodes) and /metrics
/// - Request counting and timing
/// - CORS (allows any origin)
/// - Request tracing
pub fn create_app(store: Arc<JobStore>) -> Router {
    let state = AppState::new(store);

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(api_routes(state))
        .layer(axum::middleware::from_fn(metrics::track_requests))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
