// crates/server/src/routes/nodes.rs
//! Node-facing routes: registration, polling, and the result contract.
//!
//! Every route except the node listing requires the `jobs:process` permission.

use std::io;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use futures_util::TryStreamExt;
use sensorhub_core::authz;
use sensorhub_types::{Job, JobId, Node, Requestor};
use serde::Deserialize;
use tokio_util::io::StreamReader;

use crate::error::{ApiError, ApiResult};
use crate::identity::Caller;
use crate::state::AppState;

/// Body of a failure report.
#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub error: String,
}

fn require_process(requestor: &Requestor) -> ApiResult<()> {
    if authz::can_process(requestor) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(format!(
            "user {} may not act as a sensor node",
            requestor.user_id
        )))
    }
}

/// GET /api/nodes
async fn list_nodes(State(state): State<Arc<AppState>>, Caller(requestor): Caller) -> Json<Vec<Node>> {
    Json(state.store.list_nodes(&requestor))
}

/// POST /api/node - register or refresh a node.
async fn register_node(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Json(node): Json<Node>,
) -> ApiResult<Json<Node>> {
    require_process(&requestor)?;
    if node.id.trim().is_empty() {
        return Err(ApiError::BadRequest("node id must not be empty".into()));
    }
    Ok(Json(state.store.register_node(node)))
}

/// GET /api/node/{node_id}/job - claim the next job, 204 when there is none.
async fn poll_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path(node_id): Path<String>,
) -> ApiResult<Response> {
    require_process(&requestor)?;
    Ok(match state.store.next_job_for_node(&node_id).await {
        Some(job) => Json(job).into_response(),
        None => StatusCode::NO_CONTENT.into_response(),
    })
}

/// PUT /api/node/{node_id}/job/{id}/start
async fn start_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path((node_id, id)): Path<(String, JobId)>,
) -> ApiResult<Json<Job>> {
    require_process(&requestor)?;
    Ok(Json(state.store.start_job(&node_id, id).await?))
}

/// PUT /api/node/{node_id}/job/{id}/complete - the request body is the result stream.
async fn complete_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path((node_id, id)): Path<(String, JobId)>,
    body: Body,
) -> ApiResult<Json<Job>> {
    require_process(&requestor)?;
    let stream = body
        .into_data_stream()
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
    let mut reader = StreamReader::new(Box::pin(stream));
    Ok(Json(state.store.complete_job(&node_id, id, &mut reader).await?))
}

/// PUT /api/node/{node_id}/job/{id}/fail
async fn fail_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path((node_id, id)): Path<(String, JobId)>,
    Json(request): Json<FailRequest>,
) -> ApiResult<Json<Job>> {
    require_process(&requestor)?;
    Ok(Json(state.store.fail_job(&node_id, id, request.error).await?))
}

/// Build the nodes router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/nodes", get(list_nodes))
        .route("/node", post(register_node))
        .route("/node/{node_id}/job", get(poll_job))
        .route("/node/{node_id}/job/{id}/start", put(start_job))
        .route("/node/{node_id}/job/{id}/complete", put(complete_job))
        .route("/node/{node_id}/job/{id}/fail", put(fail_job))
}
