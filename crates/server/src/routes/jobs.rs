// crates/server/src/routes/jobs.rs
//! Operator-facing job routes.
//!
//! - GET    /jobs            - jobs visible to the caller
//! - POST   /job             - create and add a job from a filter
//! - POST   /job/pivot       - same, as a pivot job
//! - PUT    /job             - update a pending job
//! - GET    /job/{id}        - one job
//! - DELETE /job/{id}        - delete a job
//! - GET    /job/{id}/stream - download the result stream

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use sensorhub_types::{Job, JobFilter, JobId};
use tokio_util::io::ReaderStream;

use crate::error::{ApiError, ApiResult};
use crate::identity::Caller;
use crate::state::AppState;

/// GET /api/jobs - every job the caller may see.
async fn list_jobs(State(state): State<Arc<AppState>>, Caller(requestor): Caller) -> Json<Vec<Job>> {
    Json(state.store.get_jobs(&requestor))
}

/// Any other method on /api/jobs.
async fn method_not_supported() -> ApiError {
    ApiError::MethodNotAllowed
}

/// POST /api/job
async fn create_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Json(filter): Json<JobFilter>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.store.create_job(&requestor).with_filter(filter);
    let job = state.store.add_job(&requestor, job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// POST /api/job/pivot
async fn create_pivot_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Json(filter): Json<JobFilter>,
) -> ApiResult<(StatusCode, Json<Job>)> {
    let job = state.store.create_job(&requestor).with_filter(filter);
    let job = state.store.add_pivot_job(&requestor, job).await?;
    Ok((StatusCode::CREATED, Json(job)))
}

/// PUT /api/job
async fn update_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Json(job): Json<Job>,
) -> ApiResult<Json<Job>> {
    Ok(Json(state.store.update_job(&requestor, job).await?))
}

/// GET /api/job/{id}
async fn get_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    state
        .store
        .get_job(&requestor, id)
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// DELETE /api/job/{id}
async fn delete_job(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path(id): Path<JobId>,
) -> ApiResult<Json<Job>> {
    state
        .store
        .delete_job(&requestor, id)
        .await
        .map(Json)
        .ok_or(ApiError::JobNotFound(id))
}

/// GET /api/job/{id}/stream - the stored result, streamed from disk.
async fn download_stream(
    State(state): State<Arc<AppState>>,
    Caller(requestor): Caller,
    Path(id): Path<JobId>,
) -> ApiResult<Response> {
    let job = state
        .store
        .get_job(&requestor, id)
        .ok_or(ApiError::JobNotFound(id))?;
    let reader = state
        .store
        .load_stream(&requestor, id)
        .await?
        .ok_or(ApiError::JobNotFound(id))?;

    let filename = format!("{}.{}", job.id, job.file_extension);
    let mut headers = vec![
        (
            header::CONTENT_TYPE,
            "application/octet-stream".to_string(),
        ),
        (
            header::CONTENT_DISPOSITION,
            format!("attachment; filename=\"{filename}\""),
        ),
    ];
    if let Some(artifact) = &job.artifact {
        headers.push((header::CONTENT_LENGTH, artifact.size_bytes.to_string()));
    }

    let body = Body::from_stream(ReaderStream::new(reader));
    let mut response = body.into_response();
    for (name, value) in headers {
        let value = value
            .parse()
            .map_err(|_| ApiError::Internal(format!("invalid {name} header for job {id}")))?;
        response.headers_mut().insert(name, value);
    }
    Ok(response)
}

/// Build the jobs router.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs", get(list_jobs).fallback(method_not_supported))
        .route("/job", post(create_job).put(update_job))
        .route("/job/pivot", post(create_pivot_job))
        .route("/job/{id}", get(get_job).delete(delete_job))
        .route("/job/{id}/stream", get(download_stream))
}
