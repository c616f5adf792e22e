// crates/server/src/metrics.rs
//! Application metrics for Prometheus monitoring.
//!
//! This module provides:
//! - Prometheus metrics recorder initialization
//! - Descriptions for the counters recorded by the job store
//! - Request counting and timing middleware

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Global Prometheus handle for rendering metrics.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Returns `true` if initialization succeeded, `false` if already initialized.
pub fn init_metrics() -> bool {
    if PROMETHEUS_HANDLE.get().is_some() {
        return false;
    }

    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    if metrics::set_global_recorder(recorder).is_err() {
        tracing::warn!("Failed to set global metrics recorder (already set)");
        return false;
    }

    if PROMETHEUS_HANDLE.set(handle).is_err() {
        tracing::warn!("Failed to store Prometheus handle (already set)");
    }

    describe_metrics();

    tracing::info!("Prometheus metrics initialized");
    true
}

fn describe_metrics() {
    describe_counter!("sensorhub_requests_total", "Total number of API requests");
    describe_histogram!(
        "sensorhub_request_duration_seconds",
        "Duration of API requests in seconds"
    );

    describe_counter!("sensorhub_jobs_added_total", "Jobs accepted into the store");
    describe_counter!("sensorhub_jobs_claimed_total", "Jobs handed to a polling node");
    describe_counter!("sensorhub_jobs_completed_total", "Jobs completed with a result stream");
    describe_counter!("sensorhub_jobs_failed_total", "Jobs reported failed by a node");

    describe_counter!(
        "sensorhub_persistence_deferred_total",
        "Job record writes that failed and were queued for retry"
    );
    describe_counter!(
        "sensorhub_persistence_retries_total",
        "Retried job record writes"
    );
    describe_counter!(
        "sensorhub_persistence_dropped_total",
        "Job record writes abandoned after exhausting retries"
    );
}

/// Render current metrics in Prometheus text format.
///
/// Returns `None` if metrics are not initialized.
pub fn render_metrics() -> Option<String> {
    PROMETHEUS_HANDLE.get().map(|h| h.render())
}

/// Record a completed API request.
pub fn record_request(endpoint: &str, method: &str, status: u16, duration: Duration) {
    counter!(
        "sensorhub_requests_total",
        "endpoint" => endpoint.to_string(),
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
    histogram!("sensorhub_request_duration_seconds", "endpoint" => endpoint.to_string())
        .record(duration.as_secs_f64());
}

/// Middleware that records every request against its route template.
pub async fn track_requests(request: Request, next: Next) -> Response {
    let start = Instant::now();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());
    let method = request.method().to_string();

    let response = next.run(request).await;

    record_request(&endpoint, &method, response.status().as_u16(), start.elapsed());
    response
}
