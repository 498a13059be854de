//! Prometheus metrics for chunkyard.
//!
//! Installs a global Prometheus recorder using `metrics-exporter-prometheus`,
//! defines metric name constants, provides a Tower-compatible middleware for
//! HTTP RED metrics, and exposes the `/metrics` endpoint handler.

use axum::http::{Request, StatusCode};
use axum::response::{IntoResponse, Response};
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

// -- Metric name constants ----------------------------------------------------

/// Total HTTP requests (counter). Labels: method, path, status.
pub const HTTP_REQUESTS_TOTAL: &str = "chunkyard_http_requests_total";

/// HTTP request duration in seconds (histogram). Labels: method, path.
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "chunkyard_http_request_duration_seconds";

/// Chunks durably stored (counter).
pub const CHUNKS_RECEIVED_TOTAL: &str = "chunkyard_chunks_received_total";

/// Chunk payload bytes durably stored (counter).
pub const CHUNK_BYTES_RECEIVED_TOTAL: &str = "chunkyard_chunk_bytes_received_total";

/// Finalize attempts (counter). Labels: outcome.
pub const FINALIZE_TOTAL: &str = "chunkyard_finalize_total";

/// Bytes published as final artifacts (counter).
pub const ARTIFACT_BYTES_WRITTEN_TOTAL: &str = "chunkyard_artifact_bytes_written_total";

/// Orphaned sessions deleted by the sweep (counter).
pub const SESSIONS_RECLAIMED_TOTAL: &str = "chunkyard_sessions_reclaimed_total";

// -- Global recorder installation ---------------------------------------------

/// Singleton handle to the Prometheus recorder.
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the global Prometheus metrics recorder. Idempotent -- safe to call
/// multiple times (e.g. in tests). Returns a reference to the global handle.
pub fn init_metrics() -> &'static PrometheusHandle {
    PROMETHEUS_HANDLE.get_or_init(|| {
        PrometheusBuilder::new()
            .install_recorder()
            .expect("failed to install Prometheus recorder")
    })
}

/// Register metric descriptions with the global recorder. Call once after
/// `init_metrics()`.
pub fn describe_metrics() {
    describe_counter!(HTTP_REQUESTS_TOTAL, "Total HTTP requests");
    describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "HTTP request duration in seconds"
    );
    describe_counter!(CHUNKS_RECEIVED_TOTAL, "Chunks durably stored");
    describe_counter!(CHUNK_BYTES_RECEIVED_TOTAL, "Chunk payload bytes durably stored");
    describe_counter!(FINALIZE_TOTAL, "Finalize attempts by outcome");
    describe_counter!(
        ARTIFACT_BYTES_WRITTEN_TOTAL,
        "Bytes published as final artifacts"
    );
    describe_counter!(SESSIONS_RECLAIMED_TOTAL, "Orphaned sessions reclaimed");
}

// -- Metrics middleware -------------------------------------------------------

/// Axum middleware that records HTTP RED metrics for every request.
///
/// Excludes `/metrics` from self-instrumentation to avoid feedback loops.
/// Must be the outermost layer so it captures the full request lifecycle.
pub async fn metrics_middleware(
    req: Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Response {
    if req.uri().path() == "/metrics" {
        return next.run(req).await;
    }

    let method = req.method().to_string();
    let path = normalize_path(req.uri().path());

    let start = Instant::now();
    let response = next.run(req).await;
    let duration = start.elapsed().as_secs_f64();
    let status = response.status().as_u16().to_string();

    counter!(HTTP_REQUESTS_TOTAL, "method" => method.clone(), "path" => path.clone(), "status" => status).increment(1);
    histogram!(HTTP_REQUEST_DURATION_SECONDS, "method" => method, "path" => path).record(duration);

    response
}

// -- Path normalization -------------------------------------------------------

/// Normalize an actual request path to a route template for metric labels.
///
/// This prevents high-cardinality labels from session ids and stored names.
///
/// Examples:
/// - `/health` -> `/health`
/// - `/api/uploads/abc/chunks/3` -> `/api/uploads/{session}/chunks/{index}`
/// - `/api/uploads/abc/finalize` -> `/api/uploads/{session}/finalize`
/// - `/api/uploads/abc` -> `/api/uploads/{session}`
/// - `/uploads/1718000000000_a.pdf` -> `/uploads/{file}`
pub(crate) fn normalize_path(path: &str) -> String {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    match segments.as_slice() {
        [""] => "/".to_string(),
        ["health"] | ["metrics"] => path.to_string(),
        ["api", "upload-file"] => "/api/upload-file".to_string(),
        ["api", "uploads", _] => "/api/uploads/{session}".to_string(),
        ["api", "uploads", _, "finalize"] => "/api/uploads/{session}/finalize".to_string(),
        ["api", "uploads", _, "chunks", _] => "/api/uploads/{session}/chunks/{index}".to_string(),
        ["uploads", ..] => "/uploads/{file}".to_string(),
        _ => "/{other}".to_string(),
    }
}

// -- Metrics endpoint handler -------------------------------------------------

/// `GET /metrics` -- Render Prometheus exposition format text.
pub async fn metrics_handler() -> Response {
    match PROMETHEUS_HANDLE.get() {
        Some(handle) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "metrics recorder not installed").into_response(),
    }
}

// -- Tests --------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_root_and_probes() {
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path("/health"), "/health");
        assert_eq!(normalize_path("/metrics"), "/metrics");
    }

    #[test]
    fn test_normalize_path_chunk_routes() {
        assert_eq!(
            normalize_path("/api/uploads/1718_abc/chunks/12"),
            "/api/uploads/{session}/chunks/{index}"
        );
        assert_eq!(
            normalize_path("/api/uploads/1718_abc/finalize"),
            "/api/uploads/{session}/finalize"
        );
        assert_eq!(normalize_path("/api/uploads/1718_abc"), "/api/uploads/{session}");
        assert_eq!(normalize_path("/api/upload-file"), "/api/upload-file");
    }

    #[test]
    fn test_normalize_path_artifacts_and_unknown() {
        assert_eq!(normalize_path("/uploads/1_a.pdf"), "/uploads/{file}");
        assert_eq!(normalize_path("/favicon.ico"), "/{other}");
        assert_eq!(normalize_path("/a/b/c/d/e/f"), "/{other}");
    }
}
