//! Axum router construction and upload route mapping.
//!
//! The [`app`] function wires every upload endpoint to its handler, mounts
//! the published artifact directory under its public prefix, and returns a
//! ready-to-serve [`axum::Router`].

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, RawQuery, State},
    http::{header, HeaderMap, HeaderValue, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::errors::{generate_request_id, UploadError};
use crate::metrics::{metrics_handler, metrics_middleware};
use crate::AppState;

/// Build the axum [`Router`] with all upload routes.
///
/// The returned router is ready to be passed to `axum::serve`.
pub fn app(state: Arc<AppState>) -> Router {
    let observability = &state.config.observability;
    // One byte over the ceiling so an exactly-oversized body still reaches
    // the size check; anything larger is mapped by `buffered_body`.
    let body_limit = usize::try_from(state.config.limits.max_upload_size.saturating_add(1))
        .unwrap_or(usize::MAX);

    let mut router = Router::new()
        .route("/api/upload-file", post(handle_upload_file))
        .route(
            "/api/uploads/:session_id",
            get(handle_session_status).delete(handle_abort_session),
        )
        .route(
            "/api/uploads/:session_id/chunks/:index",
            put(handle_upload_chunk),
        )
        .route(
            "/api/uploads/:session_id/finalize",
            post(handle_finalize),
        );

    if observability.health_check {
        router = router.route("/health", get(health_check));
    }
    if observability.metrics {
        router = router.route("/metrics", get(metrics_handler));
    }

    let artifacts = ServeDir::new(state.artifacts.dir());
    router = match state.artifacts.public_prefix() {
        "" => router.fallback_service(artifacts),
        prefix => router.nest_service(prefix, artifacts),
    };

    router
        // Application state shared across all handlers.
        .with_state(state)
        // Layer ordering: inner layers run first, outer layers wrap them.
        .layer(middleware::from_fn(common_headers_middleware))
        .layer(TraceLayer::new_for_http())
        // metrics_middleware is outer (captures full request lifecycle).
        .layer(middleware::from_fn(metrics_middleware))
        // Whole-file uploads may be as large as the artifact ceiling.
        .layer(DefaultBodyLimit::max(body_limit))
}

// -- Common headers middleware -----------------------------------------------

/// Tower middleware that adds common response headers to every response:
/// - `x-request-id`: 16-character uppercase hex string
/// - `Date`: RFC 7231 formatted timestamp
/// - `Server`: `chunkyard`
async fn common_headers_middleware(req: Request<axum::body::Body>, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    // Only set x-request-id if not already present (error handler may set it)
    if !headers.contains_key("x-request-id") {
        if let Ok(value) = HeaderValue::from_str(&generate_request_id()) {
            headers.insert("x-request-id", value);
        }
    }

    let date = httpdate::fmt_http_date(std::time::SystemTime::now());
    if let Ok(value) = HeaderValue::from_str(&date) {
        headers.insert("date", value);
    }
    headers.insert("server", HeaderValue::from_static("chunkyard"));

    response
}

// -- Health check -------------------------------------------------------------

/// `GET /health` -- Returns `{"status": "ok", "limits": {...}}` with 200 OK.
///
/// `limits` advertises the upload ceilings and the suggested client chunking.
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let limits = &state.config.limits;
    let body = serde_json::json!({
        "status": "ok",
        "limits": {
            "maxUploadSize": limits.max_upload_size,
            "maxChunkSize": limits.max_chunk_size,
            "chunkSize": limits.chunk_size,
            "chunkingThreshold": limits.chunking_threshold,
        },
    });
    crate::handlers::json_response(StatusCode::OK, &body)
}

// -- Body buffering -----------------------------------------------------------

/// Map a failed body extraction onto the upload error taxonomy.
///
/// Bodies over the router's length limit become `too_large(length)`, where
/// `length` is the declared `Content-Length` (0 if absent).
fn buffered_body(
    body: Result<Bytes, BytesRejection>,
    headers: &HeaderMap,
    too_large: impl FnOnce(u64) -> UploadError,
) -> Result<Bytes, UploadError> {
    match body {
        Ok(bytes) => Ok(bytes),
        Err(rejection) if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE => {
            let length = headers
                .get(header::CONTENT_LENGTH)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(0);
            Err(too_large(length))
        }
        Err(rejection) => Err(UploadError::invalid(rejection.body_text())),
    }
}

// -- Query parameter parsing helper ------------------------------------------

/// Parse raw query string into a HashMap.
fn parse_query(raw: Option<String>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    if let Some(qs) = raw {
        for part in qs.split('&') {
            let (k, v) = part.split_once('=').unwrap_or((part, ""));
            if k.is_empty() {
                continue;
            }
            map.insert(decode_component(k), decode_component(v));
        }
    }
    map
}

/// Percent-decode one query component, treating `+` as a space.
fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_encoding::percent_decode_str(&spaced)
        .decode_utf8_lossy()
        .into_owned()
}

// -- Route adapters -----------------------------------------------------------

/// `PUT /api/uploads/:session_id/chunks/:index` -- UploadChunk
async fn handle_upload_chunk(
    State(state): State<Arc<AppState>>,
    Path((session_id, index)): Path<(String, String)>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, UploadError> {
    let limit = state.config.limits.max_chunk_size;
    let body = buffered_body(body, &headers, |length| UploadError::ChunkTooLarge {
        size: length.max(limit.saturating_add(1)),
        limit,
    })?;
    let query = parse_query(raw_query);
    crate::handlers::chunk::upload_chunk(state, &session_id, &index, &query, body).await
}

/// `POST /api/uploads/:session_id/finalize` -- FinalizeUpload
async fn handle_finalize(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    body: Bytes,
) -> Result<Response, UploadError> {
    crate::handlers::finalize::finalize_upload(state, &session_id, &body).await
}

/// `POST /api/upload-file?fileName=F` -- UploadWhole
async fn handle_upload_file(
    State(state): State<Arc<AppState>>,
    RawQuery(raw_query): RawQuery,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, UploadError> {
    let limit = state.config.limits.max_upload_size;
    let body = buffered_body(body, &headers, |length| UploadError::SizeExceeded {
        declared: length.max(limit.saturating_add(1)),
        limit,
    })?;
    let query = parse_query(raw_query);
    crate::handlers::file::upload_file(state, &query, &headers, body).await
}

/// `GET /api/uploads/:session_id` -- session status
async fn handle_session_status(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    RawQuery(raw_query): RawQuery,
) -> Result<Response, UploadError> {
    let query = parse_query(raw_query);
    crate::handlers::chunk::session_status(state, &session_id, &query).await
}

/// `DELETE /api/uploads/:session_id` -- abort
async fn handle_abort_session(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<Response, UploadError> {
    crate::handlers::chunk::abort_session(state, &session_id).await
}
