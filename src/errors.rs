//! Upload error types.
//!
//! Every variant maps to a stable error code and an HTTP status.  The enum
//! implements [`axum::response::IntoResponse`] so handlers can simply
//! return `Err(UploadError::IncompleteUpload { .. })`.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{json, Value};
use thiserror::Error;

use crate::storage::backend::StoreError;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Failures surfaced by the upload boundary operations.
#[derive(Debug, Error)]
pub enum UploadError {
    /// A required request field is absent or empty.
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A request field is present but malformed.
    #[error("{message}")]
    InvalidArgument { message: String },

    /// The declared file size is above the configured ceiling.
    #[error("Declared size {declared} exceeds the maximum upload size of {limit} bytes")]
    SizeExceeded { declared: u64, limit: u64 },

    /// One chunk payload is above the per-chunk ceiling.
    #[error("Chunk of {size} bytes exceeds the maximum chunk size of {limit} bytes")]
    ChunkTooLarge { size: u64, limit: u64 },

    /// Stored indices do not equal `{0 .. totalChunks-1}`.
    #[error("Upload incomplete: {} chunk(s) missing, {} unexpected", missing.len(), unexpected.len())]
    IncompleteUpload {
        missing: Vec<u32>,
        unexpected: Vec<u32>,
    },

    /// The reassembled length differs from the declared size.
    #[error("Reassembled size {actual} does not match declared size {expected}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// A chunk was not found.
    #[error("Chunk {index} of session {session_id} not found")]
    NotFound { session_id: String, index: u32 },

    /// The session is being finalized, or a finalize found chunk writes
    /// still in flight.  The request may be retried.
    #[error("Session {session_id} is being finalized or still receiving chunks")]
    SessionFinalizing { session_id: String },

    /// I/O failure writing a chunk or the final artifact.
    #[error("Storage failure, please try again")]
    Storage(#[from] anyhow::Error),
}

impl UploadError {
    /// Shorthand for [`UploadError::MissingField`].
    pub fn missing(field: &str) -> Self {
        UploadError::MissingField {
            field: field.to_string(),
        }
    }

    /// Shorthand for [`UploadError::InvalidArgument`].
    pub fn invalid(message: impl Into<String>) -> Self {
        UploadError::InvalidArgument {
            message: message.into(),
        }
    }

    /// Return the stable error code string.
    pub fn code(&self) -> &'static str {
        match self {
            UploadError::MissingField { .. } => "MissingField",
            UploadError::InvalidArgument { .. } => "InvalidArgument",
            UploadError::SizeExceeded { .. } => "SizeExceeded",
            UploadError::ChunkTooLarge { .. } => "ChunkTooLarge",
            UploadError::IncompleteUpload { .. } => "IncompleteUpload",
            UploadError::SizeMismatch { .. } => "SizeMismatch",
            UploadError::NotFound { .. } => "NotFound",
            UploadError::SessionFinalizing { .. } => "SessionFinalizing",
            UploadError::Storage(_) => "StorageError",
        }
    }

    /// Return the appropriate HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            UploadError::MissingField { .. }
            | UploadError::InvalidArgument { .. }
            | UploadError::SizeExceeded { .. }
            | UploadError::ChunkTooLarge { .. }
            | UploadError::IncompleteUpload { .. }
            | UploadError::SizeMismatch { .. } => StatusCode::BAD_REQUEST,
            UploadError::NotFound { .. } => StatusCode::NOT_FOUND,
            UploadError::SessionFinalizing { .. } => StatusCode::CONFLICT,
            UploadError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether repeating the same call unchanged may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            UploadError::SessionFinalizing { .. } | UploadError::Storage(_)
        )
    }

    /// Structured fields for the JSON error body.
    fn details(&self) -> Option<Value> {
        match self {
            UploadError::MissingField { field } => Some(json!({ "field": field })),
            UploadError::SizeExceeded { declared, limit } => {
                Some(json!({ "declared": declared, "limit": limit }))
            }
            UploadError::ChunkTooLarge { size, limit } => {
                Some(json!({ "size": size, "limit": limit }))
            }
            UploadError::IncompleteUpload {
                missing,
                unexpected,
            } => Some(json!({ "missing": missing, "unexpected": unexpected })),
            UploadError::SizeMismatch { expected, actual } => {
                Some(json!({ "expected": expected, "actual": actual }))
            }
            UploadError::NotFound { session_id, index } => {
                Some(json!({ "sessionId": session_id, "index": index }))
            }
            UploadError::SessionFinalizing { session_id } => {
                Some(json!({ "sessionId": session_id }))
            }
            UploadError::InvalidArgument { .. } | UploadError::Storage(_) => None,
        }
    }
}

impl From<StoreError> for UploadError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { session_id, index } => {
                UploadError::NotFound { session_id, index }
            }
            StoreError::InvalidSessionId(id) => {
                UploadError::invalid(format!("Invalid session id: {id:?}"))
            }
            other => UploadError::Storage(anyhow::Error::new(other)),
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let request_id = generate_request_id();
        let status = self.status_code();
        let date = httpdate::fmt_http_date(std::time::SystemTime::now());

        if let UploadError::Storage(ref err) = self {
            tracing::error!(request_id = %request_id, "Storage error: {:#}", err);
        }

        let mut body = json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
            "requestId": request_id,
        });
        if let Some(details) = self.details() {
            body["details"] = details;
        }

        (
            status,
            [
                ("content-type", "application/json".to_string()),
                ("x-request-id", request_id),
                ("date", date),
                ("server", "chunkyard".to_string()),
            ],
            body.to_string(),
        )
            .into_response()
    }
}
