//! Single-shot upload handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;
use bytes::Bytes;

use super::{json_response, required};
use crate::errors::UploadError;
use crate::finalize::DEFAULT_CONTENT_TYPE;
use crate::AppState;

/// `POST /api/upload-file?fileName=F` with the whole file as the body.
pub async fn upload_file(
    state: Arc<AppState>,
    query: &HashMap<String, String>,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, UploadError> {
    let file_name = required(query, "fileName")?;
    let declared_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CONTENT_TYPE);

    let artifact = state
        .uploads
        .upload_whole(body, file_name, declared_type)
        .await?;
    Ok(json_response(
        StatusCode::OK,
        &artifact.into_response_body("File uploaded successfully"),
    ))
}
