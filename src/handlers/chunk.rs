//! Chunk write, session status and abort handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;

use super::{json_response, parse_number, required, required_number};
use crate::errors::UploadError;
use crate::upload::ChunkUpload;
use crate::AppState;

/// `PUT /api/uploads/{sessionId}/chunks/{index}?totalChunks&fileName&fileSize`
pub async fn upload_chunk(
    state: Arc<AppState>,
    session_id: &str,
    index: &str,
    query: &HashMap<String, String>,
    body: Bytes,
) -> Result<Response, UploadError> {
    let total_chunks: u32 = required_number(query, "totalChunks")?;
    let file_name = required(query, "fileName")?;
    let declared_size: u64 = required_number(query, "fileSize")?;
    let index: u32 = parse_number(index, "chunkIndex")?;

    let ack = state
        .uploads
        .upload_chunk(ChunkUpload {
            session_id: session_id.to_string(),
            index,
            total_chunks,
            file_name: file_name.to_string(),
            declared_size,
            data: body,
        })
        .await?;

    Ok(json_response(StatusCode::OK, &ack))
}

/// `GET /api/uploads/{sessionId}[?totalChunks=N]`
pub async fn session_status(
    state: Arc<AppState>,
    session_id: &str,
    query: &HashMap<String, String>,
) -> Result<Response, UploadError> {
    let total_chunks = match query.get("totalChunks") {
        Some(raw) if !raw.is_empty() => Some(parse_number::<u32>(raw, "totalChunks")?),
        _ => None,
    };
    let status = state
        .uploads
        .session_status(session_id, total_chunks)
        .await?;
    Ok(json_response(StatusCode::OK, &status))
}

/// `DELETE /api/uploads/{sessionId}`
pub async fn abort_session(state: Arc<AppState>, session_id: &str) -> Result<Response, UploadError> {
    state.uploads.abort_session(session_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
