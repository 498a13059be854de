//! HTTP handlers that adapt requests to [`crate::upload::UploadService`].

pub mod chunk;
pub mod file;
pub mod finalize;

use std::collections::HashMap;
use std::str::FromStr;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::errors::UploadError;

/// Fetch a required, non-empty query parameter.
pub(crate) fn required<'a>(
    query: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, UploadError> {
    match query.get(name).map(|v| v.trim()) {
        Some(v) if !v.is_empty() => Ok(v),
        _ => Err(UploadError::missing(name)),
    }
}

/// Fetch and parse a required numeric query parameter.
pub(crate) fn required_number<T: FromStr>(
    query: &HashMap<String, String>,
    name: &str,
) -> Result<T, UploadError> {
    let raw = required(query, name)?;
    parse_number(raw, name)
}

pub(crate) fn parse_number<T: FromStr>(raw: &str, name: &str) -> Result<T, UploadError> {
    raw.parse()
        .map_err(|_| UploadError::invalid(format!("{name} must be a non-negative integer, got {raw:?}")))
}

/// Render `body` as a JSON response.
pub(crate) fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response {
    match serde_json::to_string(body) {
        Ok(json) => (status, [("content-type", "application/json")], json).into_response(),
        Err(e) => UploadError::Storage(anyhow::anyhow!("failed to encode response: {e}"))
            .into_response(),
    }
}
