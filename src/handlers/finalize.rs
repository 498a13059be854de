//! Finalize handler.

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::Response;
use serde_json::Value;

use super::json_response;
use crate::errors::UploadError;
use crate::finalize::FinalizeRequest;
use crate::AppState;

/// Fields the finalize body must carry.
const REQUIRED_FIELDS: &[&str] = &["fileName", "totalChunks", "fileSize"];

/// `POST /api/uploads/{sessionId}/finalize`
pub async fn finalize_upload(
    state: Arc<AppState>,
    session_id: &str,
    body: &[u8],
) -> Result<Response, UploadError> {
    let mut req = parse_request(body)?;
    req.session_id = session_id.to_string();

    let artifact = state.uploads.finalize_upload(req).await?;
    Ok(json_response(
        StatusCode::OK,
        &artifact.into_response_body("File uploaded and merged successfully"),
    ))
}

fn parse_request(body: &[u8]) -> Result<FinalizeRequest, UploadError> {
    if body.is_empty() {
        return Err(UploadError::missing("body"));
    }
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| UploadError::invalid(format!("Malformed JSON body: {e}")))?;

    for field in REQUIRED_FIELDS {
        match value.get(field) {
            None | Some(Value::Null) => return Err(UploadError::missing(field)),
            Some(Value::String(s)) if s.trim().is_empty() => {
                return Err(UploadError::missing(field))
            }
            _ => {}
        }
    }

    serde_json::from_value(value)
        .map_err(|e| UploadError::invalid(format!("Invalid finalize request: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_ok() {
        let req = parse_request(
            br#"{"fileName":"a.pdf","totalChunks":2,"fileSize":5,"fileType":"application/pdf"}"#,
        )
        .unwrap();
        assert_eq!(req.file_name, "a.pdf");
        assert_eq!(req.declared_type, "application/pdf");
    }

    #[test]
    fn test_parse_request_missing_field() {
        match parse_request(br#"{"fileName":"a.pdf","totalChunks":2}"#) {
            Err(UploadError::MissingField { field }) => assert_eq!(field, "fileSize"),
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            parse_request(br#"{"fileName":"","totalChunks":2,"fileSize":1}"#),
            Err(UploadError::MissingField { .. })
        ));
    }

    #[test]
    fn test_parse_request_wrong_types() {
        assert!(matches!(
            parse_request(br#"{"fileName":"a","totalChunks":"two","fileSize":1}"#),
            Err(UploadError::InvalidArgument { .. })
        ));
        assert!(matches!(
            parse_request(b"not json"),
            Err(UploadError::InvalidArgument { .. })
        ));
    }
}
