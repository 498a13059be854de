//! Chunk transports.
//!
//! [`ChunkTransport`] is the seam between the orchestrator and the upload
//! boundary.  [`HttpTransport`] speaks the HTTP protocol with `reqwest`;
//! [`InProcessTransport`] calls an [`UploadService`] directly.

use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

use crate::errors::UploadError;
use crate::finalize::{ArtifactResponse, FinalArtifact, FinalizeRequest};
use crate::upload::{ChunkAck, ChunkUpload, UploadService};

/// Failure of one transport call.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request never got a response (connect, timeout, body decode).
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an error status.
    #[error("server rejected request ({status} {code}): {message}")]
    Rejected {
        status: u16,
        code: String,
        message: String,
    },

    /// The in-process service returned an error.
    #[error(transparent)]
    Upload(#[from] UploadError),
}

impl TransportError {
    /// Transport errors, 5xx and 409 may succeed when repeated; other
    /// rejections will not.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransportError::Request(_) => true,
            TransportError::Rejected { status, .. } => *status >= 500 || *status == 409,
            TransportError::Upload(e) => e.is_retryable(),
        }
    }

    /// Error code reported by the server, if any.
    pub fn code(&self) -> Option<&str> {
        match self {
            TransportError::Request(_) => None,
            TransportError::Rejected { code, .. } => Some(code),
            TransportError::Upload(e) => Some(e.code()),
        }
    }
}

/// Boxed future returned by [`ChunkTransport`] methods.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Carries chunk writes, finalize and single-shot uploads to the server.
pub trait ChunkTransport: Send + Sync + 'static {
    fn upload_chunk(&self, chunk: ChunkUpload) -> TransportFuture<'_, ChunkAck>;

    fn finalize(&self, req: FinalizeRequest) -> TransportFuture<'_, FinalArtifact>;

    fn upload_whole(
        &self,
        data: Bytes,
        file_name: String,
        declared_type: String,
    ) -> TransportFuture<'_, FinalArtifact>;
}

// ── HTTP ───────────────────────────────────────────────────────────────

/// `reqwest` client for a chunkyard server.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    http: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }
}

/// Turn a non-success response into [`TransportError::Rejected`].
async fn rejected(response: reqwest::Response) -> TransportError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let parsed: Option<serde_json::Value> = serde_json::from_str(&body).ok();
    let field = |name: &str| {
        parsed
            .as_ref()
            .and_then(|v| v.get(name))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    };
    TransportError::Rejected {
        status: status.as_u16(),
        code: field("code").unwrap_or_else(|| format!("Http{}", status.as_u16())),
        message: field("message").unwrap_or(body),
    }
}

impl ChunkTransport for HttpTransport {
    fn upload_chunk(&self, chunk: ChunkUpload) -> TransportFuture<'_, ChunkAck> {
        Box::pin(async move {
            let url = format!(
                "{}/api/uploads/{}/chunks/{}",
                self.base_url, chunk.session_id, chunk.index
            );
            let response = self
                .http
                .put(&url)
                .query(&[
                    ("totalChunks", chunk.total_chunks.to_string()),
                    ("fileName", chunk.file_name),
                    ("fileSize", chunk.declared_size.to_string()),
                ])
                .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
                .body(chunk.data)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(rejected(response).await);
            }
            Ok(response.json::<ChunkAck>().await?)
        })
    }

    fn finalize(&self, req: FinalizeRequest) -> TransportFuture<'_, FinalArtifact> {
        Box::pin(async move {
            let url = format!("{}/api/uploads/{}/finalize", self.base_url, req.session_id);
            let response = self.http.post(&url).json(&req).send().await?;
            if !response.status().is_success() {
                return Err(rejected(response).await);
            }
            Ok(response.json::<ArtifactResponse>().await?.into())
        })
    }

    fn upload_whole(
        &self,
        data: Bytes,
        file_name: String,
        declared_type: String,
    ) -> TransportFuture<'_, FinalArtifact> {
        Box::pin(async move {
            let url = format!("{}/api/upload-file", self.base_url);
            let response = self
                .http
                .post(&url)
                .query(&[("fileName", file_name)])
                .header(reqwest::header::CONTENT_TYPE, declared_type)
                .body(data)
                .send()
                .await?;
            if !response.status().is_success() {
                return Err(rejected(response).await);
            }
            Ok(response.json::<ArtifactResponse>().await?.into())
        })
    }
}

// ── In-process ─────────────────────────────────────────────────────────

/// Calls an [`UploadService`] in the same process.
#[derive(Clone)]
pub struct InProcessTransport {
    service: Arc<UploadService>,
}

impl InProcessTransport {
    pub fn new(service: Arc<UploadService>) -> Self {
        Self { service }
    }
}

impl ChunkTransport for InProcessTransport {
    fn upload_chunk(&self, chunk: ChunkUpload) -> TransportFuture<'_, ChunkAck> {
        Box::pin(async move { Ok(self.service.upload_chunk(chunk).await?) })
    }

    fn finalize(&self, req: FinalizeRequest) -> TransportFuture<'_, FinalArtifact> {
        Box::pin(async move { Ok(self.service.finalize_upload(req).await?) })
    }

    fn upload_whole(
        &self,
        data: Bytes,
        file_name: String,
        declared_type: String,
    ) -> TransportFuture<'_, FinalArtifact> {
        Box::pin(async move {
            Ok(self
                .service
                .upload_whole(data, &file_name, &declared_type)
                .await?)
        })
    }
}
