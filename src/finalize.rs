//! Finalizer / reassembler.
//!
//! Finalization re-derives completeness from the chunk store, streams the
//! chunks in ascending index order into a scratch file, verifies the byte
//! count against the declared size, and only then publishes the artifact.
//! The chunk scope is deleted after publication; every earlier failure
//! leaves it intact so the caller can resend chunks and finalize again.

use anyhow::Context;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::UploadError;
use crate::session::{completeness, validate_session_id};
use crate::storage::artifacts::{ArtifactStore, CommittedArtifact};
use crate::storage::backend::{ChunkStore, StoreError};

/// Declared type used when the client sends none.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

fn default_content_type() -> String {
    DEFAULT_CONTENT_TYPE.to_string()
}

/// Parameters of one finalize call.  The JSON form is the request body of
/// `POST /api/uploads/{sessionId}/finalize`; `session_id` comes from the path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeRequest {
    #[serde(skip)]
    pub session_id: String,
    pub file_name: String,
    pub total_chunks: u32,
    #[serde(rename = "fileSize")]
    pub declared_size: u64,
    #[serde(rename = "fileType", default = "default_content_type")]
    pub declared_type: String,
}

/// The published, reassembled file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinalArtifact {
    /// Public address, e.g. `/uploads/1718000000000_report.pdf`.
    pub path: String,
    pub original_name: String,
    pub stored_name: String,
    pub size: u64,
    pub declared_type: String,
    /// Hex SHA-256 of the stored bytes.
    pub sha256: String,
}

impl FinalArtifact {
    fn from_committed(
        committed: CommittedArtifact,
        artifacts: &ArtifactStore,
        original_name: &str,
        declared_type: &str,
    ) -> Self {
        Self {
            path: artifacts.public_path(&committed.stored_name),
            original_name: original_name.to_string(),
            stored_name: committed.stored_name,
            size: committed.size,
            declared_type: declared_type.to_string(),
            sha256: committed.sha256,
        }
    }

    /// Wrap in the JSON success envelope.
    pub fn into_response_body(self, message: &str) -> ArtifactResponse {
        ArtifactResponse {
            success: true,
            message: message.to_string(),
            file_path: self.path,
            file_info: FileInfo {
                original_name: self.original_name,
                file_name: self.stored_name,
                size: self.size,
                file_type: self.declared_type,
                sha256: self.sha256,
            },
        }
    }
}

/// JSON envelope returned by finalize and single-shot upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactResponse {
    pub success: bool,
    pub message: String,
    pub file_path: String,
    pub file_info: FileInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    pub original_name: String,
    /// Stored name.
    pub file_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub file_type: String,
    #[serde(default)]
    pub sha256: String,
}

impl From<ArtifactResponse> for FinalArtifact {
    fn from(resp: ArtifactResponse) -> Self {
        Self {
            path: resp.file_path,
            original_name: resp.file_info.original_name,
            stored_name: resp.file_info.file_name,
            size: resp.file_info.size,
            declared_type: resp.file_info.file_type,
            sha256: resp.file_info.sha256,
        }
    }
}

/// Reassembles sessions and publishes single-shot uploads.
pub struct Finalizer {
    store: Arc<dyn ChunkStore>,
    artifacts: Arc<ArtifactStore>,
    max_upload_size: u64,
}

impl Finalizer {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        artifacts: Arc<ArtifactStore>,
        max_upload_size: u64,
    ) -> Self {
        Self {
            store,
            artifacts,
            max_upload_size,
        }
    }

    pub fn max_upload_size(&self) -> u64 {
        self.max_upload_size
    }

    /// Reject declared sizes above the configured ceiling.
    pub fn check_size(&self, declared: u64) -> Result<(), UploadError> {
        if declared > self.max_upload_size {
            return Err(UploadError::SizeExceeded {
                declared,
                limit: self.max_upload_size,
            });
        }
        Ok(())
    }

    /// Reassemble `req.session_id` into a published artifact.
    pub async fn finalize(&self, req: &FinalizeRequest) -> Result<FinalArtifact, UploadError> {
        validate_session_id(&req.session_id)?;
        if req.file_name.trim().is_empty() {
            return Err(UploadError::missing("fileName"));
        }
        self.check_size(req.declared_size)?;
        if req.total_chunks == 0 {
            return Err(UploadError::invalid("totalChunks must be at least 1"));
        }

        let session_id = req.session_id.as_str();
        let stored = self.store.list_indices(session_id).await?;
        completeness(&stored, req.total_chunks).into_result()?;

        let mut writer = self
            .artifacts
            .begin()
            .await
            .context("opening scratch artifact")?;

        for index in 0..req.total_chunks {
            let chunk = match self.store.read_chunk(session_id, index).await {
                Ok(chunk) => chunk,
                Err(StoreError::NotFound { .. }) => {
                    // Deleted between listing and reading.
                    writer.discard().await;
                    return Err(UploadError::IncompleteUpload {
                        missing: vec![index],
                        unexpected: Vec::new(),
                    });
                }
                Err(e) => {
                    writer.discard().await;
                    return Err(e.into());
                }
            };

            let seen = writer.written() + chunk.len() as u64;
            if seen > req.declared_size {
                writer.discard().await;
                return Err(UploadError::SizeMismatch {
                    expected: req.declared_size,
                    actual: seen,
                });
            }
            writer
                .write(&chunk)
                .await
                .context("writing scratch artifact")?;
        }

        if writer.written() != req.declared_size {
            let actual = writer.written();
            writer.discard().await;
            return Err(UploadError::SizeMismatch {
                expected: req.declared_size,
                actual,
            });
        }

        let stored_name = self.artifacts.unique_name(&req.file_name);
        let committed = writer
            .commit(&self.artifacts, &stored_name)
            .await
            .context("publishing artifact")?;

        if let Err(e) = self.store.delete_session(session_id).await {
            warn!(
                "Artifact {} published but chunks of session {} were not removed: {}",
                committed.stored_name, session_id, e
            );
        }

        info!(
            "Finalized session {} into {} ({} bytes, {} chunks)",
            session_id, committed.stored_name, committed.size, req.total_chunks
        );
        Ok(FinalArtifact::from_committed(
            committed,
            &self.artifacts,
            &req.file_name,
            &req.declared_type,
        ))
    }

    /// Publish a whole file received in one request.
    pub async fn store_whole(
        &self,
        data: Bytes,
        file_name: &str,
        declared_type: &str,
    ) -> Result<FinalArtifact, UploadError> {
        if file_name.trim().is_empty() {
            return Err(UploadError::missing("fileName"));
        }
        if data.is_empty() {
            return Err(UploadError::missing("file"));
        }
        self.check_size(data.len() as u64)?;

        let mut writer = self
            .artifacts
            .begin()
            .await
            .context("opening scratch artifact")?;
        writer.write(&data).await.context("writing scratch artifact")?;

        let stored_name = self.artifacts.unique_name(file_name);
        let committed = writer
            .commit(&self.artifacts, &stored_name)
            .await
            .context("publishing artifact")?;

        info!(
            "Stored single-shot upload {} ({} bytes)",
            committed.stored_name, committed.size
        );
        Ok(FinalArtifact::from_committed(
            committed,
            &self.artifacts,
            file_name,
            declared_type,
        ))
    }
}
