//! Transport-agnostic upload boundary.
//!
//! [`UploadService`] implements `UploadChunk`, `FinalizeUpload` and
//! `UploadWhole`, plus session status and abort.  HTTP handlers and the
//! in-process client transport both call into it.

use bytes::Bytes;
use metrics::counter;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::LimitsConfig;
use crate::errors::UploadError;
use crate::finalize::{FinalArtifact, FinalizeRequest, Finalizer};
use crate::metrics::{
    ARTIFACT_BYTES_WRITTEN_TOTAL, CHUNKS_RECEIVED_TOTAL, CHUNK_BYTES_RECEIVED_TOTAL,
    FINALIZE_TOTAL,
};
use crate::session::{completeness, validate_session_id, Completeness, SessionGuards};
use crate::storage::artifacts::ArtifactStore;
use crate::storage::backend::ChunkStore;

/// One chunk write.
#[derive(Debug, Clone)]
pub struct ChunkUpload {
    pub session_id: String,
    pub index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub declared_size: u64,
    pub data: Bytes,
}

/// Acknowledgement of a durably stored chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkAck {
    #[serde(rename = "success")]
    pub accepted: bool,
    pub message: String,
    #[serde(rename = "chunkIndex")]
    pub index: u32,
    pub total_chunks: u32,
}

/// The tracker's view of one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub session_id: String,
    pub received_indices: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_chunks: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<Vec<u32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

/// Upload boundary operations over one chunk store and artifact destination.
pub struct UploadService {
    store: Arc<dyn ChunkStore>,
    finalizer: Finalizer,
    guards: SessionGuards,
    max_chunk_size: u64,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn ChunkStore>,
        artifacts: Arc<ArtifactStore>,
        limits: &LimitsConfig,
    ) -> Self {
        Self {
            finalizer: Finalizer::new(Arc::clone(&store), artifacts, limits.max_upload_size),
            store,
            guards: SessionGuards::new(limits.lock_during_finalize),
            max_chunk_size: limits.max_chunk_size,
        }
    }

    pub fn store(&self) -> &Arc<dyn ChunkStore> {
        &self.store
    }

    pub fn guards(&self) -> &SessionGuards {
        &self.guards
    }

    pub fn max_upload_size(&self) -> u64 {
        self.finalizer.max_upload_size()
    }

    /// Validate and durably store one chunk.
    pub async fn upload_chunk(&self, chunk: ChunkUpload) -> Result<ChunkAck, UploadError> {
        validate_session_id(&chunk.session_id)?;
        if chunk.file_name.trim().is_empty() {
            return Err(UploadError::missing("fileName"));
        }
        if chunk.data.is_empty() {
            return Err(UploadError::missing("chunk"));
        }
        self.finalizer.check_size(chunk.declared_size)?;
        let size = chunk.data.len() as u64;
        if size > self.max_chunk_size {
            return Err(UploadError::ChunkTooLarge {
                size,
                limit: self.max_chunk_size,
            });
        }
        if chunk.total_chunks == 0 {
            return Err(UploadError::invalid("totalChunks must be at least 1"));
        }
        if chunk.index >= chunk.total_chunks {
            return Err(UploadError::invalid(format!(
                "chunkIndex {} out of range for totalChunks {}",
                chunk.index, chunk.total_chunks
            )));
        }

        let _guard = self.guards.begin_write(&chunk.session_id)?;
        self.store
            .put_chunk(&chunk.session_id, chunk.index, chunk.data)
            .await?;

        counter!(CHUNKS_RECEIVED_TOTAL).increment(1);
        counter!(CHUNK_BYTES_RECEIVED_TOTAL).increment(size);
        debug!(
            "Stored chunk {}/{} of session {} ({} bytes)",
            chunk.index + 1,
            chunk.total_chunks,
            chunk.session_id,
            size
        );

        Ok(ChunkAck {
            accepted: true,
            message: format!(
                "Chunk {}/{} uploaded successfully",
                chunk.index + 1,
                chunk.total_chunks
            ),
            index: chunk.index,
            total_chunks: chunk.total_chunks,
        })
    }

    /// Reassemble a session while holding its finalize guard.
    pub async fn finalize_upload(
        &self,
        req: FinalizeRequest,
    ) -> Result<FinalArtifact, UploadError> {
        validate_session_id(&req.session_id)?;
        let result = match self.guards.begin_finalize(&req.session_id) {
            Ok(_guard) => self.finalizer.finalize(&req).await,
            Err(e) => Err(e),
        };

        let outcome = match &result {
            Ok(artifact) => {
                counter!(ARTIFACT_BYTES_WRITTEN_TOTAL).increment(artifact.size);
                "ok"
            }
            Err(UploadError::IncompleteUpload { .. }) => "incomplete",
            Err(UploadError::SizeMismatch { .. }) => "size_mismatch",
            Err(UploadError::SizeExceeded { .. }) => "size_exceeded",
            Err(UploadError::SessionFinalizing { .. }) => "busy",
            Err(UploadError::Storage(_)) => "storage_error",
            Err(_) => "invalid",
        };
        counter!(FINALIZE_TOTAL, "outcome" => outcome).increment(1);
        if let Err(e) = &result {
            warn!("Finalize of session {} failed: {}", req.session_id, e);
        }
        result
    }

    /// Publish a file sent in one request.
    pub async fn upload_whole(
        &self,
        data: Bytes,
        file_name: &str,
        declared_type: &str,
    ) -> Result<FinalArtifact, UploadError> {
        let artifact = self
            .finalizer
            .store_whole(data, file_name, declared_type)
            .await?;
        counter!(ARTIFACT_BYTES_WRITTEN_TOTAL).increment(artifact.size);
        Ok(artifact)
    }

    /// Report stored indices and, given `total_chunks`, what is missing.
    pub async fn session_status(
        &self,
        session_id: &str,
        total_chunks: Option<u32>,
    ) -> Result<SessionStatus, UploadError> {
        validate_session_id(session_id)?;
        let stored = self.store.list_indices(session_id).await?;

        let (missing, complete) = match total_chunks {
            Some(total) => match completeness(&stored, total) {
                Completeness::Complete => (Some(Vec::new()), Some(true)),
                Completeness::Incomplete { missing, .. } => (Some(missing), Some(false)),
            },
            None => (None, None),
        };

        Ok(SessionStatus {
            session_id: session_id.to_string(),
            received_indices: stored.into_iter().collect(),
            total_chunks,
            missing,
            complete,
        })
    }

    /// Discard every stored chunk of a session.  Idempotent.
    pub async fn abort_session(&self, session_id: &str) -> Result<(), UploadError> {
        validate_session_id(session_id)?;
        let _guard = self.guards.begin_reclaim(session_id).ok_or_else(|| {
            UploadError::SessionFinalizing {
                session_id: session_id.to_string(),
            }
        })?;
        self.store.delete_session(session_id).await?;
        info!("Aborted session {}", session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MIB;
    use crate::storage::memory::MemoryChunkStore;

    fn service(limits: LimitsConfig) -> (tempfile::TempDir, UploadService) {
        let dir = tempfile::tempdir().unwrap();
        let artifacts = Arc::new(
            ArtifactStore::new(
                dir.path().join("public"),
                dir.path().join("scratch"),
                "/uploads",
            )
            .unwrap(),
        );
        let svc = UploadService::new(Arc::new(MemoryChunkStore::default()), artifacts, &limits);
        (dir, svc)
    }

    fn chunk(session_id: &str, index: u32, total: u32, data: &'static [u8]) -> ChunkUpload {
        ChunkUpload {
            session_id: session_id.to_string(),
            index,
            total_chunks: total,
            file_name: "f.bin".to_string(),
            declared_size: 10,
            data: Bytes::from_static(data),
        }
    }

    #[tokio::test]
    async fn test_upload_chunk_ack() {
        let (_dir, svc) = service(LimitsConfig::default());
        let ack = svc.upload_chunk(chunk("s", 1, 3, b"abc")).await.unwrap();
        assert!(ack.accepted);
        assert_eq!(ack.index, 1);
        assert_eq!(ack.message, "Chunk 2/3 uploaded successfully");
    }

    #[tokio::test]
    async fn test_upload_chunk_validation() {
        let (_dir, svc) = service(LimitsConfig {
            max_chunk_size: 4,
            ..LimitsConfig::default()
        });

        let mut c = chunk("s", 0, 1, b"a");
        c.file_name = String::new();
        assert!(matches!(svc.upload_chunk(c).await, Err(UploadError::MissingField { .. })));

        let c = chunk("s", 0, 1, b"");
        assert!(matches!(svc.upload_chunk(c).await, Err(UploadError::MissingField { .. })));

        let c = chunk("s", 0, 1, b"abcde");
        assert!(matches!(svc.upload_chunk(c).await, Err(UploadError::ChunkTooLarge { .. })));

        let c = chunk("s", 3, 3, b"a");
        assert!(matches!(svc.upload_chunk(c).await, Err(UploadError::InvalidArgument { .. })));

        let c = chunk("../etc", 0, 1, b"a");
        assert!(matches!(svc.upload_chunk(c).await, Err(UploadError::InvalidArgument { .. })));

        assert!(svc.store().list_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_oversize_declared_rejected_without_storing() {
        let (_dir, svc) = service(LimitsConfig::default());
        let mut c = chunk("s", 0, 200, b"a");
        c.declared_size = 200 * MIB;
        assert!(matches!(
            svc.upload_chunk(c).await,
            Err(UploadError::SizeExceeded { .. })
        ));
        assert!(svc.store().list_indices("s").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_status_reports_missing() {
        let (_dir, svc) = service(LimitsConfig::default());
        svc.upload_chunk(chunk("s", 0, 3, b"a")).await.unwrap();
        svc.upload_chunk(chunk("s", 2, 3, b"c")).await.unwrap();

        let status = svc.session_status("s", Some(3)).await.unwrap();
        assert_eq!(status.received_indices, vec![0, 2]);
        assert_eq!(status.missing, Some(vec![1]));
        assert_eq!(status.complete, Some(false));

        let status = svc.session_status("s", None).await.unwrap();
        assert!(status.missing.is_none());
    }

    #[tokio::test]
    async fn test_chunk_refused_while_finalize_guard_held() {
        let (_dir, svc) = service(LimitsConfig::default());
        let guard = svc.guards().begin_finalize("s").unwrap();
        assert!(matches!(
            svc.upload_chunk(chunk("s", 0, 1, b"a")).await,
            Err(UploadError::SessionFinalizing { .. })
        ));
        drop(guard);
        svc.upload_chunk(chunk("s", 0, 1, b"a")).await.unwrap();
    }

    #[tokio::test]
    async fn test_rewrite_during_finalize_accepted_when_unlocked() {
        let (dir, svc) = service(LimitsConfig {
            lock_during_finalize: false,
            ..LimitsConfig::default()
        });
        let sized = |index: u32, data: &'static [u8]| ChunkUpload {
            declared_size: 4,
            ..chunk("s", index, 2, data)
        };
        svc.upload_chunk(sized(0, b"ab")).await.unwrap();
        svc.upload_chunk(sized(1, b"cd")).await.unwrap();

        // Finalize's view of a chunk is whatever is readable when it reads it.
        let guard = svc.guards().begin_finalize("s").unwrap();
        svc.upload_chunk(sized(0, b"xy")).await.unwrap();

        let artifact = svc
            .finalize_upload(FinalizeRequest {
                session_id: "s".to_string(),
                file_name: "f.bin".to_string(),
                total_chunks: 2,
                declared_size: 4,
                declared_type: "application/octet-stream".to_string(),
            })
            .await
            .unwrap();
        drop(guard);

        let bytes = std::fs::read(dir.path().join("public").join(&artifact.stored_name)).unwrap();
        assert_eq!(bytes, b"xycd");
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let (_dir, svc) = service(LimitsConfig::default());
        svc.upload_chunk(chunk("s", 0, 2, b"a")).await.unwrap();
        svc.abort_session("s").await.unwrap();
        svc.abort_session("s").await.unwrap();
        assert!(svc.session_status("s", None).await.unwrap().received_indices.is_empty());
    }
}
