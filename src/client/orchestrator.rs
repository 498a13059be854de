//! Upload orchestration: single-shot vs chunked, bounded parallel sends,
//! per-chunk retry with backoff, monotonic progress, finalize-once.

use bytes::Bytes;
use futures::stream::{FuturesUnordered, StreamExt};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::transport::{ChunkTransport, TransportError};
use super::{plan_chunks, ChunkSource, ClientSettings, Progress, RetryPolicy};
use crate::finalize::{FinalArtifact, FinalizeRequest};
use crate::session::generate_session_id;
use crate::upload::{ChunkAck, ChunkUpload};

/// Why an upload did not produce an artifact.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),

    #[error("file is {size} bytes, above the {limit} byte upload limit")]
    TooLarge { size: u64, limit: u64 },

    #[error("file is empty")]
    Empty,

    #[error("chunk {index} failed after {attempts} attempt(s): {source}")]
    ChunkFailed {
        index: u32,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("finalize failed: {0}")]
    Finalize(#[source] TransportError),

    #[error("upload failed: {0}")]
    Whole(#[source] TransportError),
}

/// How the artifact was delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadMode {
    SingleShot,
    Chunked { session_id: String, total_chunks: u32 },
}

#[derive(Debug, Clone)]
pub struct UploadReport {
    pub artifact: FinalArtifact,
    pub mode: UploadMode,
}

/// Drives one upload at a time over a [`ChunkTransport`].
pub struct Orchestrator {
    transport: Arc<dyn ChunkTransport>,
    settings: ClientSettings,
}

impl Orchestrator {
    pub fn new(transport: Arc<dyn ChunkTransport>, settings: ClientSettings) -> Self {
        Self {
            transport,
            settings,
        }
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Upload the file at `path`.
    pub async fn upload_file<F>(
        &self,
        path: &Path,
        file_name: &str,
        declared_type: &str,
        on_progress: F,
    ) -> Result<UploadReport, OrchestratorError>
    where
        F: FnMut(Progress),
    {
        let (source, size) = ChunkSource::open(path).await?;
        self.upload_source(source, size, file_name, declared_type, on_progress)
            .await
    }

    /// Upload an in-memory buffer.
    pub async fn upload_bytes<F>(
        &self,
        data: Bytes,
        file_name: &str,
        declared_type: &str,
        on_progress: F,
    ) -> Result<UploadReport, OrchestratorError>
    where
        F: FnMut(Progress),
    {
        let size = data.len() as u64;
        self.upload_source(
            ChunkSource::Memory(data),
            size,
            file_name,
            declared_type,
            on_progress,
        )
        .await
    }

    async fn upload_source<F>(
        &self,
        source: ChunkSource,
        size: u64,
        file_name: &str,
        declared_type: &str,
        mut on_progress: F,
    ) -> Result<UploadReport, OrchestratorError>
    where
        F: FnMut(Progress),
    {
        if size > self.settings.max_upload_size {
            return Err(OrchestratorError::TooLarge {
                size,
                limit: self.settings.max_upload_size,
            });
        }
        if size == 0 {
            return Err(OrchestratorError::Empty);
        }

        if size <= self.settings.chunking_threshold {
            let data = source.read_all().await?;
            let artifact = self
                .transport
                .upload_whole(data, file_name.to_string(), declared_type.to_string())
                .await
                .map_err(OrchestratorError::Whole)?;
            on_progress(Progress {
                acknowledged: 1,
                total: 1,
            });
            return Ok(UploadReport {
                artifact,
                mode: UploadMode::SingleShot,
            });
        }

        self.upload_chunked(source, size, file_name, declared_type, &mut on_progress)
            .await
    }

    async fn upload_chunked(
        &self,
        mut source: ChunkSource,
        size: u64,
        file_name: &str,
        declared_type: &str,
        on_progress: &mut dyn FnMut(Progress),
    ) -> Result<UploadReport, OrchestratorError> {
        let session_id = generate_session_id();
        let ranges = plan_chunks(size, self.settings.chunk_size);
        let total = u32::try_from(ranges.len()).map_err(|_| OrchestratorError::TooLarge {
            size,
            limit: self.settings.max_upload_size,
        })?;
        let parallel = self.settings.concurrency.max(1);

        info!(
            "Uploading {} ({} bytes) as session {} in {} chunks",
            file_name, size, session_id, total
        );

        let mut progress = Progress {
            acknowledged: 0,
            total,
        };
        on_progress(progress);

        let mut in_flight = FuturesUnordered::new();
        for (index, range) in (0u32..).zip(ranges) {
            let data = source.read(range).await?;
            let chunk = ChunkUpload {
                session_id: session_id.clone(),
                index,
                total_chunks: total,
                file_name: file_name.to_string(),
                declared_size: size,
                data,
            };
            in_flight.push(send_with_retry(
                Arc::clone(&self.transport),
                chunk,
                self.settings.retry.clone(),
            ));

            if in_flight.len() >= parallel {
                if let Some(result) = in_flight.next().await {
                    result?;
                    progress.acknowledged += 1;
                    on_progress(progress);
                }
            }
        }

        while let Some(result) = in_flight.next().await {
            result?;
            progress.acknowledged += 1;
            on_progress(progress);
        }

        let artifact = self
            .transport
            .finalize(FinalizeRequest {
                session_id: session_id.clone(),
                file_name: file_name.to_string(),
                total_chunks: total,
                declared_size: size,
                declared_type: declared_type.to_string(),
            })
            .await
            .map_err(OrchestratorError::Finalize)?;

        Ok(UploadReport {
            artifact,
            mode: UploadMode::Chunked {
                session_id,
                total_chunks: total,
            },
        })
    }
}

/// Send one chunk, retrying retryable failures with exponential backoff.
/// Every attempt reuses the same `(session_id, index)`.
async fn send_with_retry(
    transport: Arc<dyn ChunkTransport>,
    chunk: ChunkUpload,
    policy: RetryPolicy,
) -> Result<ChunkAck, OrchestratorError> {
    let mut attempt = 0;
    loop {
        match transport.upload_chunk(chunk.clone()).await {
            Ok(ack) => {
                debug!("Chunk {}/{} acknowledged", chunk.index + 1, chunk.total_chunks);
                return Ok(ack);
            }
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay_for(attempt);
                warn!(
                    "Chunk {} failed ({}), retrying in {}ms ({}/{})",
                    chunk.index,
                    e,
                    delay.as_millis(),
                    attempt,
                    policy.max_retries
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return Err(OrchestratorError::ChunkFailed {
                    index: chunk.index,
                    attempts: attempt + 1,
                    source: e,
                })
            }
        }
    }
}
