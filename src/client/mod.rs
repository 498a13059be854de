//! Client upload orchestrator.
//!
//! Splits a source into contiguous chunk ranges, sends them through a
//! [`transport::ChunkTransport`] with bounded parallelism and per-chunk
//! retry, reports progress, and finalizes once every chunk is acknowledged.
//! Sources at or below the chunking threshold go through the single-shot
//! path instead.

pub mod orchestrator;
pub mod transport;

use bytes::Bytes;
use std::ops::Range;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;

use crate::config::ClientConfig;

pub use orchestrator::{Orchestrator, OrchestratorError, UploadMode, UploadReport};
pub use transport::{ChunkTransport, HttpTransport, InProcessTransport, TransportError};

/// Progress of a chunked upload.  `acknowledged` never decreases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub acknowledged: u32,
    pub total: u32,
}

impl Progress {
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            1.0
        } else {
            f64::from(self.acknowledged) / f64::from(self.total)
        }
    }
}

/// Split `size` bytes into `ceil(size / chunk_size)` contiguous ranges.
pub fn plan_chunks(size: u64, chunk_size: u64) -> Vec<Range<u64>> {
    let chunk_size = chunk_size.max(1);
    let mut ranges = Vec::new();
    let mut start = 0;
    while start < size {
        let end = (start + chunk_size).min(size);
        ranges.push(start..end);
        start = end;
    }
    ranges
}

/// Bounded exponential backoff for chunk transmissions.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Orchestrator tuning, usually taken from the `client` config section.
#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub chunk_size: u64,
    pub chunking_threshold: u64,
    pub max_upload_size: u64,
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl From<&ClientConfig> for ClientSettings {
    fn from(config: &ClientConfig) -> Self {
        Self {
            chunk_size: config.chunk_size,
            chunking_threshold: config.chunking_threshold,
            max_upload_size: config.max_upload_size,
            concurrency: config.concurrency,
            retry: RetryPolicy {
                max_retries: config.max_retries,
                base_delay: Duration::from_millis(config.base_delay_ms),
                max_delay: Duration::from_millis(config.max_delay_ms),
            },
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Where chunk bytes come from.  File ranges must be read in order.
pub(crate) enum ChunkSource {
    File { file: tokio::fs::File, offset: u64 },
    Memory(Bytes),
}

impl ChunkSource {
    pub(crate) async fn open(path: &Path) -> std::io::Result<(Self, u64)> {
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        Ok((ChunkSource::File { file, offset: 0 }, size))
    }

    /// Read exactly `range`.
    pub(crate) async fn read(&mut self, range: Range<u64>) -> std::io::Result<Bytes> {
        match self {
            ChunkSource::Memory(data) => Ok(data.slice(range.start as usize..range.end as usize)),
            ChunkSource::File { file, offset } => {
                if range.start != *offset {
                    return Err(std::io::Error::other(format!(
                        "out-of-order read at {} (expected {})",
                        range.start, offset
                    )));
                }
                let len = usize::try_from(range.end - range.start)
                    .map_err(|_| std::io::Error::other("chunk size exceeds platform limits"))?;
                let mut buf = vec![0u8; len];
                file.read_exact(&mut buf).await?;
                *offset = range.end;
                Ok(Bytes::from(buf))
            }
        }
    }

    /// Read everything that is left.
    pub(crate) async fn read_all(self) -> std::io::Result<Bytes> {
        match self {
            ChunkSource::Memory(data) => Ok(data),
            ChunkSource::File { mut file, .. } => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await?;
                Ok(Bytes::from(buf))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_chunks_exact_and_remainder() {
        assert_eq!(plan_chunks(10, 5), vec![0..5, 5..10]);
        assert_eq!(plan_chunks(11, 5), vec![0..5, 5..10, 10..11]);
        assert_eq!(plan_chunks(3, 5), vec![0..3]);
        assert!(plan_chunks(0, 5).is_empty());
    }

    #[test]
    fn test_plan_chunks_is_contiguous() {
        let ranges = plan_chunks(7 * 1024 * 1024 + 17, 1024 * 1024);
        assert_eq!(ranges.len(), 8);
        assert_eq!(ranges[0].start, 0);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert_eq!(ranges.last().unwrap().end, 7 * 1024 * 1024 + 17);
    }

    #[test]
    fn test_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(3000),
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(4), Duration::from_millis(3000));
        assert_eq!(policy.delay_for(40), Duration::from_millis(3000));
    }

    #[test]
    fn test_progress_fraction() {
        let p = Progress {
            acknowledged: 1,
            total: 4,
        };
        assert!((p.fraction() - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_file_source_reads_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("src.bin");
        std::fs::write(&path, b"abcdefg").unwrap();

        let (mut source, size) = ChunkSource::open(&path).await.unwrap();
        assert_eq!(size, 7);
        assert_eq!(source.read(0..3).await.unwrap(), Bytes::from("abc"));
        assert_eq!(source.read(3..7).await.unwrap(), Bytes::from("defg"));
        assert!(source.read(0..1).await.is_err());
    }
}
