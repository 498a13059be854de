//! Chunk storage backends and the final artifact destination.
//!
//! The [`backend::ChunkStore`] trait abstracts over where chunk bytes
//! physically live.  Implementations include local disk, process memory,
//! and an embedded SQLite database.

pub mod artifacts;
pub mod backend;
pub mod local;
pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

use crate::config::StorageConfig;
use backend::ChunkStore;

/// Build the chunk store selected by `storage.backend`.
pub fn build_chunk_store(config: &StorageConfig) -> anyhow::Result<Arc<dyn ChunkStore>> {
    let store: Arc<dyn ChunkStore> = match config.backend.as_str() {
        "memory" => {
            let max = config.memory.max_size_bytes;
            info!("Memory chunk store initialized (max_size_bytes={})", max);
            Arc::new(memory::MemoryChunkStore::new(max))
        }
        "sqlite" => {
            let path = &config.sqlite.path;
            let store = sqlite::SqliteChunkStore::new(path)?;
            info!("SQLite chunk store initialized at {}", path);
            Arc::new(store)
        }
        "local" => {
            let root = &config.local.root_dir;
            let store = local::LocalChunkStore::new(root)?;
            info!("Local chunk store initialized at {}", root);
            Arc::new(store)
        }
        other => anyhow::bail!("unknown storage.backend '{other}' (expected local, memory or sqlite)"),
    };
    Ok(store)
}

/// Build the artifact destination from `storage.artifacts`.
pub fn build_artifact_store(config: &StorageConfig) -> anyhow::Result<artifacts::ArtifactStore> {
    let artifacts = &config.artifacts;
    let store = artifacts::ArtifactStore::new(
        &artifacts.dir,
        &artifacts.scratch_dir,
        &artifacts.public_prefix,
    )?;
    info!(
        "Artifacts published to {} (scratch {}) at {}",
        artifacts.dir, artifacts.scratch_dir, artifacts.public_prefix
    );
    Ok(store)
}
