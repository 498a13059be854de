//! chunkyard library: chunked upload storage engine.
//!
//! This crate provides the core components for accepting large files as
//! independently uploaded chunks: pluggable chunk stores, completeness
//! tracking, index-order reassembly into a published artifact, orphan
//! reclamation, the HTTP surface, and the client-side upload orchestrator.

use std::sync::Arc;

pub mod client;
pub mod config;
pub mod errors;
pub mod finalize;
pub mod handlers;
pub mod metrics;
pub mod reclaim;
pub mod server;
pub mod session;
pub mod storage;
pub mod upload;

use crate::config::Config;
use crate::storage::artifacts::ArtifactStore;
use crate::storage::backend::ChunkStore;
use crate::upload::UploadService;

/// Shared application state passed to all handlers via `axum::extract::State`.
pub struct AppState {
    /// Server configuration.
    pub config: Config,
    /// Upload boundary operations.
    pub uploads: Arc<UploadService>,
    /// Published artifact destination (served under its public prefix).
    pub artifacts: Arc<ArtifactStore>,
}

impl AppState {
    /// Assemble state from an already-built chunk store and artifact store.
    pub fn new(config: Config, store: Arc<dyn ChunkStore>, artifacts: Arc<ArtifactStore>) -> Self {
        let uploads = Arc::new(UploadService::new(
            store,
            Arc::clone(&artifacts),
            &config.limits,
        ));
        Self {
            config,
            uploads,
            artifacts,
        }
    }

    /// Build stores from `config.storage` and assemble state.
    pub fn from_config(config: Config) -> anyhow::Result<Self> {
        let store = storage::build_chunk_store(&config.storage)?;
        let artifacts = Arc::new(storage::build_artifact_store(&config.storage)?);
        Ok(Self::new(config, store, artifacts))
    }
}
