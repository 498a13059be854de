//! Abstract chunk store trait.
//!
//! Every chunk store must implement [`ChunkStore`].  Chunks are addressed
//! by `(session_id, index)`; the session's scope is created implicitly by
//! its first write and removed as a whole by [`ChunkStore::delete_session`].
//! Nothing outside the store tracks which indices exist, so completeness is
//! always derived from [`ChunkStore::list_indices`].

use bytes::Bytes;
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;
use thiserror::Error;

/// Longest accepted session identifier.
pub const MAX_SESSION_ID_LEN: usize = 128;

/// Chunk store failures.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk {index} of session {session_id} not found")]
    NotFound { session_id: String, index: u32 },

    #[error("invalid session id: {0:?}")]
    InvalidSessionId(String),

    #[error("chunk store capacity exceeded: current={current}, additional={additional}, max={max}")]
    CapacityExceeded { current: u64, additional: u64, max: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

/// Result type for chunk store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Summary of one session scope, as seen by the reclamation sweep.
#[derive(Debug, Clone)]
pub struct SessionScope {
    /// Session identifier owning the scope.
    pub session_id: String,
    /// Time the scope was created (first chunk write).
    pub created_at: SystemTime,
    /// Number of chunk entries currently stored.
    pub chunk_count: usize,
    /// Total bytes held by those entries.
    pub stored_bytes: u64,
}

/// Check that `session_id` is usable as a storage scope key.
///
/// Accepts 1..=128 characters from `[A-Za-z0-9_-]`, which keeps the scope
/// from escaping its root on path-based stores.
pub fn validate_session_id(session_id: &str) -> StoreResult<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidSessionId(session_id.to_string()))
    }
}

/// Durable keyed storage for chunk payloads.
///
/// Callers validate payload length (non-empty, below the chunk ceiling)
/// before calling [`ChunkStore::put_chunk`]; the store only guarantees that a
/// returned write is durably readable and that a rewrite of the same index
/// replaces the previous payload.
pub trait ChunkStore: Send + Sync + 'static {
    /// Store `data` as chunk `index` of `session_id`, replacing any previous
    /// payload for that index.  Creates the session scope if needed.
    fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>>;

    /// Return exactly the indices currently stored for `session_id`.
    /// A missing scope yields an empty set.
    fn list_indices(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BTreeSet<u32>>> + Send + '_>>;

    /// Read chunk `index` of `session_id`.  Fails with [`StoreError::NotFound`]
    /// if absent.
    fn read_chunk(
        &self,
        session_id: &str,
        index: u32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Bytes>> + Send + '_>>;

    /// Remove every chunk of `session_id` and the scope itself.  Idempotent.
    fn delete_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>>;

    /// Enumerate all session scopes currently held.
    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<SessionScope>>> + Send + '_>>;
}
