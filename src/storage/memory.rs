//! In-memory chunk store.
//!
//! Session scopes are held in a `tokio::sync::RwLock<HashMap<...>>`, each
//! scope mapping chunk index to payload.  A configurable memory limit
//! (`max_size_bytes`) caps total stored bytes across all sessions.
//!
//! Nothing survives a restart; this backend is meant for tests and
//! single-process deployments where abandoned uploads need no recovery.

use bytes::Bytes;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::time::SystemTime;

use super::backend::{validate_session_id, ChunkStore, SessionScope, StoreError, StoreResult};

/// One session's chunks plus its creation time.
struct SessionEntry {
    created_at: SystemTime,
    chunks: BTreeMap<u32, Bytes>,
}

struct Inner {
    sessions: HashMap<String, SessionEntry>,
    /// Current total bytes stored across all sessions.
    current_size: u64,
}

/// In-memory chunk store.
pub struct MemoryChunkStore {
    inner: tokio::sync::RwLock<Inner>,
    /// Maximum bytes allowed.  0 means unlimited.
    max_size_bytes: u64,
}

impl MemoryChunkStore {
    /// Create a new `MemoryChunkStore` with the given byte limit (0 = unlimited).
    pub fn new(max_size_bytes: u64) -> Self {
        Self {
            inner: tokio::sync::RwLock::new(Inner {
                sessions: HashMap::new(),
                current_size: 0,
            }),
            max_size_bytes,
        }
    }

    /// Total bytes currently held.
    pub async fn current_size(&self) -> u64 {
        self.inner.read().await.current_size
    }

    /// Backdate a session's creation time.  Used by reclamation tests.
    #[cfg(test)]
    pub(crate) async fn set_created_at(&self, session_id: &str, created_at: SystemTime) {
        if let Some(entry) = self.inner.write().await.sessions.get_mut(session_id) {
            entry.created_at = created_at;
        }
    }
}

impl Default for MemoryChunkStore {
    fn default() -> Self {
        Self::new(0)
    }
}

// ── ChunkStore implementation ──────────────────────────────────────────

impl ChunkStore for MemoryChunkStore {
    fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            let mut inner = self.inner.write().await;

            // If the index already exists, account for the size difference.
            let old_len = inner
                .sessions
                .get(&session_id)
                .and_then(|s| s.chunks.get(&index))
                .map(|d| d.len() as u64)
                .unwrap_or(0);
            let new_len = data.len() as u64;

            if self.max_size_bytes > 0 && new_len > old_len {
                let additional = new_len - old_len;
                if inner.current_size + additional > self.max_size_bytes {
                    return Err(StoreError::CapacityExceeded {
                        current: inner.current_size,
                        additional,
                        max: self.max_size_bytes,
                    });
                }
            }

            inner
                .sessions
                .entry(session_id)
                .or_insert_with(|| SessionEntry {
                    created_at: SystemTime::now(),
                    chunks: BTreeMap::new(),
                })
                .chunks
                .insert(index, data);
            inner.current_size = inner.current_size - old_len + new_len;

            Ok(())
        })
    }

    fn list_indices(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BTreeSet<u32>>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            let inner = self.inner.read().await;
            Ok(inner
                .sessions
                .get(&session_id)
                .map(|s| s.chunks.keys().copied().collect())
                .unwrap_or_default())
        })
    }

    fn read_chunk(
        &self,
        session_id: &str,
        index: u32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Bytes>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            let inner = self.inner.read().await;
            match inner
                .sessions
                .get(&session_id)
                .and_then(|s| s.chunks.get(&index))
            {
                Some(data) => Ok(data.clone()),
                None => Err(StoreError::NotFound {
                    session_id: session_id.clone(),
                    index,
                }),
            }
        })
    }

    fn delete_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            let mut inner = self.inner.write().await;
            if let Some(entry) = inner.sessions.remove(&session_id) {
                let freed: u64 = entry.chunks.values().map(|d| d.len() as u64).sum();
                inner.current_size = inner.current_size.saturating_sub(freed);
            }
            Ok(())
        })
    }

    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<SessionScope>>> + Send + '_>> {
        Box::pin(async move {
            let inner = self.inner.read().await;
            Ok(inner
                .sessions
                .iter()
                .map(|(id, entry)| SessionScope {
                    session_id: id.clone(),
                    created_at: entry.created_at,
                    chunk_count: entry.chunks.len(),
                    stored_bytes: entry.chunks.values().map(|d| d.len() as u64).sum(),
                })
                .collect())
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
