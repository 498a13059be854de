//! Local filesystem chunk store.
//!
//! Each session owns one directory under the root, holding one file per
//! chunk index (`chunk_{index}`) plus a `.created` marker recording the
//! time of the first write.
//!
//! All writes follow crash-only design: write to temp file, fsync, rename.

use bytes::Bytes;
use std::collections::BTreeSet;
use std::future::Future;
use std::io::{ErrorKind, Write};
use std::path::PathBuf;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::backend::{validate_session_id, ChunkStore, SessionScope, StoreError, StoreResult};

const CHUNK_PREFIX: &str = "chunk_";
const CREATED_MARKER: &str = ".created";
const TMP_DIR: &str = ".tmp";

/// Stores chunks as files on the local filesystem.
pub struct LocalChunkStore {
    /// Root directory holding one subdirectory per session.
    root: PathBuf,
}

impl LocalChunkStore {
    /// Create a new `LocalChunkStore` rooted at `root`.
    ///
    /// The directory will be created if it does not exist.
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        // Also create the .tmp directory for atomic writes.
        std::fs::create_dir_all(root.join(TMP_DIR))?;
        Ok(Self { root })
    }

    /// Resolve the scope directory for a session.
    fn session_dir(&self, session_id: &str) -> StoreResult<PathBuf> {
        validate_session_id(session_id)?;
        Ok(self.root.join(session_id))
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> StoreResult<PathBuf> {
        Ok(self
            .session_dir(session_id)?
            .join(format!("{CHUNK_PREFIX}{index}")))
    }

    /// Generate a temp file path under .tmp/ for atomic writes.
    fn temp_path(&self) -> PathBuf {
        let id = uuid::Uuid::new_v4();
        self.root.join(TMP_DIR).join(format!("tmp-{}", id))
    }

    /// Write `data` to `final_path` via temp file, fsync and rename.
    fn write_atomic(&self, final_path: &std::path::Path, data: &[u8]) -> std::io::Result<()> {
        let tmp_path = self.temp_path();
        if let Some(parent) = tmp_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let result = (|| {
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(data)?;
            file.sync_all()?;
            std::fs::rename(&tmp_path, final_path)
        })();
        if result.is_err() {
            let _ = std::fs::remove_file(&tmp_path);
        }
        result
    }

    /// Create the session directory and its creation marker if missing.
    fn ensure_scope(&self, dir: &std::path::Path) -> std::io::Result<()> {
        std::fs::create_dir_all(dir)?;
        let marker = dir.join(CREATED_MARKER);
        if !marker.exists() {
            let millis = SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis();
            self.write_atomic(&marker, millis.to_string().as_bytes())?;
        }
        Ok(())
    }

    /// Read the creation time of a scope, falling back to the directory mtime.
    fn scope_created_at(dir: &std::path::Path) -> std::io::Result<SystemTime> {
        if let Ok(text) = std::fs::read_to_string(dir.join(CREATED_MARKER)) {
            if let Ok(millis) = text.trim().parse::<u64>() {
                return Ok(UNIX_EPOCH + Duration::from_millis(millis));
            }
        }
        std::fs::metadata(dir)?.modified()
    }
}

/// Parse `chunk_{index}` file names; anything else is ignored.
fn parse_chunk_name(name: &str) -> Option<u32> {
    name.strip_prefix(CHUNK_PREFIX)?.parse().ok()
}

impl ChunkStore for LocalChunkStore {
    fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let dir = self.session_dir(&session_id)?;
            self.ensure_scope(&dir)?;
            let final_path = self.chunk_path(&session_id, index)?;
            self.write_atomic(&final_path, &data)?;
            Ok(())
        })
    }

    fn list_indices(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BTreeSet<u32>>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let dir = self.session_dir(&session_id)?;
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeSet::new()),
                Err(e) => return Err(e.into()),
            };

            let mut indices = BTreeSet::new();
            for entry in entries {
                let entry = entry?;
                if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_name) {
                    indices.insert(index);
                }
            }
            Ok(indices)
        })
    }

    fn read_chunk(
        &self,
        session_id: &str,
        index: u32,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Bytes>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let path = self.chunk_path(&session_id, index)?;
            match std::fs::read(&path) {
                Ok(data) => Ok(Bytes::from(data)),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    Err(StoreError::NotFound { session_id, index })
                }
                Err(e) => Err(e.into()),
            }
        })
    }

    fn delete_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            let dir = self.session_dir(&session_id)?;

            // Idempotent: if the directory doesn't exist, that's fine.
            match std::fs::remove_dir_all(&dir) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
                Err(e) => Err(e.into()),
            }
        })
    }

    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<SessionScope>>> + Send + '_>> {
        Box::pin(async move {
            let mut scopes = Vec::new();
            for entry in std::fs::read_dir(&self.root)? {
                let entry = entry?;
                if !entry.file_type()?.is_dir() {
                    continue;
                }
                let Some(session_id) = entry.file_name().to_str().map(str::to_string) else {
                    continue;
                };
                if validate_session_id(&session_id).is_err() {
                    // Skips .tmp and anything not created by this store.
                    continue;
                }

                let dir = entry.path();
                let created_at = match Self::scope_created_at(&dir) {
                    Ok(t) => t,
                    // Deleted between read_dir and now.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };

                let mut chunk_count = 0;
                let mut stored_bytes = 0u64;
                if let Ok(chunks) = std::fs::read_dir(&dir) {
                    for chunk in chunks.flatten() {
                        let is_chunk = chunk
                            .file_name()
                            .to_str()
                            .and_then(parse_chunk_name)
                            .is_some();
                        if is_chunk {
                            chunk_count += 1;
                            stored_bytes += chunk.metadata().map(|m| m.len()).unwrap_or(0);
                        }
                    }
                }

                scopes.push(SessionScope {
                    session_id,
                    created_at,
                    chunk_count,
                    stored_bytes,
                });
            }
            Ok(scopes)
        })
    }
}

// ── Tests ───────────────────────────────────────────────────────────
