//! SQLite chunk store.
//!
//! Chunks are rows keyed by `(session_id, chunk_index)` in a single SQLite
//! database, which makes this the embedded-KV flavour of the chunk store:
//! one file, transactional replace-per-index, and cheap listing.
//!
//! `rusqlite::Connection` is `Send` but `!Sync`, so it sits in a
//! `std::sync::Mutex` behind an `Arc` to be shared across tasks, and every
//! database operation runs under `tokio::task::spawn_blocking`.

use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use super::backend::{validate_session_id, ChunkStore, SessionScope, StoreError, StoreResult};

/// SQLite-backed chunk storage.
pub struct SqliteChunkStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteChunkStore {
    /// Open (or create) a SQLite database at `db_path` and initialise
    /// the required tables.
    ///
    /// Configures WAL journal mode and a 5-second busy timeout for
    /// improved concurrent-read performance.
    pub fn new(db_path: &str) -> anyhow::Result<Self> {
        if let Some(parent) = std::path::Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "PRAGMA journal_mode=WAL;\
             PRAGMA busy_timeout=5000;\
             PRAGMA synchronous=FULL;",
        )?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS chunk_sessions (\
                 session_id  TEXT PRIMARY KEY,\
                 created_at  INTEGER NOT NULL\
             );\
             CREATE TABLE IF NOT EXISTS chunk_data (\
                 session_id  TEXT NOT NULL,\
                 chunk_index INTEGER NOT NULL,\
                 data        BLOB NOT NULL,\
                 PRIMARY KEY (session_id, chunk_index)\
             );",
        )
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = lock(&conn)?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("blocking task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> StoreResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| StoreError::Internal(anyhow::anyhow!("Mutex poisoned: {e}")))
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ── ChunkStore implementation ──────────────────────────────────────────

impl ChunkStore for SqliteChunkStore {
    fn put_chunk(
        &self,
        session_id: &str,
        index: u32,
        data: Bytes,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            self.with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT OR IGNORE INTO chunk_sessions (session_id, created_at) VALUES (?1, ?2)",
                    params![session_id, now_millis()],
                )?;
                tx.execute(
                    "INSERT OR REPLACE INTO chunk_data (session_id, chunk_index, data) VALUES (?1, ?2, ?3)",
                    params![session_id, index, data.as_ref()],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
        })
    }

    fn list_indices(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<BTreeSet<u32>>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            self.with_conn(move |conn| {
                let mut stmt =
                    conn.prepare("SELECT chunk_index FROM chunk_data WHERE session_id = ?1")?;
                let indices = stmt
                    .query_map(params![session_id], |row| row.get::<_, u32>(0))?
                    .collect::<Result<BTreeSet<_>, _>>()?;
                Ok(indices)
            })
            .await
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
            self.with_conn(move |conn| {
                let data: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT data FROM chunk_data WHERE session_id = ?1 AND chunk_index = ?2",
                        params![session_id, index],
                        |row| row.get(0),
                    )
                    .optional()?;
                match data {
                    Some(data) => Ok(Bytes::from(data)),
                    None => Err(StoreError::NotFound { session_id, index }),
                }
            })
            .await
        })
    }

    fn delete_session(
        &self,
        session_id: &str,
    ) -> Pin<Box<dyn Future<Output = StoreResult<()>> + Send + '_>> {
        let session_id = session_id.to_string();
        Box::pin(async move {
            validate_session_id(&session_id)?;
            self.with_conn(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "DELETE FROM chunk_data WHERE session_id = ?1",
                    params![session_id],
                )?;
                tx.execute(
                    "DELETE FROM chunk_sessions WHERE session_id = ?1",
                    params![session_id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await
        })
    }

    fn list_sessions(
        &self,
    ) -> Pin<Box<dyn Future<Output = StoreResult<Vec<SessionScope>>> + Send + '_>> {
        Box::pin(async move {
            self.with_conn(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT s.session_id, s.created_at,
                            COUNT(d.chunk_index), COALESCE(SUM(LENGTH(d.data)), 0)
                     FROM chunk_sessions s
                     LEFT JOIN chunk_data d ON d.session_id = s.session_id
                     GROUP BY s.session_id, s.created_at",
                )?;
                let scopes = stmt
                    .query_map([], |row| {
                        let created_millis: i64 = row.get(1)?;
                        let chunk_count: i64 = row.get(2)?;
                        let stored_bytes: i64 = row.get(3)?;
                        Ok(SessionScope {
                            session_id: row.get(0)?,
                            created_at: UNIX_EPOCH
                                + Duration::from_millis(created_millis.max(0) as u64),
                            chunk_count: chunk_count.max(0) as usize,
                            stored_bytes: stored_bytes.max(0) as u64,
                        })
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(scopes)
            })
            .await
        })
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
