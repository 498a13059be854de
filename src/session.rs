//! Upload session tracking.
//!
//! A session has no state of its own beyond what the chunk store holds:
//! completeness is always re-derived from [`ChunkStore::list_indices`] by the
//! pure [`completeness`] function.  The only in-process bookkeeping is
//! [`SessionGuards`], which keeps chunk writes and finalization for one
//! session from overlapping.
//!
//! [`ChunkStore::list_indices`]: crate::storage::backend::ChunkStore::list_indices

use rand::Rng;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::errors::UploadError;
use crate::storage::backend;

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Generate a `<unix-millis>_<9 base36 chars>` session identifier.
pub fn generate_session_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| BASE36[rng.gen_range(0..BASE36.len())] as char)
        .collect();
    format!("{millis}_{suffix}")
}

/// Reject identifiers that cannot be used as a storage scope key.
pub fn validate_session_id(session_id: &str) -> Result<(), UploadError> {
    backend::validate_session_id(session_id).map_err(UploadError::from)
}

/// Metadata describing one in-flight chunked upload.
///
/// `file_name`, `declared_size` and `declared_type` are echoed back to the
/// caller and never trusted for anything else.  Received indices are not
/// kept here; they are read from the chunk store when needed.
#[derive(Debug, Clone)]
pub struct UploadSession {
    pub session_id: String,
    pub file_name: String,
    pub declared_size: u64,
    pub declared_type: String,
    pub total_chunks: u32,
}

/// Outcome of comparing stored indices against `{0 .. total-1}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completeness {
    Complete,
    Incomplete {
        /// Indices in range with no stored chunk, ascending.
        missing: Vec<u32>,
        /// Stored indices at or beyond `total`, ascending.
        unexpected: Vec<u32>,
    },
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        matches!(self, Completeness::Complete)
    }

    /// Turn an incomplete result into [`UploadError::IncompleteUpload`].
    pub fn into_result(self) -> Result<(), UploadError> {
        match self {
            Completeness::Complete => Ok(()),
            Completeness::Incomplete {
                missing,
                unexpected,
            } => Err(UploadError::IncompleteUpload {
                missing,
                unexpected,
            }),
        }
    }
}

/// Completeness holds iff `stored` equals `{0 .. total-1}` exactly.
pub fn completeness(stored: &BTreeSet<u32>, total: u32) -> Completeness {
    let missing: Vec<u32> = (0..total).filter(|i| !stored.contains(i)).collect();
    let unexpected: Vec<u32> = stored.range(total..).copied().collect();
    if missing.is_empty() && unexpected.is_empty() {
        Completeness::Complete
    } else {
        Completeness::Incomplete {
            missing,
            unexpected,
        }
    }
}

// ── Per-session exclusion ──────────────────────────────────────────────

#[derive(Debug, Default)]
struct GuardState {
    writers: usize,
    exclusive: usize,
}

type GuardMap = Arc<Mutex<HashMap<String, GuardState>>>;

/// Tracks in-flight chunk writes and exclusive holders per session.
///
/// With `enforce` off, write and finalize guards are still counted (so the
/// reclamation sweep can see busy sessions) but never refused.
#[derive(Debug, Clone)]
pub struct SessionGuards {
    enforce: bool,
    states: GuardMap,
}

impl SessionGuards {
    pub fn new(enforce: bool) -> Self {
        Self {
            enforce,
            states: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, GuardState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a chunk write.  Fails while the session is held exclusively.
    pub fn begin_write(&self, session_id: &str) -> Result<SessionGuard, UploadError> {
        let mut states = self.lock();
        let state = states.entry(session_id.to_string()).or_default();
        if self.enforce && state.exclusive > 0 {
            return Err(UploadError::SessionFinalizing {
                session_id: session_id.to_string(),
            });
        }
        state.writers += 1;
        Ok(self.guard(session_id, GuardKind::Write))
    }

    /// Take the session for finalization.  Fails while another holder or
    /// any chunk write is active.
    pub fn begin_finalize(&self, session_id: &str) -> Result<SessionGuard, UploadError> {
        self.acquire_exclusive(session_id, self.enforce)
            .ok_or_else(|| UploadError::SessionFinalizing {
                session_id: session_id.to_string(),
            })
    }

    /// Take the session for deletion by the sweep.  Always enforced.
    pub fn begin_reclaim(&self, session_id: &str) -> Option<SessionGuard> {
        self.acquire_exclusive(session_id, true)
    }

    /// Whether any guard is currently held for `session_id`.
    pub fn is_busy(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    fn acquire_exclusive(&self, session_id: &str, enforce: bool) -> Option<SessionGuard> {
        let mut states = self.lock();
        let state = states.entry(session_id.to_string()).or_default();
        if enforce && (state.exclusive > 0 || state.writers > 0) {
            return None;
        }
        state.exclusive += 1;
        Some(self.guard(session_id, GuardKind::Exclusive))
    }

    fn guard(&self, session_id: &str, kind: GuardKind) -> SessionGuard {
        SessionGuard {
            states: Arc::clone(&self.states),
            session_id: session_id.to_string(),
            kind,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum GuardKind {
    Write,
    Exclusive,
}

/// Released on drop.
#[derive(Debug)]
pub struct SessionGuard {
    states: GuardMap,
    session_id: String,
    kind: GuardKind,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let mut states = self.states.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(state) = states.get_mut(&self.session_id) {
            match self.kind {
                GuardKind::Write => state.writers = state.writers.saturating_sub(1),
                GuardKind::Exclusive => state.exclusive = state.exclusive.saturating_sub(1),
            }
            if state.writers == 0 && state.exclusive == 0 {
                states.remove(&self.session_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(items: &[u32]) -> BTreeSet<u32> {
        items.iter().copied().collect()
    }

    #[test]
    fn test_generated_ids_are_valid_and_distinct() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
        assert!(validate_session_id(&a).is_ok());
        let (millis, suffix) = a.split_once('_').unwrap();
        assert!(millis.parse::<i64>().is_ok());
        assert_eq!(suffix.len(), 9);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_complete_set() {
        assert!(completeness(&set(&[0, 1, 2]), 3).is_complete());
        assert!(completeness(&set(&[0]), 1).is_complete());
    }

    #[test]
    fn test_every_single_missing_index_is_reported() {
        let total = 6;
        for gap in 0..total {
            let stored: BTreeSet<u32> = (0..total).filter(|&i| i != gap).collect();
            assert_eq!(
                completeness(&stored, total),
                Completeness::Incomplete {
                    missing: vec![gap],
                    unexpected: vec![],
                }
            );
        }
    }

    #[test]
    fn test_extra_indices_are_incomplete() {
        assert_eq!(
            completeness(&set(&[0, 1, 2, 5]), 3),
            Completeness::Incomplete {
                missing: vec![],
                unexpected: vec![5],
            }
        );
    }

    #[test]
    fn test_empty_store_reports_all_missing() {
        match completeness(&BTreeSet::new(), 2).into_result() {
            Err(UploadError::IncompleteUpload { missing, .. }) => assert_eq!(missing, vec![0, 1]),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_write_refused_while_finalizing() {
        let guards = SessionGuards::new(true);
        let fin = guards.begin_finalize("s").unwrap();
        assert!(matches!(
            guards.begin_write("s"),
            Err(UploadError::SessionFinalizing { .. })
        ));
        // Other sessions never contend.
        assert!(guards.begin_write("t").is_ok());
        drop(fin);
        assert!(guards.begin_write("s").is_ok());
    }

    #[test]
    fn test_finalize_refused_while_writing_or_finalizing() {
        let guards = SessionGuards::new(true);
        let write = guards.begin_write("s").unwrap();
        assert!(guards.begin_finalize("s").is_err());
        drop(write);

        let fin = guards.begin_finalize("s").unwrap();
        assert!(guards.begin_finalize("s").is_err());
        assert!(guards.begin_reclaim("s").is_none());
        drop(fin);
        assert!(!guards.is_busy("s"));
    }

    #[test]
    fn test_unenforced_guards_never_refuse_but_still_count() {
        let guards = SessionGuards::new(false);
        let _fin = guards.begin_finalize("s").unwrap();
        let _write = guards.begin_write("s").unwrap();
        let _fin2 = guards.begin_finalize("s").unwrap();
        assert!(guards.is_busy("s"));
        assert!(guards.begin_reclaim("s").is_none());
    }
}
