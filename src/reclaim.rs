//! Background reclamation of abandoned upload sessions.
//!
//! Sessions that are never finalized leave their chunk scope behind.  The
//! sweep deletes scopes whose first chunk is older than the configured TTL,
//! skipping any session that currently has a write or finalize in flight.

use metrics::counter;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ReclaimConfig;
use crate::metrics::SESSIONS_RECLAIMED_TOTAL;
use crate::session::SessionGuards;
use crate::storage::backend::ChunkStore;

pub struct Reclaimer {
    store: Arc<dyn ChunkStore>,
    guards: SessionGuards,
    ttl: Duration,
    interval: Duration,
    shutdown: AtomicBool,
}

impl Reclaimer {
    pub fn new(store: Arc<dyn ChunkStore>, guards: SessionGuards, config: &ReclaimConfig) -> Self {
        Self {
            store,
            guards,
            ttl: Duration::from_secs(config.ttl_seconds),
            interval: Duration::from_secs(config.interval_seconds),
            shutdown: AtomicBool::new(false),
        }
    }

    /// Delete every idle session created before `now - ttl`.  Returns the
    /// reclaimed session ids.
    pub async fn sweep_once(&self, now: SystemTime) -> anyhow::Result<Vec<String>> {
        let scopes = self.store.list_sessions().await?;
        let mut reclaimed = Vec::new();

        for scope in scopes {
            let age = now.duration_since(scope.created_at).unwrap_or_default();
            if age < self.ttl {
                continue;
            }
            let Some(_guard) = self.guards.begin_reclaim(&scope.session_id) else {
                continue;
            };
            match self.store.delete_session(&scope.session_id).await {
                Ok(()) => {
                    info!(
                        "Reclaimed session {} ({} chunks, {} bytes, age {}s)",
                        scope.session_id,
                        scope.chunk_count,
                        scope.stored_bytes,
                        age.as_secs()
                    );
                    reclaimed.push(scope.session_id);
                }
                Err(e) => warn!("Failed to reclaim session {}: {}", scope.session_id, e),
            }
        }

        if !reclaimed.is_empty() {
            counter!(SESSIONS_RECLAIMED_TOTAL).increment(reclaimed.len() as u64);
        }
        Ok(reclaimed)
    }

    /// Spawn the periodic sweep.  A zero interval disables it.
    pub fn start(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if self.interval.is_zero() {
            return None;
        }
        let reclaimer = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(reclaimer.interval);
            // The first tick completes immediately; skip it.
            interval.tick().await;

            loop {
                interval.tick().await;
                if reclaimer.shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = reclaimer.sweep_once(SystemTime::now()).await {
                    tracing::error!("Reclamation sweep failed: {e}");
                }
            }
        }))
    }

    /// Signal the background task to stop at its next tick.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}
