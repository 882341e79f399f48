//! In-memory registry of active session ids.
//!
//! Sessions are registered when created and unregistered when ended. The
//! schedulers iterate this set, not the cache, so an idle process issues
//! zero cache commands. A periodic reconcile against the cache's
//! active-session set bounds divergence after restarts and cleans up
//! phantom ids whose session hash expired via TTL.

use std::collections::HashSet;
use std::sync::RwLock;

use tracing::{debug, info};

use crate::cache::StoreResult;
use crate::repository::SessionRepository;

pub struct ActiveSessionRegistry {
    sessions: RwLock<HashSet<String>>,
}

impl ActiveSessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashSet::new()),
        }
    }

    pub fn register(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.insert(session_id.to_string());
        debug!(
            "session registered: {session_id} (total: {})",
            sessions.len()
        );
    }

    pub fn unregister(&self, session_id: &str) {
        let mut sessions = self.sessions.write().unwrap();
        sessions.remove(session_id);
        debug!(
            "session unregistered: {session_id} (total: {})",
            sessions.len()
        );
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    /// Defensive copy; in-loop unregister calls never invalidate a
    /// caller's traversal.
    pub fn snapshot(&self) -> HashSet<String> {
        self.sessions.read().unwrap().clone()
    }

    /// Replace the local set with the verified cache view. Ids whose
    /// session hash has expired are phantoms: dropped from the cache set
    /// and never imported. The swap is a single write so snapshots never
    /// observe a partial update.
    pub async fn reconcile(&self, repository: &SessionRepository) -> StoreResult<()> {
        let candidates = repository.active_sessions().await?;

        let mut verified = HashSet::new();
        let mut phantoms = 0usize;
        for session_id in candidates {
            if repository.session_exists(&session_id).await? {
                verified.insert(session_id);
            } else {
                repository.remove_active(&session_id).await?;
                info!("cleaned up phantom session: {session_id}");
                phantoms += 1;
            }
        }

        let count = verified.len();
        *self.sessions.write().unwrap() = verified;
        debug!("reconciled with cache: {count} active sessions ({phantoms} phantoms removed)");
        Ok(())
    }
}

impl Default for ActiveSessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
