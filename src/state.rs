//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` is injected into Axum handlers via the `State` extractor. It
//! holds the document store, the identity verifier, the snapshot cache, and
//! the room map: for each document with live peers, the outbound channel of
//! every joined connection. Rooms are fan-out bookkeeping only; elements are
//! never kept here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{RwLock, mpsc};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::frame::Frame;
use crate::rate_limit::StreamThrottle;
use crate::services::cache::{self, SnapshotCache};
use crate::store::{DocumentStore, Identity, IdentityVerifier};

// =============================================================================
// ROOM
// =============================================================================

/// A joined connection.
#[derive(Debug, Clone)]
pub struct Peer {
    pub identity: Identity,
    pub tx: mpsc::Sender<Frame>,
}

/// Live peers of one document.
#[derive(Debug, Default)]
pub struct Room {
    /// `peer_id` -> peer
    pub peers: HashMap<Uuid, Peer>,
}

impl Room {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

// =============================================================================
// APP STATE
// =============================================================================

/// Shared application state, injected into Axum handlers via State extractor.
/// Clone is required by Axum; all inner fields are Arc-wrapped or Clone.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub identities: Arc<dyn IdentityVerifier>,
    pub cache: Arc<dyn SnapshotCache>,
    pub rooms: Arc<RwLock<HashMap<Uuid, Room>>>,
    /// Serializes merge+persist per document.
    commit_locks: Arc<Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>>,
    pub throttle: StreamThrottle,
    pub config: Arc<SyncConfig>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<dyn DocumentStore>, identities: Arc<dyn IdentityVerifier>, config: SyncConfig) -> Self {
        Self {
            store,
            identities,
            cache: cache::with_capacity(config.snapshot_cache_capacity),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            commit_locks: Arc::new(Mutex::new(HashMap::new())),
            throttle: StreamThrottle::new(config.stream_min_interval),
            config: Arc::new(config),
        }
    }

    /// The commit lock for `document_id`, created on first use.
    #[must_use]
    pub fn commit_lock(&self, document_id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self
            .commit_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(document_id).or_default())
    }

    /// Drop the commit lock for `document_id` if nobody holds it.
    pub fn release_commit_lock(&self, document_id: Uuid) {
        let mut locks = self
            .commit_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if locks
            .get(&document_id)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&document_id);
        }
    }

    #[cfg(test)]
    pub(crate) fn commit_lock_count(&self) -> usize {
        self.commit_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn commit_lock_is_shared_per_document() {
        let (state, _) = test_helpers::test_app_state();
        let doc = Uuid::new_v4();
        let a = state.commit_lock(doc);
        let b = state.commit_lock(doc);
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &state.commit_lock(Uuid::new_v4())));
    }

    #[tokio::test]
    async fn release_only_drops_unheld_locks() {
        let (state, _) = test_helpers::test_app_state();
        let doc = Uuid::new_v4();
        let held = state.commit_lock(doc);
        state.release_commit_lock(doc);
        assert_eq!(state.commit_lock_count(), 1);

        drop(held);
        state.release_commit_lock(doc);
        assert_eq!(state.commit_lock_count(), 0);
    }

    #[test]
    fn room_new_is_empty() {
        assert!(Room::new().peers.is_empty());
    }
}
