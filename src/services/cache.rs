//! Recent-snapshot cache keyed by document id.
//!
//! The cache is never the system of record: every entry was either loaded
//! from or confirmed by the store, any entry may be dropped at any time, and
//! a persistence failure or revision conflict invalidates the entry so the
//! next reader goes back to the store.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use uuid::Uuid;

use crate::store::Document;

pub trait SnapshotCache: Send + Sync {
    fn get(&self, id: Uuid) -> Option<Arc<Document>>;
    fn put(&self, document: Arc<Document>);
    fn invalidate(&self, id: Uuid);
}

/// Build the cache for a configured capacity; 0 disables caching.
#[must_use]
pub fn with_capacity(capacity: usize) -> Arc<dyn SnapshotCache> {
    match NonZeroUsize::new(capacity) {
        Some(capacity) => Arc::new(LruSnapshotCache::new(capacity)),
        None => Arc::new(NoCache),
    }
}

// =============================================================================
// LRU
// =============================================================================

/// Bounded least-recently-used cache.
pub struct LruSnapshotCache {
    entries: Mutex<LruCache<Uuid, Arc<Document>>>,
}

impl LruSnapshotCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { entries: Mutex::new(LruCache::new(capacity)) }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LruCache<Uuid, Arc<Document>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl SnapshotCache for LruSnapshotCache {
    fn get(&self, id: Uuid) -> Option<Arc<Document>> {
        self.lock().get(&id).map(Arc::clone)
    }

    fn put(&self, document: Arc<Document>) {
        self.lock().put(document.meta.id, document);
    }

    fn invalidate(&self, id: Uuid) {
        self.lock().pop(&id);
    }
}

// =============================================================================
// DISABLED
// =============================================================================

/// Cache that never holds anything.
pub struct NoCache;

impl SnapshotCache for NoCache {
    fn get(&self, _id: Uuid) -> Option<Arc<Document>> {
        None
    }

    fn put(&self, _document: Arc<Document>) {}

    fn invalidate(&self, _id: Uuid) {}
}
