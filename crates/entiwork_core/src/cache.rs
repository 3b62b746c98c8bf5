//! Bounded cache of encoded entity records.

use crate::reference::EntityReference;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

/// Hit and miss counters of an [`EntityCache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups served from the cache.
    pub hits: u64,
    /// Lookups that fell through to the store.
    pub misses: u64,
}

/// LRU cache of encoded records keyed by entity reference.
///
/// Entries are shared byte buffers; the cache never decodes them. Stores
/// invalidate an entry on removal and whenever they write a record they
/// do not cache.
#[derive(Debug)]
pub struct EntityCache {
    entries: Mutex<LruCache<EntityReference, Arc<[u8]>>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl EntityCache {
    /// Creates a cache holding at most `capacity` records.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Creates a cache, or `None` for a zero capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Option<Self> {
        NonZeroUsize::new(capacity).map(Self::new)
    }

    /// Looks up a record, refreshing its recency.
    pub fn get(&self, reference: &EntityReference) -> Option<Arc<[u8]>> {
        let found = self.entries.lock().get(reference).cloned();
        if found.is_some() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            trace!(%reference, "cache hit");
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        found
    }

    /// Stores a record, evicting the least recently used one when full.
    pub fn put(&self, reference: EntityReference, bytes: Arc<[u8]>) {
        self.entries.lock().put(reference, bytes);
    }

    /// Drops a record.
    pub fn invalidate(&self, reference: &EntityReference) {
        self.entries.lock().pop(reference);
    }

    /// Drops every record.
    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    /// Number of cached records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns true if the reference is cached, without touching recency.
    #[must_use]
    pub fn contains(&self, reference: &EntityReference) -> bool {
        self.entries.lock().contains(reference)
    }

    /// Current hit and miss counts.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
