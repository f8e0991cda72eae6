//! Bounded cache of fully verified links.
//!
//! Keyed by link id. Only links that reached `ChainVerified` are stored,
//! and the cache keeps its own copy, so readers never observe a link that is
//! still being verified. The lock guards lookups and inserts only; no
//! cryptographic work runs while it is held.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde::Serialize;
use sigchain_crypto::LinkId;

use super::link::{ChainLink, VerificationState};

/// Default number of cached links.
pub const DEFAULT_CAPACITY: usize = 4000;

/// Counters for observability collaborators.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub evictions: u64,
    /// Links currently resident.
    pub len: usize,
    pub capacity: usize,
}

struct Inner {
    links: LruCache<LinkId, Arc<ChainLink>>,
    hits: u64,
    misses: u64,
    inserts: u64,
    evictions: u64,
}

/// Shared, mutex-guarded LRU of verified links.
pub struct LinkCache {
    inner: Mutex<Inner>,
}

impl LinkCache {
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                links: LruCache::new(capacity),
                hits: 0,
                misses: 0,
                inserts: 0,
                evictions: 0,
            }),
        }
    }

    /// Look up a verified link, marking it recently used.
    #[must_use]
    pub fn get(&self, id: &LinkId) -> Option<Arc<ChainLink>> {
        let mut inner = self.inner.lock();
        let found = inner.links.get(id).cloned();
        if found.is_some() {
            inner.hits += 1;
        } else {
            inner.misses += 1;
        }
        found
    }

    /// Whether `id` is resident, without touching recency or counters.
    #[must_use]
    pub fn contains(&self, id: &LinkId) -> bool {
        self.inner.lock().links.contains(id)
    }

    /// Publish a copy of a fully verified link.
    ///
    /// Returns `false` and stores nothing if the link has not reached
    /// `ChainVerified`.
    pub fn insert(&self, link: &ChainLink) -> bool {
        if link.state() < VerificationState::ChainVerified {
            return false;
        }
        let entry = Arc::new(link.clone());
        let mut inner = self.inner.lock();
        inner.inserts += 1;
        if let Some((evicted, _)) = inner.links.push(link.id(), entry) {
            if evicted != link.id() {
                inner.evictions += 1;
            }
        }
        true
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            inserts: inner.inserts,
            evictions: inner.evictions,
            len: inner.links.len(),
            capacity: inner.links.cap().get(),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().links.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.inner.lock().links.clear();
    }
}

impl Default for LinkCache {
    fn default() -> Self {
        Self::new(NonZeroUsize::new(DEFAULT_CAPACITY).unwrap_or(NonZeroUsize::MIN))
    }
}

impl std::fmt::Debug for LinkCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkCache")
            .field("stats", &self.stats())
            .finish()
    }
}
