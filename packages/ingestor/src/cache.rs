//! Dedup Cache
//!
//! Process-wide set of transaction ids whose outputs have already been
//! resolved against the ownership index. The same transaction reaches the
//! ingestor through several channels (mempool entry, mempool exit, block
//! inclusion); a hit lets the filter skip repeat output resolution.
//!
//! Entries never expire by age. Once the cache is full the least recently
//! used id is evicted. `has` leaves recency alone; the filter refreshes a hit
//! by re-inserting it when the slice that saw it completes.

use std::num::NonZeroUsize;

use lru::LruCache;
use parking_lot::Mutex;

/// Default number of transaction ids retained
pub const DEFAULT_DEDUP_CAPACITY: usize = 100_000;

/// Bounded LRU set of resolved transaction ids
///
/// All operations take a single lock and are O(1), so one instance can be
/// shared (behind an `Arc`) between concurrently running filters.
#[derive(Debug)]
pub struct DedupCache {
    entries: Mutex<LruCache<String, ()>>,
}

impl DedupCache {
    /// Create a cache holding at most `capacity` ids (zero is treated as one)
    pub fn new(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(cap)),
        }
    }

    /// Check membership without touching recency
    pub fn has(&self, txid: &str) -> bool {
        self.entries.lock().contains(txid)
    }

    /// Record `txid` as resolved, marking it most recently used
    pub fn insert(&self, txid: impl Into<String>) {
        self.entries.lock().put(txid.into(), ());
    }

    /// Record several ids under one lock
    pub fn insert_many<I, S>(&self, txids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut entries = self.entries.lock();
        for txid in txids {
            entries.put(txid.into(), ());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for DedupCache {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}
