//! L1 Cache - In-Process LRU
//!
//! Bounded, thread-shared least-recently-used cache. Serves the overwhelming
//! majority of resolves, so every operation is a single short critical
//! section and no caller ever holds the lock across tier I/O.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` around an `lru::LruCache`
//! - `get` promotes recency and returns an owned (`Arc`-backed) clone
//! - Fixed entry capacity; overflow evicts the least recently accessed entry
//! - Every invalidation advances a generation counter under the same lock;
//!   `put_if_generation` lets a reader that fetched a value from a slower
//!   tier drop it when an invalidation ran in between

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};

use lru::LruCache;
use parking_lot::Mutex;

use super::key::{CacheKey, CachedValue};
use super::DEFAULT_L1_CAPACITY;

struct Entries {
    lru: LruCache<CacheKey, CachedValue>,
    generation: u64,
}

/// L1 Cache - in-process LRU
pub struct L1Cache {
    entries: Mutex<Entries>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl L1Cache {
    /// Create a cache with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_L1_CAPACITY)
    }

    /// Create a cache holding at most `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(Entries {
                lru: LruCache::new(capacity),
                generation: 0,
            }),
            capacity: capacity.get(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Get an entry, marking it most recently used
    pub fn get(&self, key: &CacheKey) -> Option<CachedValue> {
        let value = self.entries.lock().lru.get(key).cloned();

        match value {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        value
    }

    /// Insert or replace an entry
    pub fn put(&self, key: CacheKey, value: CachedValue) {
        let displaced = {
            let mut entries = self.entries.lock();
            push(&mut entries.lru, key, value)
        };
        if displaced {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Insert only if no invalidation ran since `generation` was read.
    ///
    /// Returns `false`, leaving the cache untouched, when one did.
    pub fn put_if_generation(&self, key: CacheKey, value: CachedValue, generation: u64) -> bool {
        let displaced = {
            let mut entries = self.entries.lock();
            if entries.generation != generation {
                return false;
            }
            push(&mut entries.lru, key, value)
        };
        if displaced {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        true
    }

    /// Current invalidation generation
    pub fn generation(&self) -> u64 {
        self.entries.lock().generation
    }

    /// Mark an invalidation of other tiers as started.
    ///
    /// Pending `put_if_generation` calls from lookups already in flight fail.
    pub fn advance_generation(&self) {
        self.entries.lock().generation += 1;
    }

    /// Remove one entry, returning whether it was present
    pub fn invalidate(&self, key: &CacheKey) -> bool {
        let mut entries = self.entries.lock();
        entries.generation += 1;
        entries.lru.pop(key).is_some()
    }

    /// Remove every entry whose key starts with `prefix`
    pub fn invalidate_prefix(&self, prefix: &str) -> usize {
        let mut entries = self.entries.lock();
        entries.generation += 1;
        let doomed: Vec<CacheKey> = entries
            .lru
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &doomed {
            entries.lru.pop(key);
        }
        doomed.len()
    }

    /// Read an entry without touching recency or hit/miss counters
    pub fn peek(&self, key: &CacheKey) -> Option<CachedValue> {
        self.entries.lock().lru.peek(key).cloned()
    }

    /// Check presence without touching recency
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().lru.contains(key)
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.lock().lru.len()
    }

    /// Check if cache is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drop every entry
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.generation += 1;
        entries.lru.clear();
    }

    /// Get hit count
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Get miss count
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Get eviction count
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Get hit ratio
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total == 0.0 {
            0.0
        } else {
            hits / total
        }
    }
}

impl Default for L1Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Push into the LRU; `true` when an older entry was evicted to make room.
fn push(lru: &mut LruCache<CacheKey, CachedValue>, key: CacheKey, value: CachedValue) -> bool {
    let replacing = lru.contains(&key);
    // push hands back the old value on replace, or the LRU victim on overflow
    let displaced = lru.push(key, value);
    !replacing && displaced.is_some()
}

/// L1 cache statistics
#[derive(Debug, Clone)]
pub struct L1Stats {
    pub entries: usize,
    pub capacity: usize,
    pub hits: u64,
    pub misses: u64,
    /// Hit ratio (0.0 - 1.0)
    pub hit_ratio: f64,
    pub evictions: u64,
}

impl L1Cache {
    /// Get cache statistics
    pub fn stats(&self) -> L1Stats {
        L1Stats {
            entries: self.len(),
            capacity: self.capacity(),
            hits: self.hits(),
            misses: self.misses(),
            hit_ratio: self.hit_ratio(),
            evictions: self.evictions(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HierarchyNode;

    fn value(id: &str) -> CachedValue {
        CachedValue::node(HierarchyNode::root(id, id, id).unwrap())
    }

    #[test]
    fn test_l1_cache_creation() {
        let cache = L1Cache::new();
        assert!(cache.is_empty());
        assert_eq!(cache.capacity(), DEFAULT_L1_CAPACITY);
    }

    #[test]
    fn test_l1_put_get() {
        let cache = L1Cache::new();
        let key = CacheKey::node("asia");
        cache.put(key.clone(), value("asia"));

        let got = cache.get(&key).unwrap().into_node().unwrap();
        assert_eq!(got.entity_id, "asia");
        assert_eq!(cache.hits(), 1);
    }

    #[test]
    fn test_l1_miss() {
        let cache = L1Cache::new();
        assert!(cache.get(&CacheKey::node("nowhere")).is_none());
        assert_eq!(cache.misses(), 1);
        assert_eq!(cache.hits(), 0);
    }

    #[test]
    fn test_l1_evicts_least_recently_inserted() {
        let cache = L1Cache::with_capacity(2);
        let (a, b, c) = (CacheKey::node("a"), CacheKey::node("b"), CacheKey::node("c"));

        cache.put(a.clone(), value("a"));
        cache.put(b.clone(), value("b"));
        cache.put(c.clone(), value("c"));

        assert!(cache.get(&a).is_none());
        assert!(cache.get(&b).is_some());
        assert!(cache.get(&c).is_some());
        assert_eq!(cache.evictions(), 1);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_l1_get_refreshes_recency() {
        let cache = L1Cache::with_capacity(2);
        let (a, b, c) = (CacheKey::node("a"), CacheKey::node("b"), CacheKey::node("c"));

        cache.put(a.clone(), value("a"));
        cache.put(b.clone(), value("b"));
        cache.get(&a);
        cache.put(c.clone(), value("c"));

        assert!(cache.contains(&a));
        assert!(!cache.contains(&b));
    }

    #[test]
    fn test_l1_replace_is_not_eviction() {
        let cache = L1Cache::with_capacity(2);
        let key = CacheKey::node("a");
        cache.put(key.clone(), value("a"));
        cache.put(key.clone(), value("a"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.evictions(), 0);
    }

    #[test]
    fn test_l1_invalidate() {
        let cache = L1Cache::new();
        let key = CacheKey::node("a");
        cache.put(key.clone(), value("a"));

        assert!(cache.invalidate(&key));
        assert!(!cache.invalidate(&key));
        assert!(cache.get(&key).is_none());
    }

    #[test]
    fn test_l1_invalidate_prefix() {
        let cache = L1Cache::new();
        cache.put(CacheKey::node("reuters:1"), value("r1"));
        cache.put(CacheKey::node("reuters:2"), value("r2"));
        cache.put(CacheKey::node("ap:1"), value("ap1"));

        let removed = cache.invalidate_prefix("hier:node:reuters:");
        assert_eq!(removed, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.contains(&CacheKey::node("ap:1")));
    }

    #[test]
    fn test_l1_conditional_put_skips_after_invalidation() {
        let cache = L1Cache::new();
        let key = CacheKey::node("tokyo");

        let before = cache.generation();
        cache.invalidate(&CacheKey::node("osaka"));
        assert!(!cache.put_if_generation(key.clone(), value("tokyo"), before));
        assert!(!cache.contains(&key));

        let current = cache.generation();
        assert!(cache.put_if_generation(key.clone(), value("tokyo"), current));
        assert!(cache.contains(&key));
    }

    #[test]
    fn test_l1_every_invalidation_advances_generation() {
        let cache = L1Cache::new();
        let start = cache.generation();
        cache.invalidate(&CacheKey::node("absent"));
        cache.invalidate_prefix("hier:descendants:");
        cache.clear();
        assert_eq!(cache.generation(), start + 3);

        // plain writes do not
        cache.put(CacheKey::node("a"), value("a"));
        assert_eq!(cache.generation(), start + 3);
    }

    #[test]
    fn test_l1_stats() {
        let cache = L1Cache::with_capacity(10);
        let key = CacheKey::node("a");
        cache.put(key.clone(), value("a"));
        cache.get(&key);
        cache.get(&CacheKey::node("b"));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[test]
    fn test_l1_concurrent_access() {
        use std::sync::Arc;
        use std::thread;

        let cache = Arc::new(L1Cache::with_capacity(100_000));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let cache = Arc::clone(&cache);
                thread::spawn(move || {
                    for i in 0..1000 {
                        let id = format!("n{}_{}", t, i);
                        let key = CacheKey::node(&id);
                        cache.put(key.clone(), value(&id));
                        assert!(cache.get(&key).is_some());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(cache.len(), 8000);
    }
}
