//! Bounded in-process cache with FIFO eviction.
//!
//! Entries live in an [`lru::LruCache`] used as an insertion-ordered map:
//! writes `push` (an overwrite moves the key to the newest end), reads only
//! `peek`, so lookups never change eviction order. When a write takes the
//! entry count past capacity the oldest entry is dropped.
//!
//! # Thread Safety
//!
//! One `std::sync::RwLock` guards the map and its order together. Reads take
//! the read lock, writes the write lock, and no guard is held across an
//! `.await`. Statistics are atomic counters outside the lock.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard};

use async_trait::async_trait;
use dscache_core::{CacheError, CacheResult};
use lru::LruCache;

use super::traits::{CacheBackend, CacheStats};

/// Process-local cache backend.
///
/// # Example
///
/// ```ignore
/// let cache = MemoryCacheBackend::new(1000);
/// cache.set("/\"Book\",1", bytes).await?;
/// assert!(cache.get("/\"Book\",1").await?.is_some());
/// ```
pub struct MemoryCacheBackend {
    entries: RwLock<LruCache<String, Vec<u8>>>,
    capacity: Option<NonZeroUsize>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryCacheBackend {
    /// Cache holding at most `capacity` entries. A zero capacity is treated
    /// as one.
    pub fn new(capacity: usize) -> Self {
        Self::with_capacity(NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN))
    }

    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        Self::build(Some(capacity))
    }

    /// Cache without an entry limit.
    pub fn unbounded() -> Self {
        Self::build(None)
    }

    fn build(capacity: Option<NonZeroUsize>) -> Self {
        Self {
            entries: RwLock::new(LruCache::unbounded()),
            capacity,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    /// Entry limit, or `None` when unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity.map(NonZeroUsize::get)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `key` is cached. Does not count as a hit or miss.
    pub fn contains(&self, key: &str) -> bool {
        self.read_entries().contains(key)
    }

    /// Cached keys from oldest to newest; the first one is evicted next.
    pub fn keys_in_order(&self) -> Vec<String> {
        self.read_entries()
            .iter()
            .rev()
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Read guard for the inspectors, which report the map even after a
    /// writer panicked.
    fn read_entries(&self) -> RwLockReadGuard<'_, LruCache<String, Vec<u8>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for MemoryCacheBackend {
    fn default() -> Self {
        Self::new(dscache_core::DEFAULT_MAX_CACHE_SIZE)
    }
}

#[async_trait]
impl CacheBackend for MemoryCacheBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let value = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            entries.peek(key).cloned()
        };
        self.record_lookup(value.is_some());
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let found: HashMap<String, Vec<u8>> = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            keys.iter()
                .filter_map(|k| entries.peek(k).map(|v| (k.clone(), v.clone())))
                .collect()
        };
        for key in keys {
            self.record_lookup(found.contains_key(key));
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let mut evicted = Vec::new();
        {
            let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
            entries.push(key.to_string(), value);
            if let Some(capacity) = self.capacity {
                while entries.len() > capacity.get() {
                    match entries.pop_lru() {
                        Some((oldest, _)) => evicted.push(oldest),
                        None => break,
                    }
                }
            }
        }
        for oldest in evicted {
            self.evictions.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(key = %oldest, "Evicted oldest cache entry");
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.pop(key);
        Ok(())
    }

    async fn delete_all(&self) -> CacheResult<()> {
        let mut entries = self.entries.write().map_err(|_| CacheError::LockPoisoned)?;
        entries.clear();
        Ok(())
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let (entry_count, memory_bytes) = {
            let entries = self.entries.read().map_err(|_| CacheError::LockPoisoned)?;
            let bytes: usize = entries.iter().map(|(k, v)| k.len() + v.len()).sum();
            (entries.len() as u64, bytes as u64)
        };
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: self.evictions.load(Ordering::Relaxed),
        })
    }
}
