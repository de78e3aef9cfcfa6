//! Cache backend trait and usage statistics.
//!
//! Backends store opaque byte values under canonical key strings. Encoding
//! entities into those bytes is the caller's job (see
//! [`CacheEnvelope`](super::CacheEnvelope)), which keeps the trait object
//! safe so the client can hold any backend as `Arc<dyn CacheBackend>`.

use async_trait::async_trait;
use dscache_core::CacheResult;
use std::collections::HashMap;

/// Cache backend trait for pluggable cache implementations.
///
/// This trait abstracts over different cache backends (in-process map, LMDB,
/// Redis). Implementations must be thread-safe and support concurrent access.
///
/// # Miss Signalling
///
/// A miss is `Ok(None)` from [`get`](Self::get) or an absent entry in the map
/// returned by [`get_multi`](Self::get_multi). `Err` is reserved for real
/// failures (connection, lock, I/O).
#[async_trait]
pub trait CacheBackend: Send + Sync {
    /// Short backend name used in errors and logs.
    fn name(&self) -> &'static str;

    /// Get the value stored under `key`.
    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>>;

    /// Get every present key in one round trip. Missing keys are simply
    /// absent from the result.
    async fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// Bounded backends may evict older entries to make room.
    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()>;

    /// Remove `key`. Removing an absent key succeeds.
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Remove every entry.
    async fn delete_all(&self) -> CacheResult<()>;

    /// Get cache statistics.
    async fn stats(&self) -> CacheResult<CacheStats>;
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of cache misses.
    pub misses: u64,
    /// Number of entries currently in cache.
    pub entry_count: u64,
    /// Approximate memory usage in bytes.
    pub memory_bytes: u64,
    /// Number of evictions due to capacity.
    pub evictions: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
