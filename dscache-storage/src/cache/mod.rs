//! Cache backends for the caching client.
//!
//! A backend is a plain key to bytes store behind the [`CacheBackend`] trait.
//! Entities reach it wrapped in a [`CacheEnvelope`] that carries their schema
//! tag, so a cached value is never decoded into the wrong type.
//!
//! # Backends
//!
//! - [`MemoryCacheBackend`]: process-local, bounded, FIFO eviction
//! - [`LmdbCacheBackend`]: persistent, memory-mapped, unbounded by count
//! - [`RedisCacheBackend`]: networked, sharded across servers
//!
//! # Example
//!
//! ```ignore
//! let cache: Arc<dyn CacheBackend> = Arc::new(MemoryCacheBackend::new(1000));
//! let bytes = CacheEnvelope::wrap(&book)?.encode()?;
//! cache.set(&key.canonical(), bytes).await?;
//! ```

pub mod envelope;
pub mod lmdb_backend;
pub mod memory;
pub mod redis_backend;
pub mod traits;

pub use envelope::CacheEnvelope;
pub use lmdb_backend::{LmdbCacheBackend, LmdbCacheError};
pub use memory::MemoryCacheBackend;
pub use redis_backend::RedisCacheBackend;
pub use traits::{CacheBackend, CacheStats};
