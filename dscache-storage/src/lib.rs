//! dscache Storage - Caching Client, Store Trait and Cache Backends
//!
//! Defines the remote store abstraction, the cache backends and the
//! [`CachedClient`] that keeps the two consistent. [`MockStore`] is an
//! instrumented in-memory store for tests.

pub mod cache;
pub mod client;
pub mod store;

pub use cache::{
    CacheBackend, CacheEnvelope, CacheStats, LmdbCacheBackend, LmdbCacheError,
    MemoryCacheBackend, RedisCacheBackend,
};
pub use client::CachedClient;
pub use store::{MockQueryIterator, MockStore, QueryIterator, RemoteStore, StoreCallCounts};
