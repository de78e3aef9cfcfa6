//! Caching client: a read-through, write-through cache in front of a store.
//!
//! [`CachedClient`] keeps a cache backend in step with a [`RemoteStore`]:
//!
//! - Writes go to the store first, then the completed key is cached
//! - Reads try the cache, fall back to the store on a miss and backfill
//! - Deletes invalidate the cache entry and delete from the store
//!
//! Cached values carry their schema tag. Reading an entry into a different
//! entity type fails with [`DscacheError::TypeMismatch`] and leaves the
//! destination untouched.
//!
//! The cache is never authoritative over existence: a key missing from the
//! cache is always looked up in the store, and a cache read failure is
//! logged and treated as a miss.
//!
//! # Example
//!
//! ```ignore
//! let client = CachedClient::from_config(MockStore::new(), &DscacheConfig::new("proj"))?;
//!
//! let key = client.put(&Key::incomplete("Book", None), &book).await?;
//! let mut loaded = Book::default();
//! client.get(&key, &mut loaded).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use dscache_core::{
    CacheError, DscacheConfig, DscacheError, DscacheResult, Entity, Key, MultiError, Query,
    StoreError,
};

use crate::cache::{
    CacheBackend, CacheEnvelope, CacheStats, MemoryCacheBackend, RedisCacheBackend,
};
use crate::store::RemoteStore;

/// Store client that caches entities by canonical key.
///
/// # Type Parameters
///
/// - `S`: The remote store writes and cache misses go to
/// - `C`: The cache backend, `dyn CacheBackend` unless a concrete backend is
///   named
///
/// Clones share the store and the cache.
pub struct CachedClient<S, C: ?Sized = dyn CacheBackend> {
    store: Arc<S>,
    cache: Arc<C>,
    project_id: String,
}

impl<S, C: ?Sized> Clone for CachedClient<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            project_id: self.project_id.clone(),
        }
    }
}

impl<S: RemoteStore> CachedClient<S> {
    /// Create a client with the cache backend `config` selects: Redis when
    /// cache servers are configured, otherwise a bounded in-process cache.
    pub fn from_config(store: S, config: &DscacheConfig) -> DscacheResult<Self> {
        config.validate()?;

        let cache: Arc<dyn CacheBackend> = if config.uses_cache_servers() {
            let backend = RedisCacheBackend::new(&config.cache_servers, config.cache_timeout)
                .map_err(|e| DscacheError::from_cache("redis", "connect", e))?;
            Arc::new(backend)
        } else {
            Arc::new(MemoryCacheBackend::new(config.max_cache_size))
        };

        tracing::debug!(
            project_id = %config.project_id,
            backend = cache.name(),
            "Created caching client"
        );
        Ok(Self::new(config.project_id.clone(), store, cache))
    }
}

impl<S, C> CachedClient<S, C>
where
    S: RemoteStore,
    C: CacheBackend + ?Sized,
{
    pub fn new(project_id: impl Into<String>, store: S, cache: Arc<C>) -> Self {
        Self {
            store: Arc::new(store),
            cache,
            project_id: project_id.into(),
        }
    }

    /// The underlying store. Calls made through it bypass the cache.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The cache backend.
    pub fn cache(&self) -> &C {
        &self.cache
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    fn cache_error(&self, operation: &'static str, source: CacheError) -> DscacheError {
        DscacheError::from_cache(self.cache.name(), operation, source)
    }

    /// Write `src` to the store under `key`, then cache it at the completed
    /// key. Returns the completed key.
    ///
    /// If the store write fails nothing is cached. If the cache write fails
    /// the entity is stored but not cached, and the cache error is returned.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn put<T: Entity>(&self, key: &Key, src: &T) -> DscacheResult<Key> {
        let envelope = CacheEnvelope::wrap(src)
            .map_err(|e| DscacheError::invalid_argument("put", e.to_string()))?;
        let bytes = envelope
            .encode()
            .map_err(|e| self.cache_error("put", e))?;

        let key = self
            .store
            .put(key, src)
            .await
            .map_err(|e| DscacheError::from_store("put", e))?;

        let canonical = key.canonical();
        self.cache
            .set(&canonical, bytes)
            .await
            .map_err(|e| self.cache_error("put", e))?;
        tracing::debug!(key = %canonical, "Cached entity after write");

        Ok(key)
    }

    /// Load the entity at `key` into `dst`, from the cache when possible.
    ///
    /// On a miss the store is read and the result cached. A missing entity
    /// is [`DscacheError::NotFound`] and caches nothing.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn get<T: Entity>(&self, key: &Key, dst: &mut T) -> DscacheResult<()> {
        if !key.is_complete() {
            return Err(DscacheError::invalid_argument(
                "get",
                format!("incomplete key {key}"),
            ));
        }

        let canonical = key.canonical();
        if let Some(envelope) = self.read_cached(&canonical).await {
            if !envelope.matches::<T>() {
                return Err(DscacheError::TypeMismatch {
                    key: canonical,
                    cached: envelope.kind,
                    requested: T::kind(),
                });
            }
            match envelope.into_entity::<T>() {
                Ok(entity) => {
                    *dst = entity;
                    tracing::debug!(key = %canonical, "Cache hit");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(key = %canonical, error = %e, "Undecodable cache entry, reading store");
                }
            }
        }

        tracing::debug!(key = %canonical, "Cache miss");
        self.store
            .get(key, dst)
            .await
            .map_err(|e| DscacheError::from_store("get", e))?;

        let bytes = encode_entity(dst).map_err(|e| self.cache_error("get", e))?;
        self.cache
            .set(&canonical, bytes)
            .await
            .map_err(|e| self.cache_error("get", e))
    }

    /// Remove `key` from the cache, then delete it from the store.
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub async fn delete(&self, key: &Key) -> DscacheResult<()> {
        if !key.is_complete() {
            return Err(DscacheError::invalid_argument(
                "delete",
                format!("incomplete key {key}"),
            ));
        }

        self.cache
            .delete(&key.canonical())
            .await
            .map_err(|e| self.cache_error("delete", e))?;

        self.store
            .delete(key)
            .await
            .map_err(|e| DscacheError::from_store("delete", e))
    }

    /// Write every `src[i]` under `keys[i]` in one store batch, then cache
    /// each value at its completed key in input order.
    ///
    /// A failed batch caches nothing; the store's per-item errors come back
    /// as [`DscacheError::Multi`].
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    pub async fn put_multi<T: Entity>(&self, keys: &[Key], src: &[T]) -> DscacheResult<Vec<Key>> {
        if keys.len() != src.len() {
            return Err(DscacheError::invalid_argument(
                "put_multi",
                format!("{} keys for {} values", keys.len(), src.len()),
            ));
        }

        let mut encoded = Vec::with_capacity(src.len());
        for (i, value) in src.iter().enumerate() {
            let envelope = CacheEnvelope::wrap(value).map_err(|e| {
                DscacheError::invalid_argument("put_multi", format!("item {i}: {e}"))
            })?;
            encoded.push(
                envelope
                    .encode()
                    .map_err(|e| self.cache_error("put_multi", e))?,
            );
        }

        let completed = self
            .store
            .put_multi(keys, src)
            .await
            .map_err(|e| DscacheError::from_store("put_multi", e))?;

        let mut first_error = None;
        for (key, bytes) in completed.iter().zip(encoded) {
            if let Err(e) = self.cache.set(&key.canonical(), bytes).await {
                tracing::warn!(key = %key, error = %e, "Failed to cache written entity");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(self.cache_error("put_multi", e)),
            None => Ok(completed),
        }
    }

    /// Load every entity of `keys` into the matching slot of `dst`.
    ///
    /// Cached entities are served without touching the store; the rest are
    /// read in a single store batch and cached. Keys found nowhere are
    /// reported as a [`DscacheError::Multi`] with `NotFound` at their
    /// positions, after every resolved slot has been filled.
    ///
    /// `T` must be a declared entity type: a [`PropertyList`] destination
    /// would accept any cached shape and is rejected.
    ///
    /// [`PropertyList`]: dscache_core::PropertyList
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    pub async fn get_multi<T: Entity>(
        &self,
        keys: &[Key],
        dst: &mut [Option<T>],
    ) -> DscacheResult<()> {
        if T::is_dynamic() {
            return Err(DscacheError::invalid_argument(
                "get_multi",
                format!("destination type {} is not a declared entity", T::kind()),
            ));
        }
        if keys.len() != dst.len() {
            return Err(DscacheError::invalid_argument(
                "get_multi",
                format!("{} keys for {} destinations", keys.len(), dst.len()),
            ));
        }
        if let Some(key) = keys.iter().find(|k| !k.is_complete()) {
            return Err(DscacheError::invalid_argument(
                "get_multi",
                format!("incomplete key {key}"),
            ));
        }

        let canonical: Vec<String> = keys.iter().map(Key::canonical).collect();

        let cached = match self.cache.get_multi(&canonical).await {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(
                    backend = self.cache.name(),
                    error = %e,
                    "Cache batch read failed, reading store"
                );
                HashMap::new()
            }
        };

        let mut results: HashMap<String, T> = HashMap::with_capacity(keys.len());
        for (key, bytes) in cached {
            let envelope = match CacheEnvelope::decode(&bytes) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Undecodable cache entry, reading store");
                    continue;
                }
            };
            if !envelope.matches::<T>() {
                return Err(DscacheError::TypeMismatch {
                    key,
                    cached: envelope.kind,
                    requested: T::kind(),
                });
            }
            match envelope.into_entity::<T>() {
                Ok(entity) => {
                    results.insert(key, entity);
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "Undecodable cache entry, reading store");
                }
            }
        }
        tracing::debug!(hits = results.len(), requested = keys.len(), "Cache batch lookup");

        let mut seen = HashSet::new();
        let mut uncached = Vec::new();
        for (key, c) in keys.iter().zip(&canonical) {
            if !results.contains_key(c) && seen.insert(c) {
                uncached.push(key.clone());
            }
        }

        let mut missing: HashMap<String, StoreError> = HashMap::new();
        let mut backfill_error = None;

        if !uncached.is_empty() {
            let mut loaded: Vec<Option<T>> = vec![None; uncached.len()];
            let item_errors = match self.store.get_multi(&uncached, &mut loaded).await {
                Ok(()) => MultiError::with_len(uncached.len()),
                Err(StoreError::Multi(errors)) => errors,
                Err(e) => return Err(DscacheError::from_store("get_multi", e)),
            };

            for (i, (key, value)) in uncached.iter().zip(loaded).enumerate() {
                let canonical = key.canonical();
                match value {
                    Some(entity) => {
                        let written = match encode_entity(&entity) {
                            Ok(bytes) => self.cache.set(&canonical, bytes).await,
                            Err(e) => Err(e),
                        };
                        if let Err(e) = written {
                            tracing::warn!(key = %canonical, error = %e, "Failed to cache loaded entity");
                            backfill_error.get_or_insert(e);
                        }
                        results.insert(canonical, entity);
                    }
                    None => {
                        let error = item_errors.get(i).cloned().unwrap_or_else(|| {
                            StoreError::NotFound {
                                key: canonical.clone(),
                            }
                        });
                        missing.insert(canonical, error);
                    }
                }
            }
        }

        let mut errors = MultiError::with_len(keys.len());
        for (i, key) in canonical.iter().enumerate() {
            match results.get(key) {
                Some(entity) => dst[i] = Some(entity.clone()),
                None => errors.set(
                    i,
                    missing
                        .get(key)
                        .cloned()
                        .unwrap_or_else(|| StoreError::NotFound { key: key.clone() }),
                ),
            }
        }

        if errors.has_failures() {
            return Err(DscacheError::Multi(errors));
        }
        match backfill_error {
            Some(e) => Err(self.cache_error("get_multi", e)),
            None => Ok(()),
        }
    }

    /// Delete every key from the store in one batch, then remove each from
    /// the cache whatever the store reported.
    ///
    /// A store error is returned after the cache cleanup was attempted.
    #[tracing::instrument(skip_all, fields(count = keys.len()))]
    pub async fn delete_multi(&self, keys: &[Key]) -> DscacheResult<()> {
        if let Some(key) = keys.iter().find(|k| !k.is_complete()) {
            return Err(DscacheError::invalid_argument(
                "delete_multi",
                format!("incomplete key {key}"),
            ));
        }

        let stored = self.store.delete_multi(keys).await;

        let mut first_error = None;
        for key in keys {
            if let Err(e) = self.cache.delete(&key.canonical()).await {
                tracing::warn!(key = %key, error = %e, "Failed to invalidate cache entry");
                first_error.get_or_insert(e);
            }
        }

        stored.map_err(|e| DscacheError::from_store("delete_multi", e))?;
        match first_error {
            Some(e) => Err(self.cache_error("delete_multi", e)),
            None => Ok(()),
        }
    }

    /// Run `query` against the store. Results are not cached; load the
    /// returned keys with [`get`](Self::get) to go through the cache.
    pub fn run(&self, query: &Query) -> S::Iter {
        self.store.run(query)
    }

    /// Drop every cache entry. The store is untouched.
    pub async fn flush_cache(&self) -> DscacheResult<()> {
        self.cache
            .delete_all()
            .await
            .map_err(|e| self.cache_error("flush_cache", e))
    }

    /// Usage statistics of the cache backend.
    pub async fn cache_stats(&self) -> DscacheResult<CacheStats> {
        self.cache
            .stats()
            .await
            .map_err(|e| self.cache_error("cache_stats", e))
    }

    async fn read_cached(&self, canonical: &str) -> Option<CacheEnvelope> {
        match self.cache.get(canonical).await {
            Ok(Some(bytes)) => match CacheEnvelope::decode(&bytes) {
                Ok(envelope) => Some(envelope),
                Err(e) => {
                    tracing::warn!(key = %canonical, error = %e, "Undecodable cache entry, reading store");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(
                    key = %canonical,
                    backend = self.cache.name(),
                    error = %e,
                    "Cache read failed, reading store"
                );
                None
            }
        }
    }
}

fn encode_entity<T: Entity>(entity: &T) -> Result<Vec<u8>, CacheError> {
    CacheEnvelope::wrap(entity)
        .map_err(|e| CacheError::Serialization(e.to_string()))?
        .encode()
}
