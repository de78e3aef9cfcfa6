//! Remote store abstraction and an instrumented in-memory implementation.
//!
//! [`RemoteStore`] is the durable document store the caching client sits in
//! front of. [`MockStore`] implements it in memory, assigns ids the way a
//! real store would, counts every call and can inject failures, which is
//! what the client's tests use to prove cache hits never reach the store.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use ::async_trait::async_trait;
use dscache_core::{
    Entity, Key, MultiError, PropertyList, Query, QueryResult, StoreError, StoreResult,
};

/// Durable key-value document store.
///
/// Implementations should be thread-safe and support concurrent access.
/// A missing entity is reported as [`StoreError::NotFound`]; batched reads
/// report per-item failures as [`StoreError::Multi`] while still filling
/// every slot that resolved.
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Iterator type returned by [`run`](Self::run).
    type Iter: QueryIterator;

    /// Write `src` under `key`, returning the key with its id assigned.
    async fn put<T: Entity>(&self, key: &Key, src: &T) -> StoreResult<Key>;

    /// Write `src[i]` under `keys[i]` in one batch. Returns completed keys in
    /// input order.
    async fn put_multi<T: Entity>(&self, keys: &[Key], src: &[T]) -> StoreResult<Vec<Key>>;

    /// Load the entity at `key` into `dst`.
    async fn get<T: Entity>(&self, key: &Key, dst: &mut T) -> StoreResult<()>;

    /// Load every entity of `keys` into the matching slot of `dst`.
    async fn get_multi<T: Entity>(&self, keys: &[Key], dst: &mut [Option<T>]) -> StoreResult<()>;

    /// Delete the entity at `key`. Deleting an absent entity succeeds.
    async fn delete(&self, key: &Key) -> StoreResult<()>;

    /// Delete every entity of `keys` in one batch.
    async fn delete_multi(&self, keys: &[Key]) -> StoreResult<()>;

    /// Start a fresh iteration over the results of `query`.
    fn run(&self, query: &Query) -> Self::Iter;
}

/// Lazy sequence of query results.
#[async_trait]
pub trait QueryIterator: Send {
    /// Next result, `Ok(None)` once exhausted.
    async fn next(&mut self) -> StoreResult<Option<QueryResult>>;
}

/// Snapshot of how often each store operation was called.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCallCounts {
    pub put: u64,
    pub put_multi: u64,
    pub get: u64,
    pub get_multi: u64,
    pub delete: u64,
    pub delete_multi: u64,
    pub run: u64,
}

impl StoreCallCounts {
    /// Calls that read entities by key.
    pub fn reads(&self) -> u64 {
        self.get + self.get_multi
    }

    /// Calls that write or delete entities.
    pub fn writes(&self) -> u64 {
        self.put + self.put_multi + self.delete + self.delete_multi
    }
}

#[derive(Debug, Default)]
struct CallCounters {
    put: AtomicU64,
    put_multi: AtomicU64,
    get: AtomicU64,
    get_multi: AtomicU64,
    delete: AtomicU64,
    delete_multi: AtomicU64,
    run: AtomicU64,
}

impl CallCounters {
    fn snapshot(&self) -> StoreCallCounts {
        StoreCallCounts {
            put: self.put.load(Ordering::Relaxed),
            put_multi: self.put_multi.load(Ordering::Relaxed),
            get: self.get.load(Ordering::Relaxed),
            get_multi: self.get_multi.load(Ordering::Relaxed),
            delete: self.delete.load(Ordering::Relaxed),
            delete_multi: self.delete_multi.load(Ordering::Relaxed),
            run: self.run.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        for counter in [
            &self.put,
            &self.put_multi,
            &self.get,
            &self.get_multi,
            &self.delete,
            &self.delete_multi,
            &self.run,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Key,
    record: PropertyList,
}

#[derive(Debug, Default)]
struct MockStoreInner {
    records: RwLock<BTreeMap<String, StoredRecord>>,
    next_id: AtomicI64,
    calls: CallCounters,
    fail_next: Mutex<Option<StoreError>>,
}

fn poisoned() -> StoreError {
    StoreError::Unavailable {
        reason: "mock store lock poisoned".to_string(),
    }
}

/// In-memory store for tests and local development.
///
/// Clones share the same data. Entities are iterated in canonical-key order.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<MockStoreInner>,
}

impl MockStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call counts since creation or the last [`reset_calls`](Self::reset_calls).
    pub fn calls(&self) -> StoreCallCounts {
        self.inner.calls.snapshot()
    }

    pub fn reset_calls(&self) {
        self.inner.calls.reset();
    }

    /// Make the next operation of any kind fail with `error`.
    pub fn fail_next(&self, error: StoreError) {
        if let Ok(mut slot) = self.inner.fail_next.lock() {
            *slot = Some(error);
        }
    }

    /// Number of stored entities.
    pub fn len(&self) -> usize {
        self.inner.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entity is stored at `key`.
    pub fn contains(&self, key: &Key) -> bool {
        self.inner
            .records
            .read()
            .map(|r| r.contains_key(&key.canonical()))
            .unwrap_or(false)
    }

    /// Remove all stored entities.
    pub fn clear(&self) {
        if let Ok(mut records) = self.inner.records.write() {
            records.clear();
        }
    }

    fn take_failure(&self) -> StoreResult<()> {
        let injected = self.inner.fail_next.lock().map_err(|_| poisoned())?.take();
        match injected {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn complete(&self, key: &Key) -> Key {
        if key.is_complete() {
            key.clone()
        } else {
            key.completed(self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1)
        }
    }

    fn require_complete(operation: &str, key: &Key) -> StoreResult<()> {
        if key.is_complete() {
            Ok(())
        } else {
            Err(StoreError::Rejected {
                operation: operation.to_string(),
                reason: format!("incomplete key {key}"),
            })
        }
    }

    fn load<T: Entity>(&self, key: &Key) -> StoreResult<T> {
        let record = {
            let records = self.inner.records.read().map_err(|_| poisoned())?;
            records
                .get(&key.canonical())
                .map(|stored| stored.record.clone())
        };
        match record {
            Some(record) => Ok(record.into_entity()?),
            None => Err(StoreError::NotFound {
                key: key.canonical(),
            }),
        }
    }
}

#[async_trait]
impl RemoteStore for MockStore {
    type Iter = MockQueryIterator;

    async fn put<T: Entity>(&self, key: &Key, src: &T) -> StoreResult<Key> {
        self.inner.calls.put.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;

        let record = PropertyList::from_entity(src)?;
        let key = self.complete(key);
        let mut records = self.inner.records.write().map_err(|_| poisoned())?;
        records.insert(
            key.canonical(),
            StoredRecord {
                key: key.clone(),
                record,
            },
        );
        Ok(key)
    }

    async fn put_multi<T: Entity>(&self, keys: &[Key], src: &[T]) -> StoreResult<Vec<Key>> {
        self.inner.calls.put_multi.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;

        if keys.len() != src.len() {
            return Err(StoreError::Rejected {
                operation: "put_multi".to_string(),
                reason: format!("{} keys for {} entities", keys.len(), src.len()),
            });
        }

        let mut errors = MultiError::with_len(src.len());
        let mut encoded = Vec::with_capacity(src.len());
        for (i, entity) in src.iter().enumerate() {
            match PropertyList::from_entity(entity) {
                Ok(record) => encoded.push(record),
                Err(e) => errors.set(i, e.into()),
            }
        }
        if errors.has_failures() {
            return Err(StoreError::Multi(errors));
        }

        let completed: Vec<Key> = keys.iter().map(|k| self.complete(k)).collect();
        let mut records = self.inner.records.write().map_err(|_| poisoned())?;
        for (key, record) in completed.iter().zip(encoded) {
            records.insert(
                key.canonical(),
                StoredRecord {
                    key: key.clone(),
                    record,
                },
            );
        }
        Ok(completed)
    }

    async fn get<T: Entity>(&self, key: &Key, dst: &mut T) -> StoreResult<()> {
        self.inner.calls.get.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;
        Self::require_complete("get", key)?;

        *dst = self.load(key)?;
        Ok(())
    }

    async fn get_multi<T: Entity>(&self, keys: &[Key], dst: &mut [Option<T>]) -> StoreResult<()> {
        self.inner.calls.get_multi.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;

        if keys.len() != dst.len() {
            return Err(StoreError::Rejected {
                operation: "get_multi".to_string(),
                reason: format!("{} keys for {} destinations", keys.len(), dst.len()),
            });
        }

        let mut errors = MultiError::with_len(keys.len());
        for (i, (key, slot)) in keys.iter().zip(dst.iter_mut()).enumerate() {
            let loaded = Self::require_complete("get_multi", key).and_then(|()| self.load(key));
            match loaded {
                Ok(entity) => *slot = Some(entity),
                Err(e) => errors.set(i, e),
            }
        }

        if errors.has_failures() {
            Err(StoreError::Multi(errors))
        } else {
            Ok(())
        }
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.inner.calls.delete.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;
        Self::require_complete("delete", key)?;

        let mut records = self.inner.records.write().map_err(|_| poisoned())?;
        records.remove(&key.canonical());
        Ok(())
    }

    async fn delete_multi(&self, keys: &[Key]) -> StoreResult<()> {
        self.inner.calls.delete_multi.fetch_add(1, Ordering::Relaxed);
        self.take_failure()?;
        for key in keys {
            Self::require_complete("delete_multi", key)?;
        }

        let mut records = self.inner.records.write().map_err(|_| poisoned())?;
        for key in keys {
            records.remove(&key.canonical());
        }
        Ok(())
    }

    fn run(&self, query: &Query) -> MockQueryIterator {
        self.inner.calls.run.fetch_add(1, Ordering::Relaxed);
        MockQueryIterator {
            store: Arc::clone(&self.inner),
            query: query.clone(),
            cursor: None,
            skipped: 0,
            yielded: 0,
            pending_error: self.take_failure().err(),
        }
    }
}

/// Iterator over a [`MockStore`] query.
///
/// Reads the store one result at a time, so entities written while iterating
/// past the cursor are seen.
pub struct MockQueryIterator {
    store: Arc<MockStoreInner>,
    query: Query,
    cursor: Option<String>,
    skipped: usize,
    yielded: usize,
    pending_error: Option<StoreError>,
}

impl MockQueryIterator {
    fn advance(&mut self) -> StoreResult<Option<StoredRecord>> {
        let records = self.store.records.read().map_err(|_| poisoned())?;
        let lower = match &self.cursor {
            Some(cursor) => Bound::Excluded(cursor.clone()),
            None => Bound::Unbounded,
        };
        let next = records
            .range((lower, Bound::Unbounded))
            .find(|(_, stored)| self.query.matches(&stored.key, &stored.record))
            .map(|(canonical, stored)| (canonical.clone(), stored.clone()));

        Ok(next.map(|(canonical, stored)| {
            self.cursor = Some(canonical);
            stored
        }))
    }
}

#[async_trait]
impl QueryIterator for MockQueryIterator {
    async fn next(&mut self) -> StoreResult<Option<QueryResult>> {
        if let Some(error) = self.pending_error.take() {
            return Err(error);
        }

        loop {
            if self.query.limit().is_some_and(|limit| self.yielded >= limit) {
                return Ok(None);
            }

            let Some(stored) = self.advance()? else {
                return Ok(None);
            };

            if self.skipped < self.query.offset() {
                self.skipped += 1;
                continue;
            }

            self.yielded += 1;
            let record = (!self.query.is_keys_only()).then_some(stored.record);
            return Ok(Some(QueryResult {
                key: stored.key,
                record,
            }));
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
