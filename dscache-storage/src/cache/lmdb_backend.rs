//! LMDB-backed cache implementation.
//!
//! Uses the heed crate (Rust bindings for LMDB) to provide a persistent,
//! memory-mapped key-value store for cache entries that survives process
//! restarts.
//!
//! # Thread Safety
//!
//! LMDB provides ACID transactions. The backend uses:
//! - Read transactions for `get`, `get_multi` and `stats`
//! - Write transactions for `set`, `delete` and `delete_all`
//! - Hit and miss counts are tracked with atomic counters
//!
//! The database is bounded by its map size, not by an entry count, so this
//! backend never evicts.
//!
//! LMDB caps key length (511 bytes by default). Cache keys longer than that
//! are stored under their SHA-256 digest.

use std::borrow::Cow;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dscache_core::{CacheError, CacheResult};
use heed::types::{Bytes, Str};
use heed::{Database, Env, EnvOpenOptions};
use sha2::{Digest, Sha256};

use super::traits::{CacheBackend, CacheStats};

/// Error type for opening an LMDB cache.
#[derive(Debug, thiserror::Error)]
pub enum LmdbCacheError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open the database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbCacheError> for CacheError {
    fn from(e: LmdbCacheError) -> Self {
        match e {
            LmdbCacheError::Io(e) => CacheError::Io(e.to_string()),
            LmdbCacheError::EnvOpen(reason) | LmdbCacheError::DbOpen(reason) => {
                CacheError::Connection(reason)
            }
            LmdbCacheError::Transaction(reason) => CacheError::Transaction(reason),
        }
    }
}

fn txn_error(e: heed::Error) -> CacheError {
    CacheError::Transaction(e.to_string())
}

/// Longest key LMDB accepts without a custom build.
const MAX_KEY_BYTES: usize = 511;

/// Key under which `key` is stored. Canonical keys never start with
/// `sha256:`, so digests cannot collide with a stored key.
fn storage_key(key: &str) -> Cow<'_, str> {
    if key.len() <= MAX_KEY_BYTES {
        Cow::Borrowed(key)
    } else {
        Cow::Owned(format!("sha256:{:x}", Sha256::digest(key.as_bytes())))
    }
}

/// LMDB-backed cache.
///
/// # Example
///
/// ```ignore
/// use dscache_storage::cache::LmdbCacheBackend;
///
/// let backend = LmdbCacheBackend::new("/tmp/dscache", 100)?;
/// let client = CachedClient::new("my-project", store, Arc::new(backend));
/// ```
pub struct LmdbCacheBackend {
    /// The LMDB environment.
    env: Env,
    /// The main database (single unnamed database).
    db: Database<Str, Bytes>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl LmdbCacheBackend {
    /// Create a new LMDB cache backend.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the database in megabytes
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory cannot be created
    /// - LMDB environment cannot be opened
    /// - Database cannot be created
    pub fn new<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbCacheError> {
        std::fs::create_dir_all(&path)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(1)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbCacheError::EnvOpen(e.to_string()))?;

        let mut wtxn = env
            .write_txn()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        let db: Database<Str, Bytes> = env
            .create_database(&mut wtxn, None)
            .map_err(|e| LmdbCacheError::DbOpen(e.to_string()))?;

        wtxn.commit()
            .map_err(|e| LmdbCacheError::Transaction(e.to_string()))?;

        Ok(Self {
            env,
            db,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    fn record_lookup(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl CacheBackend for LmdbCacheBackend {
    fn name(&self) -> &'static str {
        "lmdb"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let value = self
            .db
            .get(&rtxn, &storage_key(key))
            .map_err(txn_error)?
            .map(<[u8]>::to_vec);
        self.record_lookup(value.is_some());
        Ok(value)
    }

    async fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            let value = self.db.get(&rtxn, &storage_key(key)).map_err(txn_error)?;
            self.record_lookup(value.is_some());
            if let Some(bytes) = value {
                found.insert(key.clone(), bytes.to_vec());
            }
        }
        Ok(found)
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .put(&mut wtxn, &storage_key(key), &value)
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db
            .delete(&mut wtxn, &storage_key(key))
            .map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn delete_all(&self) -> CacheResult<()> {
        let mut wtxn = self.env.write_txn().map_err(txn_error)?;
        self.db.clear(&mut wtxn).map_err(txn_error)?;
        wtxn.commit().map_err(txn_error)
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        let rtxn = self.env.read_txn().map_err(txn_error)?;
        let entry_count = self.db.len(&rtxn).map_err(txn_error)?;
        let mut memory_bytes = 0u64;
        for item in self.db.iter(&rtxn).map_err(txn_error)? {
            let (key, value) = item.map_err(txn_error)?;
            memory_bytes += (key.len() + value.len()) as u64;
        }
        Ok(CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entry_count,
            memory_bytes,
            evictions: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_backend() -> (LmdbCacheBackend, TempDir) {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let backend =
            LmdbCacheBackend::new(temp_dir.path(), 10).expect("backend creation should succeed");
        (backend, temp_dir)
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let (backend, _temp_dir) = create_test_backend();

        backend
            .set("/\"Book\",1", b"dune".to_vec())
            .await
            .expect("set should succeed");

        let cached = backend.get("/\"Book\",1").await.expect("get should succeed");
        assert_eq!(cached, Some(b"dune".to_vec()));
    }

    #[tokio::test]
    async fn test_get_nonexistent() {
        let (backend, _temp_dir) = create_test_backend();

        let cached = backend.get("/\"Book\",404").await.expect("get should succeed");
        assert!(cached.is_none());
    }

    #[tokio::test]
    async fn test_delete() {
        let (backend, _temp_dir) = create_test_backend();

        backend.set("k", b"v".to_vec()).await.expect("set should succeed");
        backend.delete("k").await.expect("delete should succeed");
        assert!(backend.get("k").await.expect("get should succeed").is_none());

        // Deleting an absent key is not an error
        backend.delete("k").await.expect("second delete should succeed");
    }

    #[tokio::test]
    async fn test_get_multi_and_delete_all() {
        let (backend, _temp_dir) = create_test_backend();

        backend.set("a", b"1".to_vec()).await.expect("set should succeed");
        backend.set("b", b"2".to_vec()).await.expect("set should succeed");

        let found = backend
            .get_multi(&["a".to_string(), "b".to_string(), "c".to_string()])
            .await
            .expect("get_multi should succeed");
        assert_eq!(found.len(), 2);
        assert_eq!(found.get("b"), Some(&b"2".to_vec()));

        backend.delete_all().await.expect("delete_all should succeed");
        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_stats() {
        let (backend, _temp_dir) = create_test_backend();

        // Miss
        let _ = backend.get("k").await;

        backend.set("k", b"value".to_vec()).await.expect("set should succeed");

        // Hits
        let _ = backend.get("k").await;
        let _ = backend.get("k").await;

        let stats = backend.stats().await.expect("stats should succeed");
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.entry_count, 1);
        assert_eq!(stats.memory_bytes, ("k".len() + "value".len()) as u64);
    }

    #[tokio::test]
    async fn test_overwrite() {
        let (backend, _temp_dir) = create_test_backend();

        backend.set("k", b"old".to_vec()).await.expect("set should succeed");
        backend.set("k", b"new".to_vec()).await.expect("set should succeed");

        let cached = backend.get("k").await.expect("get should succeed");
        assert_eq!(cached, Some(b"new".to_vec()));
        assert_eq!(backend.stats().await.expect("stats").entry_count, 1);
    }

    #[tokio::test]
    async fn test_long_keys_are_stored_by_digest() {
        let (backend, _temp_dir) = create_test_backend();
        let long_key = format!("/\"Book\",\"{}\"", "x".repeat(600));
        let other_long_key = format!("/\"Book\",\"{}\"", "y".repeat(600));

        backend
            .set(&long_key, b"long".to_vec())
            .await
            .expect("set with a long key should succeed");
        backend
            .set(&other_long_key, b"other".to_vec())
            .await
            .expect("set with a long key should succeed");

        assert_eq!(
            backend.get(&long_key).await.expect("get"),
            Some(b"long".to_vec())
        );
        let found = backend
            .get_multi(&[long_key.clone(), other_long_key.clone()])
            .await
            .expect("get_multi");
        assert_eq!(found.get(&other_long_key), Some(&b"other".to_vec()));
        assert_eq!(found.len(), 2);

        backend.delete(&long_key).await.expect("delete");
        assert!(backend.get(&long_key).await.expect("get").is_none());
        assert_eq!(backend.stats().await.expect("stats").entry_count, 1);
    }

    #[test]
    fn test_storage_key_keeps_short_keys() {
        assert_eq!(storage_key("/\"Book\",1"), "/\"Book\",1");
        let long_key = "k".repeat(MAX_KEY_BYTES + 1);
        let hashed = storage_key(&long_key);
        assert!(hashed.starts_with("sha256:"));
        assert!(hashed.len() <= MAX_KEY_BYTES);
    }

    #[tokio::test]
    async fn test_reopen_keeps_entries() {
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        {
            let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("open");
            backend.set("k", b"v".to_vec()).await.expect("set should succeed");
        }
        let backend = LmdbCacheBackend::new(temp_dir.path(), 10).expect("reopen");
        assert_eq!(backend.get("k").await.expect("get"), Some(b"v".to_vec()));
    }
}
