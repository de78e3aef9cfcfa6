//! dscache Test Utilities
//!
//! Shared test infrastructure for the dscache workspace:
//! - Test entity types and client fixtures
//! - Proptest generators for keys and entities
//! - Custom assertions for dscache error variants
//! - A cache backend with switchable failures
//! - Tracing setup for tests

// Re-export the types tests touch most
pub use dscache_core::{
    CacheError, CacheResult, DscacheConfig, DscacheError, DscacheResult, Entity, Key, KeyId,
    MultiError, PropertyList, Query, StoreError,
};
pub use dscache_storage::{
    CacheBackend, CacheStats, CachedClient, MemoryCacheBackend, MockStore, QueryIterator,
    RemoteStore, StoreCallCounts,
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};

// ============================================================================
// TEST ENTITIES
// ============================================================================

/// Basic test record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDbData {
    pub test_string: String,
}

impl TestDbData {
    pub fn new(test_string: impl Into<String>) -> Self {
        Self {
            test_string: test_string.into(),
        }
    }
}

impl Entity for TestDbData {
    fn kind() -> &'static str {
        "TestDbData"
    }
}

/// Same shape as [`TestDbData`] under a different schema tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestDbDataDifferent {
    pub test_string: String,
}

impl Entity for TestDbDataDifferent {
    fn kind() -> &'static str {
        "TestDbDataDifferent"
    }
}

/// Record with no properties.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmptyKind {}

impl Entity for EmptyKind {
    fn kind() -> &'static str {
        "EmptyKind"
    }
}

/// Entity that serializes to a bare string rather than a record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scalar(pub String);

impl Entity for Scalar {
    fn kind() -> &'static str {
        "Scalar"
    }
}

// ============================================================================
// FAILING CACHE
// ============================================================================

/// Cache backend whose reads and writes can be switched to fail with
/// `CacheError::Connection`. Otherwise it behaves like an unbounded
/// [`MemoryCacheBackend`].
pub struct FailingCache {
    inner: MemoryCacheBackend,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingCache {
    pub fn new() -> Self {
        Self {
            inner: MemoryCacheBackend::unbounded(),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Make `get` and `get_multi` fail.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make `set`, `delete` and `delete_all` fail.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Entries actually held, bypassing the failure switches.
    pub fn inner(&self) -> &MemoryCacheBackend {
        &self.inner
    }

    fn check(&self, flag: &AtomicBool) -> CacheResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(CacheError::Connection("down".to_string()))
        } else {
            Ok(())
        }
    }
}

impl Default for FailingCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for FailingCache {
    fn name(&self) -> &'static str {
        "failing"
    }

    async fn get(&self, key: &str) -> CacheResult<Option<Vec<u8>>> {
        self.check(&self.fail_reads)?;
        self.inner.get(key).await
    }

    async fn get_multi(&self, keys: &[String]) -> CacheResult<HashMap<String, Vec<u8>>> {
        self.check(&self.fail_reads)?;
        self.inner.get_multi(keys).await
    }

    async fn set(&self, key: &str, value: Vec<u8>) -> CacheResult<()> {
        self.check(&self.fail_writes)?;
        self.inner.set(key, value).await
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        self.check(&self.fail_writes)?;
        self.inner.delete(key).await
    }

    async fn delete_all(&self) -> CacheResult<()> {
        self.check(&self.fail_writes)?;
        self.inner.delete_all().await
    }

    async fn stats(&self) -> CacheResult<CacheStats> {
        self.inner.stats().await
    }
}

// ============================================================================
// TRACING
// ============================================================================

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_test_tracing() {
    TRACING.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating dscache keys and entities.

    use super::*;
    use proptest::prelude::*;

    /// Generate a kind name.
    pub fn arb_kind() -> impl Strategy<Value = String> {
        "[A-Z][a-zA-Z]{0,11}"
    }

    /// Generate a key identifier that is either numeric or a name.
    pub fn arb_key_id() -> impl Strategy<Value = KeyId> {
        prop_oneof![
            (1i64..i64::MAX).prop_map(KeyId::Id),
            "[a-zA-Z0-9_-]{1,16}".prop_map(KeyId::Name),
        ]
    }

    fn key_from(kind: String, id: KeyId, parent: Option<Key>) -> Key {
        match id {
            KeyId::Id(id) => Key::with_id(kind, id, parent),
            KeyId::Name(name) => Key::with_name(kind, name, parent),
            KeyId::Incomplete => Key::incomplete(kind, parent),
        }
    }

    /// Generate a complete key, sometimes with a parent, sometimes namespaced.
    pub fn arb_complete_key() -> impl Strategy<Value = Key> {
        (
            arb_kind(),
            arb_key_id(),
            proptest::option::of((arb_kind(), arb_key_id())),
            proptest::option::of("[a-z]{1,8}"),
        )
            .prop_map(|(kind, id, parent, namespace)| {
                let parent = parent.map(|(kind, id)| key_from(kind, id, None));
                let key = key_from(kind, id, parent);
                match namespace {
                    Some(ns) => key.in_namespace(ns),
                    None => key,
                }
            })
    }

    /// Generate an incomplete key.
    pub fn arb_incomplete_key() -> impl Strategy<Value = Key> {
        arb_kind().prop_map(|kind| Key::incomplete(kind, None))
    }

    /// Generate a test record.
    pub fn arb_test_data() -> impl Strategy<Value = TestDbData> {
        "[ -~]{0,64}".prop_map(TestDbData::new)
    }

    /// Generate `1..=max` distinct complete keys of kind `TestDbData`.
    pub fn arb_distinct_keys(max: usize) -> impl Strategy<Value = Vec<Key>> {
        proptest::collection::btree_set(1i64..10_000, 1..=max.max(1)).prop_map(|ids| {
            ids.into_iter()
                .map(|id| Key::with_id(TestDbData::kind(), id, None))
                .collect()
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built clients and data for common testing scenarios.

    use super::*;

    /// Project id used by fixtures.
    pub const TEST_PROJECT: &str = "dscache-test";

    /// Client over a fresh [`MockStore`] and an in-process cache holding
    /// `capacity` entries.
    pub fn memory_client(capacity: usize) -> CachedClient<MockStore, MemoryCacheBackend> {
        CachedClient::new(
            TEST_PROJECT,
            MockStore::new(),
            Arc::new(MemoryCacheBackend::new(capacity)),
        )
    }

    /// Client with the default cache size.
    pub fn default_client() -> CachedClient<MockStore, MemoryCacheBackend> {
        memory_client(dscache_core::DEFAULT_MAX_CACHE_SIZE)
    }

    /// Client over a fresh [`MockStore`] and a [`FailingCache`].
    pub fn failing_client() -> CachedClient<MockStore, FailingCache> {
        CachedClient::new(TEST_PROJECT, MockStore::new(), Arc::new(FailingCache::new()))
    }

    /// An incomplete `TestDbData` key.
    pub fn incomplete_key() -> Key {
        Key::incomplete(TestDbData::kind(), None)
    }

    /// A complete `TestDbData` key with numeric id `id`.
    pub fn test_key(id: i64) -> Key {
        Key::with_id(TestDbData::kind(), id, None)
    }

    /// `count` records with distinct test strings.
    pub fn test_records(prefix: &str, count: usize) -> Vec<TestDbData> {
        (0..count)
            .map(|i| TestDbData::new(format!("{prefix}-{i}")))
            .collect()
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for dscache-specific validation.

    use super::*;

    /// Assert that a DscacheResult is Ok.
    #[track_caller]
    pub fn assert_ok<T: std::fmt::Debug>(result: &DscacheResult<T>) {
        assert!(result.is_ok(), "Expected Ok, got Err: {:?}", result);
    }

    /// Assert that a DscacheResult is a NotFound error.
    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &DscacheResult<T>) {
        match result {
            Err(DscacheError::NotFound { .. }) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    /// Assert that a DscacheResult is a TypeMismatch naming both kinds.
    #[track_caller]
    pub fn assert_type_mismatch<T: std::fmt::Debug>(
        result: &DscacheResult<T>,
        cached: &str,
        requested: &str,
    ) {
        match result {
            Err(DscacheError::TypeMismatch {
                cached: c,
                requested: r,
                ..
            }) => {
                assert_eq!(c, cached, "Wrong cached kind in TypeMismatch");
                assert_eq!(*r, requested, "Wrong requested kind in TypeMismatch");
            }
            other => panic!(
                "Expected TypeMismatch({} -> {}), got: {:?}",
                cached, requested, other
            ),
        }
    }

    /// Assert that a DscacheResult is an InvalidArgument error.
    #[track_caller]
    pub fn assert_invalid_argument<T: std::fmt::Debug>(result: &DscacheResult<T>) {
        match result {
            Err(DscacheError::InvalidArgument { .. }) => {}
            other => panic!("Expected InvalidArgument error, got: {:?}", other),
        }
    }

    /// Assert that a DscacheResult is a Config error.
    #[track_caller]
    pub fn assert_config_error<T: std::fmt::Debug>(result: &DscacheResult<T>) {
        match result {
            Err(DscacheError::Config(_)) => {}
            other => panic!("Expected Config error, got: {:?}", other),
        }
    }

    /// Assert that a DscacheResult is a Cache error raised during `operation`.
    #[track_caller]
    pub fn assert_cache_error<T: std::fmt::Debug>(result: &DscacheResult<T>, operation: &str) {
        match result {
            Err(DscacheError::Cache { operation: op, .. }) => {
                assert_eq!(*op, operation, "Wrong operation in Cache error");
            }
            other => panic!("Expected Cache error during {}, got: {:?}", operation, other),
        }
    }

    /// Assert that a DscacheResult is a Multi error whose not-found items sit
    /// exactly at `positions`.
    #[track_caller]
    pub fn assert_multi_not_found_at<T: std::fmt::Debug>(
        result: &DscacheResult<T>,
        positions: &[usize],
    ) {
        match result {
            Err(DscacheError::Multi(errors)) => {
                assert_eq!(
                    errors.not_found_positions(),
                    positions,
                    "Wrong not-found positions in {}",
                    errors
                );
            }
            other => panic!("Expected Multi error, got: {:?}", other),
        }
    }

    /// Assert that the store saw no key reads since the last reset.
    #[track_caller]
    pub fn assert_no_store_reads(store: &MockStore) {
        let calls = store.calls();
        assert_eq!(calls.reads(), 0, "Expected no store reads, got: {:?}", calls);
    }
}

// ============================================================================
// TESTS
// ============================================================================
