//! End-to-end behaviour of the caching client over the mock store.
//!
//! Each test drives [`CachedClient`] through its public API and checks the
//! store call counters and cache contents to see which layer served what.

use std::sync::Arc;

use dscache_storage::{
    CacheBackend, CachedClient, LmdbCacheBackend, MockStore, QueryIterator, RemoteStore,
};
use dscache_test_utils::assertions::*;
use dscache_test_utils::fixtures::*;
use dscache_test_utils::{
    init_test_tracing, DscacheConfig, DscacheError, Entity, EmptyKind, Key, MultiError, Query,
    Scalar, StoreError, TestDbData, TestDbDataDifferent,
};

#[tokio::test]
async fn test_put_then_get_round_trips() {
    init_test_tracing();
    let client = default_client();

    let src = TestDbData::new("TestPutSuccess");
    let key = client.put(&incomplete_key(), &src).await.unwrap();

    let mut dst = TestDbData::default();
    client.get(&key, &mut dst).await.unwrap();
    assert_eq!(dst, src);
}

#[tokio::test]
async fn test_put_delete_get_is_not_found() {
    init_test_tracing();
    let client = default_client();

    let key = client
        .put(&incomplete_key(), &TestDbData::new("short-lived"))
        .await
        .unwrap();
    client.delete(&key).await.unwrap();

    let mut dst = TestDbData::default();
    assert_not_found(&client.get(&key, &mut dst).await);
}

#[tokio::test]
async fn test_cached_get_makes_no_store_reads() {
    init_test_tracing();
    let client = default_client();

    let key = client
        .put(&incomplete_key(), &TestDbData::new("cached"))
        .await
        .unwrap();
    client.store().reset_calls();

    for _ in 0..3 {
        let mut dst = TestDbData::default();
        client.get(&key, &mut dst).await.unwrap();
        assert_eq!(dst.test_string, "cached");
    }
    assert_no_store_reads(client.store());
}

#[tokio::test]
async fn test_get_into_different_kind_is_type_mismatch() {
    init_test_tracing();
    let client = default_client();

    let key = client
        .put(&incomplete_key(), &TestDbData::new("typed"))
        .await
        .unwrap();

    let mut dst = TestDbDataDifferent {
        test_string: "untouched".to_string(),
    };
    let result = client.get(&key, &mut dst).await;

    assert_type_mismatch(&result, TestDbData::kind(), TestDbDataDifferent::kind());
    assert_eq!(dst.test_string, "untouched");
}

#[tokio::test]
async fn test_put_rejects_non_record_payload() {
    let client = default_client();
    let result = client
        .put(&Key::incomplete("Scalar", None), &Scalar("nope".to_string()))
        .await;

    assert_invalid_argument(&result);
    assert_eq!(client.store().calls().put, 0);
}

#[tokio::test]
async fn test_empty_record_is_cacheable() {
    let client = default_client();
    let key = client
        .put(&Key::incomplete("EmptyKind", None), &EmptyKind {})
        .await
        .unwrap();
    client.store().reset_calls();

    let mut dst = EmptyKind {};
    client.get(&key, &mut dst).await.unwrap();
    assert_no_store_reads(client.store());
}

#[tokio::test]
async fn test_capacity_overflow_evicts_first_inserted() {
    init_test_tracing();
    let capacity = 5;
    let client = memory_client(capacity);

    let mut keys = Vec::new();
    for record in test_records("full", capacity + 1) {
        keys.push(client.put(&incomplete_key(), &record).await.unwrap());
    }

    assert_eq!(client.cache().len(), capacity);
    assert!(!client.cache().contains(&keys[0].canonical()));
    for key in &keys[1..] {
        assert!(client.cache().contains(&key.canonical()));
    }
    assert_eq!(client.cache_stats().await.unwrap().evictions, 1);
}

#[tokio::test]
async fn test_capacity_two_a_b_c() {
    init_test_tracing();
    let client = memory_client(2);

    let a = client.put(&test_key(1), &TestDbData::new("A")).await.unwrap();
    let _b = client.put(&test_key(2), &TestDbData::new("B")).await.unwrap();
    let c = client.put(&test_key(3), &TestDbData::new("C")).await.unwrap();
    client.store().reset_calls();

    // A was evicted, so reading it reaches the store.
    let mut dst = TestDbData::default();
    client.get(&a, &mut dst).await.unwrap();
    assert_eq!(dst.test_string, "A");
    assert_eq!(client.store().calls().get, 1);

    // C is still cached. Reading it does not.
    client.store().reset_calls();
    let mut dst = TestDbData::default();
    client.get(&c, &mut dst).await.unwrap();
    assert_eq!(dst.test_string, "C");
    assert_no_store_reads(client.store());
}

#[tokio::test]
async fn test_get_multi_reconciles_cache_store_and_missing() {
    init_test_tracing();
    let client = default_client();

    // key1 cached through the client, key2 only in the store, key3 nowhere.
    let key1 = client
        .put(&test_key(1), &TestDbData::new("cached"))
        .await
        .unwrap();
    let key2 = client
        .store()
        .put(&test_key(2), &TestDbData::new("store-only"))
        .await
        .unwrap();
    let key3 = test_key(3);
    assert!(!client.cache().contains(&key2.canonical()));
    client.store().reset_calls();

    let mut dst: Vec<Option<TestDbData>> = vec![None, None, None];
    let result = client
        .get_multi(&[key1, key2.clone(), key3.clone()], &mut dst)
        .await;

    assert_multi_not_found_at(&result, &[2]);
    assert_eq!(dst[0], Some(TestDbData::new("cached")));
    assert_eq!(dst[1], Some(TestDbData::new("store-only")));
    assert_eq!(dst[2], None);

    // One batched read for the two uncached keys, and key2 is now cached.
    assert_eq!(client.store().calls().get_multi, 1);
    assert_eq!(client.store().calls().get, 0);
    assert!(client.cache().contains(&key2.canonical()));
    assert!(!client.cache().contains(&key3.canonical()));
}

#[tokio::test]
async fn test_get_multi_uncached_then_cached() {
    init_test_tracing();
    let client = default_client();

    let keys = client
        .store()
        .put_multi(
            &[incomplete_key(), incomplete_key(), incomplete_key()],
            &test_records("multi", 3),
        )
        .await
        .unwrap();

    let mut first: Vec<Option<TestDbData>> = vec![None; 3];
    client.get_multi(&keys, &mut first).await.unwrap();
    assert_eq!(client.store().calls().get_multi, 1);

    client.store().reset_calls();
    let mut second: Vec<Option<TestDbData>> = vec![None; 3];
    client.get_multi(&keys, &mut second).await.unwrap();
    assert_no_store_reads(client.store());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_put_multi_then_delete_multi() {
    init_test_tracing();
    let client = default_client();

    let keys = client
        .put_multi(&[incomplete_key(), incomplete_key()], &test_records("pm", 2))
        .await
        .unwrap();
    assert_eq!(client.cache().len(), 2);

    client.delete_multi(&keys).await.unwrap();
    assert!(client.cache().is_empty());
    assert!(client.store().is_empty());

    let mut dst: Vec<Option<TestDbData>> = vec![None, None];
    let result = client.get_multi(&keys, &mut dst).await;
    assert_multi_not_found_at(&result, &[0, 1]);
}

#[tokio::test]
async fn test_keys_only_query_then_cached_get() {
    init_test_tracing();
    let client = default_client();

    client
        .put(&incomplete_key(), &TestDbData::new("TestRunKeysOnlyCached"))
        .await
        .unwrap();

    let query = Query::new(TestDbData::kind()).with_limit(1).keys_only();
    for _ in 0..2 {
        client.store().reset_calls();
        let mut iter = client.run(&query);
        while let Some(result) = iter.next().await.unwrap() {
            let mut dst = TestDbData::default();
            client.get(&result.key, &mut dst).await.unwrap();
            assert_eq!(dst.test_string, "TestRunKeysOnlyCached");
        }
        assert_no_store_reads(client.store());
    }
}

#[tokio::test]
async fn test_from_config_uses_environment_values() {
    let config = DscacheConfig::from_lookup("", |name| match name {
        "DATASTORE_PROJECT_ID" => Some("env-project".to_string()),
        "DSCACHE_MAX_CACHE_SIZE" => Some("1".to_string()),
        _ => None,
    })
    .unwrap();
    let client = CachedClient::from_config(MockStore::new(), &config).unwrap();
    assert_eq!(client.project_id(), "env-project");

    let first = client.put(&test_key(1), &TestDbData::new("1")).await.unwrap();
    client.put(&test_key(2), &TestDbData::new("2")).await.unwrap();

    let stats = client.cache_stats().await.unwrap();
    assert_eq!(stats.entry_count, 1);
    assert_eq!(stats.evictions, 1);

    client.store().reset_calls();
    let mut dst = TestDbData::default();
    client.get(&first, &mut dst).await.unwrap();
    assert_eq!(client.store().calls().get, 1);
}

#[tokio::test]
async fn test_invalid_max_cache_size_fails_construction() {
    let config = DscacheConfig::from_lookup("proj", |name| {
        (name == "DSCACHE_MAX_CACHE_SIZE").then(|| "lots".to_string())
    });
    assert!(config.is_err());

    let result = CachedClient::from_config(
        MockStore::new(),
        &DscacheConfig::new("proj").with_max_cache_size(0),
    );
    assert_config_error(&result.map(|_| ()));
}

#[tokio::test]
async fn test_lmdb_backed_client() {
    init_test_tracing();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(LmdbCacheBackend::new(temp_dir.path(), 10).unwrap());
    let client = CachedClient::new(TEST_PROJECT, MockStore::new(), cache);

    let key = client
        .put(&incomplete_key(), &TestDbData::new("on disk"))
        .await
        .unwrap();
    client.store().reset_calls();

    let mut dst = TestDbData::default();
    client.get(&key, &mut dst).await.unwrap();
    assert_eq!(dst.test_string, "on disk");
    assert_no_store_reads(client.store());
    assert_eq!(client.cache().name(), "lmdb");

    client.delete(&key).await.unwrap();
    assert_eq!(client.cache_stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_lmdb_backed_client_accepts_long_keys() {
    init_test_tracing();
    let temp_dir = tempfile::TempDir::new().unwrap();
    let cache = Arc::new(LmdbCacheBackend::new(temp_dir.path(), 10).unwrap());
    let client = CachedClient::new(TEST_PROJECT, MockStore::new(), cache);

    let key = Key::with_name(TestDbData::kind(), "x".repeat(600), None);
    assert!(key.canonical().len() > 600);

    let key = client
        .put(&key, &TestDbData::new("long key"))
        .await
        .unwrap();
    assert!(client.store().contains(&key));
    client.store().reset_calls();

    let mut dst = TestDbData::default();
    client.get(&key, &mut dst).await.unwrap();
    assert_eq!(dst.test_string, "long key");
    assert_no_store_reads(client.store());

    client.delete(&key).await.unwrap();
    assert_eq!(client.cache_stats().await.unwrap().entry_count, 0);
}

#[tokio::test]
async fn test_put_multi_store_failure_caches_nothing() {
    init_test_tracing();
    let client = default_client();

    let injected = MultiError::new(vec![
        None,
        Some(StoreError::Unavailable {
            reason: "shard offline".to_string(),
        }),
    ]);
    client.store().fail_next(StoreError::Multi(injected.clone()));

    let result = client
        .put_multi(&[test_key(1), test_key(2)], &test_records("batch", 2))
        .await;

    match result {
        Err(DscacheError::Multi(errors)) => assert_eq!(errors, injected),
        other => panic!("Expected Multi error, got: {:?}", other),
    }
    assert!(client.cache().is_empty());
    assert_eq!(client.store().calls().put_multi, 1);
}

// ============================================================================
// CACHE FAILURES
// ============================================================================

#[tokio::test]
async fn test_put_cache_write_failure_keeps_store_write() {
    init_test_tracing();
    let client = failing_client();
    client.cache().fail_writes(true);

    let result = client.put(&test_key(1), &TestDbData::new("stored")).await;

    assert_cache_error(&result, "put");
    assert!(client.store().contains(&test_key(1)));
    assert!(client.cache().inner().is_empty());
}

#[tokio::test]
async fn test_get_cache_read_failure_falls_back_to_store() {
    init_test_tracing();
    let client = failing_client();
    let key = client
        .put(&test_key(1), &TestDbData::new("from store"))
        .await
        .unwrap();
    client.cache().fail_reads(true);
    client.store().reset_calls();

    let mut dst = TestDbData::default();
    client.get(&key, &mut dst).await.unwrap();

    assert_eq!(dst.test_string, "from store");
    assert_eq!(client.store().calls().get, 1);
}

#[tokio::test]
async fn test_get_backfill_failure_is_reported_after_filling_destination() {
    init_test_tracing();
    let client = failing_client();
    let key = client
        .store()
        .put(&test_key(1), &TestDbData::new("from store"))
        .await
        .unwrap();
    client.cache().fail_reads(true);
    client.cache().fail_writes(true);

    let mut dst = TestDbData::default();
    let result = client.get(&key, &mut dst).await;

    assert_cache_error(&result, "get");
    assert_eq!(dst.test_string, "from store");
}

#[tokio::test]
async fn test_get_multi_cache_read_failure_falls_back_to_store() {
    init_test_tracing();
    let client = failing_client();
    let keys = client
        .put_multi(&[test_key(1), test_key(2)], &test_records("fallback", 2))
        .await
        .unwrap();
    client.cache().fail_reads(true);
    client.store().reset_calls();

    let mut dst: Vec<Option<TestDbData>> = vec![None, None];
    client.get_multi(&keys, &mut dst).await.unwrap();

    assert_eq!(dst[0], Some(TestDbData::new("fallback-0")));
    assert_eq!(dst[1], Some(TestDbData::new("fallback-1")));
    assert_eq!(client.store().calls().get_multi, 1);
}
