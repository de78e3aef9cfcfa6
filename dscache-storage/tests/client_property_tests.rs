//! Property-Based Tests for the Caching Client
//!
//! **Property 1: Read-your-writes**
//! For any key and record, a Put followed by a Get returns the record.
//!
//! **Property 2: Bounded cache**
//! For any capacity and any number of distinct Puts, the cache never holds
//! more than `capacity` entries and keeps the newest ones.
//!
//! **Property 3: Batched reads match single reads**
//! For any subset of keys present in the store, GetMulti fills exactly the
//! present positions and reports the rest as not found.

use std::collections::BTreeSet;

use dscache_test_utils::fixtures::*;
use dscache_test_utils::generators::*;
use dscache_test_utils::{DscacheError, Key, RemoteStore, TestDbData};
use proptest::prelude::*;
use tokio::runtime::Runtime;

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_put_then_get_round_trips(key in arb_complete_key(), data in arb_test_data()) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let client = default_client();
            let key = client
                .put(&key, &data)
                .await
                .map_err(|e| TestCaseError::fail(format!("put failed: {}", e)))?;

            let mut dst = TestDbData::default();
            client
                .get(&key, &mut dst)
                .await
                .map_err(|e| TestCaseError::fail(format!("get failed: {}", e)))?;
            prop_assert_eq!(dst, data);
            prop_assert_eq!(client.store().calls().reads(), 0);
            Ok(())
        })?;
    }

    #[test]
    fn prop_cache_keeps_newest_entries(capacity in 1usize..8, count in 0usize..20) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let client = memory_client(capacity);
            let mut keys: Vec<Key> = Vec::new();
            for record in test_records("cap", count) {
                let key = client
                    .put(&incomplete_key(), &record)
                    .await
                    .map_err(|e| TestCaseError::fail(format!("put failed: {}", e)))?;
                keys.push(key);
            }

            let expected: Vec<String> = keys
                .iter()
                .skip(count.saturating_sub(capacity))
                .map(Key::canonical)
                .collect();
            prop_assert_eq!(client.cache().len(), count.min(capacity));
            prop_assert_eq!(client.cache().keys_in_order(), expected);
            Ok(())
        })?;
    }

    #[test]
    fn prop_get_multi_fills_present_positions(
        keys in arb_distinct_keys(8),
        present_mask in prop::collection::vec(any::<bool>(), 8),
        cached_mask in prop::collection::vec(any::<bool>(), 8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let client = default_client();
            let mut missing = BTreeSet::new();

            for (i, key) in keys.iter().enumerate() {
                let record = TestDbData::new(key.canonical());
                match (present_mask[i], cached_mask[i]) {
                    (false, _) => {
                        missing.insert(i);
                    }
                    (true, true) => {
                        client
                            .put(key, &record)
                            .await
                            .map_err(|e| TestCaseError::fail(format!("put failed: {}", e)))?;
                    }
                    (true, false) => {
                        client
                            .store()
                            .put(key, &record)
                            .await
                            .map_err(|e| TestCaseError::fail(format!("store put failed: {}", e)))?;
                    }
                }
            }

            let mut dst: Vec<Option<TestDbData>> = vec![None; keys.len()];
            let result = client.get_multi(&keys, &mut dst).await;

            match result {
                Ok(()) => prop_assert!(missing.is_empty()),
                Err(DscacheError::Multi(errors)) => {
                    let reported: BTreeSet<usize> = errors.not_found_positions().into_iter().collect();
                    prop_assert_eq!(reported, missing.clone());
                }
                Err(e) => return Err(TestCaseError::fail(format!("unexpected error: {}", e))),
            }

            for (i, key) in keys.iter().enumerate() {
                if missing.contains(&i) {
                    prop_assert!(dst[i].is_none());
                    prop_assert!(!client.cache().contains(&key.canonical()));
                } else {
                    prop_assert_eq!(dst[i].as_ref().map(|d| d.test_string.clone()), Some(key.canonical()));
                    prop_assert!(client.cache().contains(&key.canonical()));
                }
            }
            Ok(())
        })?;
    }
}
