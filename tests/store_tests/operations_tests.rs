//! Tests for Store read/write operations
//!
//! These tests verify:
//! - put/get/delete semantics
//! - Ordered iteration with bounds and snapshot isolation
//! - Reads across memtable, flushing memtable and tables
//! - Flushes triggered by memtable size
//! - Compaction keeping the visible contents unchanged
//! - Concurrent readers and writers

use std::sync::Arc;
use std::thread;

use lodekv::{Config, Store, WalSyncStrategy};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_store() -> (TempDir, Store) {
    let temp_dir = TempDir::new().unwrap();
    let store = Store::open(test_config(&temp_dir).build()).unwrap();
    (temp_dir, store)
}

fn test_config(dir: &TempDir) -> lodekv::config::ConfigBuilder {
    Config::builder()
        .data_dir(dir.path())
        .index_interval(8)
        .wal_sync_strategy(WalSyncStrategy::EveryNEntries { count: 256 })
        .compaction_interval_ms(50)
}

fn collect(store: &Store, from: Option<&str>, to: Option<&str>) -> Vec<(String, String)> {
    store
        .iterate(from.map(str::as_bytes), to.map(str::as_bytes))
        .unwrap()
        .map(|pair| {
            let (k, v) = pair.unwrap();
            (String::from_utf8(k).unwrap(), String::from_utf8(v).unwrap())
        })
        .collect()
}

fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

// =============================================================================
// Basic Operations
// =============================================================================

#[test]
fn test_put_delete_then_iterate() {
    let (_temp, store) = setup_temp_store();

    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();
    store.delete(b"a").unwrap();

    assert_eq!(store.get(b"a").unwrap(), None);
    assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
    assert_eq!(collect(&store, None, None), pairs(&[("b", "2")]));
}

#[test]
fn test_get_missing_key() {
    let (_temp, store) = setup_temp_store();
    assert_eq!(store.get(b"nope").unwrap(), None);
}

#[test]
fn test_overwrite_returns_latest() {
    let (_temp, store) = setup_temp_store();

    store.put(b"k", b"v1").unwrap();
    store.put(b"k", b"v2").unwrap();

    assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));
}

#[test]
fn test_empty_value_is_not_a_delete() {
    let (_temp, store) = setup_temp_store();

    store.put(b"k", b"").unwrap();
    store.flush().unwrap();

    assert_eq!(store.get(b"k").unwrap(), Some(Vec::new()));
}

#[test]
fn test_delete_missing_key_is_ok() {
    let (_temp, store) = setup_temp_store();

    store.delete(b"ghost").unwrap();

    assert_eq!(store.get(b"ghost").unwrap(), None);
    assert!(collect(&store, None, None).is_empty());
}

#[test]
fn test_oversized_key_rejected() {
    let (_temp, store) = setup_temp_store();
    let key = vec![b'k'; lodekv::codec::MAX_KEY_SIZE + 1];

    assert!(store.put(&key, b"v").is_err());
    assert_eq!(store.stats().last_sequence, 0);
}

// =============================================================================
// Iteration
// =============================================================================

#[test]
fn test_iterate_sorted_regardless_of_insert_order() {
    let (_temp, store) = setup_temp_store();
    for k in ["m", "c", "x", "a", "q"] {
        store.put(k.as_bytes(), k.as_bytes()).unwrap();
    }

    let keys: Vec<String> = collect(&store, None, None).into_iter().map(|(k, _)| k).collect();

    assert_eq!(keys, vec!["a", "c", "m", "q", "x"]);
}

#[test]
fn test_iterate_bounds() {
    let (_temp, store) = setup_temp_store();
    for k in ["a", "b", "c", "d", "e"] {
        store.put(k.as_bytes(), b"v").unwrap();
    }
    store.flush().unwrap();
    store.put(b"bb", b"v").unwrap();

    let keys = |from, to| -> Vec<String> {
        collect(&store, from, to).into_iter().map(|(k, _)| k).collect()
    };

    assert_eq!(keys(Some("b"), Some("d")), vec!["b", "bb", "c"]);
    assert_eq!(keys(None, Some("b")), vec!["a"]);
    assert_eq!(keys(Some("d"), None), vec!["d", "e"]);
    assert!(keys(Some("d"), Some("b")).is_empty());
}

#[test]
fn test_iterator_is_a_snapshot() {
    let (_temp, store) = setup_temp_store();
    store.put(b"a", b"1").unwrap();
    store.put(b"b", b"2").unwrap();

    let iter = store.iterate(None, None).unwrap();
    store.put(b"c", b"3").unwrap();
    store.delete(b"a").unwrap();
    store.flush().unwrap();

    let keys: Vec<Vec<u8>> = iter.map(|p| p.unwrap().0).collect();
    assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);
}

#[test]
fn test_iterate_merges_memtable_and_tables() {
    let (_temp, store) = setup_temp_store();

    store.put(b"a", b"old").unwrap();
    store.put(b"b", b"gone").unwrap();
    store.flush().unwrap();
    store.put(b"a", b"new").unwrap();
    store.delete(b"b").unwrap();
    store.put(b"c", b"3").unwrap();

    assert_eq!(collect(&store, None, None), pairs(&[("a", "new"), ("c", "3")]));
}

// =============================================================================
// Flush and Compaction
// =============================================================================

#[test]
fn test_many_keys_force_flushes() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir)
        .memtable_size_limit(64 * 1024)
        .background_compaction(false)
        .build();
    let store = Store::open(config).unwrap();

    for i in 0..10_000 {
        store
            .put(format!("key{:05}", i).as_bytes(), format!("value{}", i).as_bytes())
            .unwrap();
    }
    store.flush().unwrap();

    assert!(store.sstable_count() >= 2);
    for i in (0..10_000).step_by(97) {
        assert_eq!(
            store.get(format!("key{:05}", i).as_bytes()).unwrap(),
            Some(format!("value{}", i).into_bytes())
        );
    }

    let all = collect(&store, None, None);
    assert_eq!(all.len(), 10_000);
    assert!(all.windows(2).all(|w| w[0].0 < w[1].0));
}

#[test]
fn test_layered_overwrites_and_deletes() {
    let (_temp, store) = setup_temp_store();

    store.put(b"k", b"v1").unwrap();
    store.flush().unwrap();
    store.put(b"k", b"v2").unwrap();
    store.flush().unwrap();
    assert_eq!(store.get(b"k").unwrap(), Some(b"v2".to_vec()));

    store.delete(b"k").unwrap();
    store.flush().unwrap();
    assert_eq!(store.get(b"k").unwrap(), None);

    store.compact_all().unwrap();
    assert_eq!(store.get(b"k").unwrap(), None);
    assert!(collect(&store, None, None).is_empty());
}

#[test]
fn test_compaction_preserves_contents() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir)
        .level0_compaction_trigger(2)
        .background_compaction(false)
        .build();
    let store = Store::open(config).unwrap();

    for round in 0..4 {
        for i in 0..200 {
            let value = format!("r{}-{}", round, i);
            store.put(format!("key{:03}", i).as_bytes(), value.as_bytes()).unwrap();
        }
        for i in (0..200).step_by(10 + round) {
            store.delete(format!("key{:03}", i).as_bytes()).unwrap();
        }
        store.flush().unwrap();
    }
    let before = collect(&store, None, None);

    let runs = store.compact().unwrap();

    assert!(runs >= 1);
    assert_eq!(store.stats().levels[0].files, 0);
    assert_eq!(collect(&store, None, None), before);
    assert_eq!(store.compact().unwrap(), 0);
}

#[test]
fn test_background_compaction_bounds_l0() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir)
        .level0_compaction_trigger(2)
        .memtable_size_limit(4 * 1024)
        .build();
    let store = Store::open(config).unwrap();

    for i in 0..3_000 {
        store
            .put(format!("key{:05}", i % 500).as_bytes(), format!("v{}", i).as_bytes())
            .unwrap();
    }
    store.flush().unwrap();

    // Wait for the compaction thread to catch up
    let mut l0 = usize::MAX;
    for _ in 0..200 {
        l0 = store.stats().levels[0].files;
        if l0 < 2 {
            break;
        }
        thread::sleep(std::time::Duration::from_millis(25));
    }
    assert!(l0 < 2, "L0 still has {} files", l0);

    for i in 2_500..3_000 {
        assert_eq!(
            store.get(format!("key{:05}", i % 500).as_bytes()).unwrap(),
            Some(format!("v{}", i).into_bytes())
        );
    }
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_concurrent_readers_and_writer() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(&temp_dir).memtable_size_limit(8 * 1024).build();
    let store = Arc::new(Store::open(config).unwrap());

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..2_000 {
                store
                    .put(format!("key{:05}", i).as_bytes(), b"value")
                    .unwrap();
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..50 {
                    let keys: Vec<Vec<u8>> = store
                        .iterate(None, None)
                        .unwrap()
                        .map(|p| p.unwrap().0)
                        .collect();
                    assert!(keys.windows(2).all(|w| w[0] < w[1]));
                }
            })
        })
        .collect();

    writer.join().unwrap();
    for reader in readers {
        reader.join().unwrap();
    }

    for i in 0..2_000 {
        assert!(store.get(format!("key{:05}", i).as_bytes()).unwrap().is_some());
    }
}
