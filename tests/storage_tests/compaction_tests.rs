//! Tests for leveled compaction
//!
//! These tests verify:
//! - L0 → L1 once L0 reaches its trigger
//! - Newest version of each key survives a merge
//! - Tombstones dropped when no deeper level can hold the key
//! - Output split into non-overlapping files
//! - Oversized levels pushed down one file at a time
//! - Input files removed after the merge is installed
//! - A second pass with nothing to do changes nothing

use lodekv::codec::ValueEntry;
use lodekv::config::Config;
use lodekv::memtable::MemTable;
use lodekv::storage::sstable::data_path;
use lodekv::storage::StorageManager;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_storage(trigger: usize) -> (TempDir, Config) {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .index_interval(4)
        .level0_compaction_trigger(trigger)
        .build();
    (temp_dir, config)
}

/// Flush `keys` (all with `value`) as one L0 table; `seq` is bumped per key
fn flush_keys(manager: &StorageManager, keys: &[String], value: Option<&str>, seq: &mut u64) {
    let memtable = MemTable::new();
    for key in keys {
        *seq += 1;
        match value {
            Some(v) => memtable.put(key.clone().into_bytes(), v.as_bytes().to_vec(), *seq),
            None => memtable.delete(key.clone().into_bytes(), *seq),
        };
    }
    manager.flush_memtable(&memtable, *seq, 0).unwrap();
}

fn keys(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|i| format!("key{:04}", i)).collect()
}

fn total_entries(manager: &StorageManager, level: usize) -> u64 {
    manager
        .current()
        .level(level)
        .iter()
        .map(|t| t.entry_count())
        .sum()
}

// =============================================================================
// L0 Compaction
// =============================================================================

#[test]
fn test_l0_trigger_merges_into_l1() {
    let (_temp, config) = setup_temp_storage(2);
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;

    flush_keys(&manager, &keys(0..50), Some("old"), &mut seq);
    assert!(!manager.needs_compaction());
    flush_keys(&manager, &keys(25..75), Some("new"), &mut seq);
    assert!(manager.needs_compaction());

    assert!(manager.compact_once().unwrap());

    let version = manager.current();
    assert!(version.level(0).is_empty());
    assert!(!version.level(1).is_empty());
    assert_eq!(total_entries(&manager, 1), 75);

    let get = |k: &str| manager.get(k.as_bytes()).unwrap().unwrap().entry;
    assert_eq!(get("key0010"), ValueEntry::Value(b"old".to_vec()));
    assert_eq!(get("key0030"), ValueEntry::Value(b"new".to_vec()));
    assert_eq!(get("key0070"), ValueEntry::Value(b"new".to_vec()));
}

#[test]
fn test_compaction_removes_input_files() {
    let (_temp, config) = setup_temp_storage(2);
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..10), Some("a"), &mut seq);
    flush_keys(&manager, &keys(5..15), Some("b"), &mut seq);

    manager.compact_once().unwrap();

    assert!(!data_path(&config.data_dir, 1).exists());
    assert!(!data_path(&config.data_dir, 2).exists());
    let live: Vec<u64> = manager.current().all_files().map(|t| t.id()).collect();
    for id in live {
        assert!(data_path(&config.data_dir, id).exists());
    }
}

#[test]
fn test_second_pass_is_a_no_op() {
    let (_temp, config) = setup_temp_storage(2);
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..20), Some("v"), &mut seq);
    flush_keys(&manager, &keys(10..30), Some("w"), &mut seq);

    assert!(manager.compact_once().unwrap());
    let before = manager.manifest_data();

    assert!(!manager.compact_once().unwrap());
    assert!(!manager.needs_compaction());
    assert_eq!(manager.manifest_data(), before);
}

// =============================================================================
// Tombstones
// =============================================================================

#[test]
fn test_tombstones_dropped_at_bottom() {
    let (_temp, config) = setup_temp_storage(2);
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..10), Some("v"), &mut seq);
    flush_keys(&manager, &keys(0..5), None, &mut seq);

    manager.compact_once().unwrap();

    assert_eq!(total_entries(&manager, 1), 5);
    assert!(manager.get(b"key0001").unwrap().is_none());
    assert!(manager.get(b"key0007").unwrap().is_some());
}

#[test]
fn test_tombstones_kept_when_deeper_level_overlaps() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .level0_compaction_trigger(1)
        .num_levels(3)
        .build();
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;

    // Push a live value all the way to L2
    flush_keys(&manager, &keys(0..5), Some("v"), &mut seq);
    manager.compact_all().unwrap();
    assert_eq!(manager.current().level(2).len(), 1);

    // Deleting it in L0 → L1 must keep the tombstone to shadow L2
    flush_keys(&manager, &keys(0..1), None, &mut seq);
    manager.compact_once().unwrap();

    let l1 = manager.current().level(1).to_vec();
    assert_eq!(l1.len(), 1);
    assert_eq!(l1[0].entry_count(), 1);
    let record = manager.get(b"key0000").unwrap().unwrap();
    assert!(record.entry.is_tombstone());
}

// =============================================================================
// Output Shape
// =============================================================================

#[test]
fn test_output_split_into_sorted_non_overlapping_files() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .level0_compaction_trigger(2)
        .target_file_size(2 * 1024)
        .build();
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..200), Some("some-value"), &mut seq);
    flush_keys(&manager, &keys(100..300), Some("other-value"), &mut seq);

    manager.compact_once().unwrap();

    let l1 = manager.current().level(1).to_vec();
    assert!(l1.len() > 1);
    for pair in l1.windows(2) {
        assert!(pair[0].key_range().1 < pair[1].key_range().0);
    }
    assert_eq!(total_entries(&manager, 1), 300);
}

#[test]
fn test_oversized_level_pushed_down() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .level0_compaction_trigger(1)
        .num_levels(3)
        .base_level_size(1)
        .build();
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..20), Some("v"), &mut seq);

    // L0 → L1, then L1 is over its one-byte budget
    assert!(manager.compact_once().unwrap());
    assert!(manager.needs_compaction());
    assert!(manager.compact_once().unwrap());

    let version = manager.current();
    assert!(version.level(1).is_empty());
    assert_eq!(total_entries(&manager, 2), 20);
    assert!(!manager.needs_compaction());
}

#[test]
fn test_reopen_with_fewer_levels_keeps_compacting() {
    let temp_dir = TempDir::new().unwrap();
    let wide = Config::builder()
        .data_dir(temp_dir.path())
        .level0_compaction_trigger(1)
        .num_levels(4)
        .base_level_size(1)
        .level_size_multiplier(1_000_000)
        .build();
    {
        let manager = StorageManager::open(&wide).unwrap();
        let mut seq = 0;
        flush_keys(&manager, &keys(0..20), Some("v"), &mut seq);
        while manager.compact_once().unwrap() {}
        assert_eq!(total_entries(&manager, 2), 20);
    }

    // Fewer configured levels than the manifest holds, and L2 now over budget
    let narrow = Config::builder()
        .data_dir(temp_dir.path())
        .level0_compaction_trigger(1)
        .num_levels(2)
        .base_level_size(1)
        .build();
    let manager = StorageManager::open(&narrow).unwrap();
    assert_eq!(manager.current().num_levels(), 4);
    assert!(manager.needs_compaction());

    let mut runs = 0;
    while manager.compact_once().unwrap() {
        runs += 1;
        assert!(runs < 100, "compaction did not settle");
    }

    assert_eq!(total_entries(&manager, 3), 20);
    assert_eq!(
        manager.get(b"key0007").unwrap().unwrap().entry,
        ValueEntry::Value(b"v".to_vec())
    );
}

#[test]
fn test_compact_all_moves_everything_to_last_level() {
    let (_temp, config) = setup_temp_storage(10);
    let manager = StorageManager::open(&config).unwrap();
    let mut seq = 0;
    flush_keys(&manager, &keys(0..30), Some("v"), &mut seq);
    flush_keys(&manager, &keys(10..20), None, &mut seq);
    flush_keys(&manager, &keys(25..40), Some("w"), &mut seq);

    assert!(manager.compact_all().unwrap());

    let last = config.num_levels - 1;
    let version = manager.current();
    assert_eq!(version.file_count(), version.level(last).len());
    assert_eq!(total_entries(&manager, last), 30);
    assert!(manager.get(b"key0015").unwrap().is_none());

    // Reopen sees the same layout
    drop(version);
    drop(manager);
    let reopened = StorageManager::open(&config).unwrap();
    assert_eq!(total_entries(&reopened, last), 30);
    assert_eq!(
        reopened.get(b"key0030").unwrap().unwrap().entry,
        ValueEntry::Value(b"w".to_vec())
    );
}
