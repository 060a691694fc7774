//! Tests for WalReader
//!
//! These tests verify:
//! - Reading records back in order
//! - Stopping at a torn tail without an error
//! - Stopping at a checksum mismatch
//! - Iterator interface

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

use lodekv::codec::Record;
use lodekv::config::WalSyncStrategy;
use lodekv::wal::{WalReader, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal(count: u64) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let mut writer = WalWriter::open(temp_dir.path(), 1, WalSyncStrategy::EveryWrite).unwrap();
    for i in 1..=count {
        writer
            .append(&Record::put(format!("key{}", i), format!("value{}", i), i))
            .unwrap();
    }
    let path = writer.path();
    (temp_dir, path)
}

// =============================================================================
// Read Tests
// =============================================================================

#[test]
fn test_read_empty_segment() {
    let (_temp, path) = setup_temp_wal(0);
    let mut reader = WalReader::open(&path).unwrap();

    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(reader.valid_len(), 0);
    assert!(reader.tail_error().is_none());
}

#[test]
fn test_read_records_in_order() {
    let (_temp, path) = setup_temp_wal(5);
    let mut reader = WalReader::open(&path).unwrap();

    for i in 1..=5u64 {
        let record = reader.next_record().unwrap().unwrap();
        assert_eq!(record.sequence, i);
        assert_eq!(record.key, format!("key{}", i).into_bytes());
    }
    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(reader.valid_len(), fs::metadata(&path).unwrap().len());
}

#[test]
fn test_iterator_yields_all_records() {
    let (_temp, path) = setup_temp_wal(3);

    let sequences: Vec<u64> = WalReader::open(&path)
        .unwrap()
        .map(|r| r.unwrap().sequence)
        .collect();

    assert_eq!(sequences, vec![1, 2, 3]);
}

// =============================================================================
// Tail Handling Tests
// =============================================================================

#[test]
fn test_torn_tail_stops_cleanly() {
    let (_temp, path) = setup_temp_wal(3);
    let intact = fs::metadata(&path).unwrap().len();

    // Half of a fourth record
    let partial = Record::put("key4", "value4", 4).encode();
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&partial[..partial.len() / 2]).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    let mut count = 0;
    while reader.next_record().unwrap().is_some() {
        count += 1;
    }

    assert_eq!(count, 3);
    assert_eq!(reader.valid_len(), intact);
    assert!(reader.tail_error().is_some());
}

#[test]
fn test_checksum_mismatch_stops_reading() {
    let (_temp, path) = setup_temp_wal(3);
    let first_len = Record::put("key1", "value1", 1).encoded_len();

    // Flip a byte in the second record's value
    let mut bytes = fs::read(&path).unwrap();
    let second_len = Record::put("key2", "value2", 2).encoded_len();
    bytes[first_len + second_len - 1] ^= 0xFF;
    fs::write(&path, &bytes).unwrap();

    let mut reader = WalReader::open(&path).unwrap();
    assert_eq!(reader.next_record().unwrap().unwrap().sequence, 1);
    assert!(reader.next_record().unwrap().is_none());
    assert_eq!(reader.valid_len(), first_len as u64);
    assert!(reader.tail_error().is_some());
}
