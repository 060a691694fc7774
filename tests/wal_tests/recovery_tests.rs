//! Tests for WAL Recovery
//!
//! These tests verify:
//! - Recovery from clean segments (no corruption)
//! - Recovery from an empty directory
//! - Recovery with partial writes (truncated tail is cut off the file)
//! - Recovery with corrupted records (CRC mismatch)
//! - Segment filtering by the first live segment
//! - Verify mode (stats only, file untouched)

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use lodekv::codec::Record;
use lodekv::config::WalSyncStrategy;
use lodekv::wal::{self, WalRecovery, WalWriter};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn setup_temp_wal() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().to_path_buf();
    (temp_dir, path)
}

/// Write `count` puts into segment `id`, sequences starting at `first_seq`
fn write_segment(dir: &Path, id: u64, first_seq: u64, count: u64) -> PathBuf {
    let mut writer = WalWriter::open(dir, id, WalSyncStrategy::EveryWrite).unwrap();
    for seq in first_seq..first_seq + count {
        writer
            .append(&Record::put(format!("key{}", seq), format!("value{}", seq), seq))
            .unwrap();
    }
    writer.path()
}

// =============================================================================
// Clean Recovery Tests
// =============================================================================

#[test]
fn test_recover_empty_directory() {
    let (_temp, dir) = setup_temp_wal();

    let (records, result) = WalRecovery::recover(&dir, 0).unwrap();

    assert!(records.is_empty());
    assert_eq!(result, Default::default());
}

#[test]
fn test_recover_across_segments_in_order() {
    let (_temp, dir) = setup_temp_wal();
    write_segment(&dir, 1, 1, 3);
    write_segment(&dir, 2, 4, 2);

    let (records, result) = WalRecovery::recover(&dir, 0).unwrap();

    let sequences: Vec<u64> = records.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4, 5]);
    assert_eq!(result.records_recovered, 5);
    assert_eq!(result.segments_replayed, 2);
    assert_eq!(result.last_sequence, 5);
    assert!(!result.was_truncated);
}

#[test]
fn test_recover_skips_segments_below_minimum() {
    let (_temp, dir) = setup_temp_wal();
    write_segment(&dir, 1, 1, 3);
    write_segment(&dir, 2, 4, 2);

    let (records, result) = WalRecovery::recover(&dir, 2).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].sequence, 4);
    assert_eq!(result.segments_replayed, 1);
}

// =============================================================================
// Partial Write Tests
// =============================================================================

#[test]
fn test_recover_truncates_torn_tail() {
    let (_temp, dir) = setup_temp_wal();
    let path = write_segment(&dir, 1, 1, 3);
    let intact = fs::metadata(&path).unwrap().len();

    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[0xAB; 7]).unwrap();
    drop(file);

    let (records, result) = WalRecovery::recover(&dir, 0).unwrap();

    assert_eq!(records.len(), 3);
    assert!(result.was_truncated);
    assert_eq!(result.bytes_discarded, 7);
    assert_eq!(fs::metadata(&path).unwrap().len(), intact);

    // A second pass finds a clean file
    let (_, again) = WalRecovery::recover(&dir, 0).unwrap();
    assert!(!again.was_truncated);
    assert_eq!(again.records_recovered, 3);
}

#[test]
fn test_recover_stops_at_corrupt_record() {
    let (_temp, dir) = setup_temp_wal();
    let path = write_segment(&dir, 1, 1, 4);
    let record_len = Record::put("key1", "value1", 1).encoded_len();

    // Corrupt the CRC of the third record
    let mut bytes = fs::read(&path).unwrap();
    bytes[2 * record_len] ^= 0x01;
    fs::write(&path, &bytes).unwrap();

    let (records, result) = WalRecovery::recover(&dir, 0).unwrap();

    assert_eq!(records.len(), 2);
    assert_eq!(result.last_sequence, 2);
    assert!(result.was_truncated);
    assert_eq!(fs::metadata(&path).unwrap().len(), 2 * record_len as u64);
}

#[test]
fn test_recover_into_applies_each_record() {
    let (_temp, dir) = setup_temp_wal();
    write_segment(&dir, 1, 1, 10);

    let mut seen = 0;
    let result = WalRecovery::recover_into(&dir, 0, |_| seen += 1).unwrap();

    assert_eq!(seen, 10);
    assert_eq!(result.records_recovered, 10);
}

// =============================================================================
// Verify Tests
// =============================================================================

#[test]
fn test_verify_reports_without_truncating() {
    let (_temp, dir) = setup_temp_wal();
    let path = write_segment(&dir, 1, 1, 2);
    let mut file = OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(&[1, 2, 3]).unwrap();
    drop(file);
    let len = fs::metadata(&path).unwrap().len();

    let result = WalRecovery::verify(&wal::segment_path(&dir, 1)).unwrap();

    assert_eq!(result.records_recovered, 2);
    assert!(result.was_truncated);
    assert_eq!(result.bytes_discarded, 3);
    assert_eq!(fs::metadata(&path).unwrap().len(), len);
}
