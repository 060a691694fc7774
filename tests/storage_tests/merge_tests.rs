//! Tests for the k-way merge
//!
//! These tests verify:
//! - Output ordered by key, then newest sequence first
//! - Newest-per-key deduplication
//! - Source errors surfacing to the caller

use lodekv::codec::Record;
use lodekv::storage::{MergeIterator, NewestPerKey, RecordSource};
use lodekv::LodeError;

// =============================================================================
// Helper Functions
// =============================================================================

fn source(records: Vec<Record>) -> RecordSource {
    Box::new(records.into_iter().map(Ok::<Record, LodeError>))
}

fn summary(records: impl Iterator<Item = lodekv::Result<Record>>) -> Vec<(String, u64)> {
    records
        .map(|r| {
            let r = r.unwrap();
            (String::from_utf8(r.key).unwrap(), r.sequence)
        })
        .collect()
}

// =============================================================================
// Merge Tests
// =============================================================================

#[test]
fn test_merge_orders_by_key_then_sequence() {
    let merge = MergeIterator::new(vec![
        source(vec![Record::put("a", "1", 5), Record::put("c", "1", 6)]),
        source(vec![Record::put("a", "0", 2), Record::put("b", "0", 3)]),
    ]);

    assert_eq!(
        summary(merge),
        vec![
            ("a".to_string(), 5),
            ("a".to_string(), 2),
            ("b".to_string(), 3),
            ("c".to_string(), 6),
        ]
    );
}

#[test]
fn test_merge_empty_sources() {
    let merge = MergeIterator::new(vec![source(vec![]), source(vec![])]);
    assert_eq!(merge.count(), 0);

    let merge = MergeIterator::new(Vec::new());
    assert_eq!(merge.count(), 0);
}

#[test]
fn test_newest_per_key_keeps_highest_sequence() {
    let merged = NewestPerKey::new(MergeIterator::new(vec![
        source(vec![Record::put("k", "old", 1)]),
        source(vec![Record::tombstone("k", 9), Record::put("z", "1", 4)]),
        source(vec![Record::put("k", "mid", 5)]),
    ]));

    let records: Vec<Record> = merged.map(Result::unwrap).collect();

    assert_eq!(records.len(), 2);
    assert_eq!(records[0].key, b"k");
    assert!(records[0].entry.is_tombstone());
    assert_eq!(records[0].sequence, 9);
    assert_eq!(records[1].key, b"z");
}

#[test]
fn test_source_error_is_returned() {
    let failing: RecordSource = Box::new(
        vec![
            Ok(Record::put("a", "1", 1)),
            Err(LodeError::Corruption("bad block".into())),
        ]
        .into_iter(),
    );
    let merge = MergeIterator::new(vec![failing, source(vec![Record::put("b", "1", 2)])]);

    let results: Vec<_> = merge.collect();

    assert!(results.iter().any(|r| matches!(r, Err(e) if e.is_corruption())));
}
