//! Tests for record encoding and decoding
//!
//! These tests verify:
//! - decode(encode(r)) == r for puts, tombstones, empty and binary data
//! - Byte layout of the fixed header
//! - Truncation, checksum and impossible-length detection
//! - Stream reads of concatenated records

use lodekv::codec::{Record, ValueEntry, HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, TOMBSTONE_MARKER};

// =============================================================================
// Helper Functions
// =============================================================================

fn assert_round_trip(record: Record) {
    let bytes = record.encode();
    let (decoded, consumed) = Record::decode(&bytes).unwrap();

    assert_eq!(decoded, record);
    assert_eq!(consumed, bytes.len());
    assert_eq!(consumed, record.encoded_len());
}

/// A well-formed header with arbitrary lengths and a zero CRC
fn raw_header(key_len: u32, val_len: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(HEADER_SIZE);
    header.extend_from_slice(&0u32.to_le_bytes());
    header.extend_from_slice(&1u64.to_le_bytes());
    header.extend_from_slice(&key_len.to_le_bytes());
    header.extend_from_slice(&val_len.to_le_bytes());
    header
}

// =============================================================================
// Round-Trip Tests
// =============================================================================

#[test]
fn test_round_trip_put() {
    assert_round_trip(Record::put(b"hello".to_vec(), b"world".to_vec(), 1));
}

#[test]
fn test_round_trip_tombstone() {
    assert_round_trip(Record::tombstone(b"gone".to_vec(), 42));
}

#[test]
fn test_round_trip_empty_value() {
    let record = Record::put(b"key_with_empty_value".to_vec(), Vec::new(), 7);
    assert_round_trip(record.clone());

    // An empty value is still a value, not a tombstone
    let (decoded, _) = Record::decode(&record.encode()).unwrap();
    assert_eq!(decoded.entry, ValueEntry::Value(Vec::new()));
}

#[test]
fn test_round_trip_binary_key_and_value() {
    let key: Vec<u8> = (0..=255u8).collect();
    let value: Vec<u8> = (0..4096).map(|i| (i * 31 % 256) as u8).collect();
    assert_round_trip(Record::put(key, value, u64::MAX - 1));
}

#[test]
fn test_round_trip_large_value() {
    let value = vec![0xAB; 256 * 1024];
    assert_round_trip(Record::put(b"big".to_vec(), value, 9));
}

// =============================================================================
// Layout Tests
// =============================================================================

#[test]
fn test_header_layout() {
    let bytes = Record::put(b"ab".to_vec(), b"xyz".to_vec(), 0x0102).encode();

    assert_eq!(bytes.len(), HEADER_SIZE + 2 + 3);
    assert_eq!(&bytes[4..12], &0x0102u64.to_le_bytes());
    assert_eq!(&bytes[12..16], &2u32.to_le_bytes());
    assert_eq!(&bytes[16..20], &3u32.to_le_bytes());
    assert_eq!(&bytes[20..], b"abxyz");

    let crc = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    assert_eq!(crc, crc32fast::hash(&bytes[4..]));
}

#[test]
fn test_tombstone_uses_marker_length() {
    let bytes = Record::tombstone(b"k".to_vec(), 3).encode();

    assert_eq!(bytes.len(), HEADER_SIZE + 1);
    assert_eq!(&bytes[16..20], &TOMBSTONE_MARKER.to_le_bytes());
}

// =============================================================================
// Decode Failure Tests
// =============================================================================

#[test]
fn test_truncated_header_detected() {
    let bytes = Record::put(b"k".to_vec(), b"v".to_vec(), 1).encode();

    for len in [0, 1, HEADER_SIZE - 1] {
        let err = Record::decode(&bytes[..len]).unwrap_err();
        assert!(err.is_corruption(), "len {}: {}", len, err);
    }
}

#[test]
fn test_truncated_payload_detected() {
    let bytes = Record::put(b"key".to_vec(), b"value".to_vec(), 1).encode();

    let err = Record::decode(&bytes[..bytes.len() - 1]).unwrap_err();
    assert!(err.is_corruption());

    let err = Record::decode(&bytes[..HEADER_SIZE]).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_flipped_payload_byte_detected() {
    let mut bytes = Record::put(b"key".to_vec(), b"value".to_vec(), 1).encode().to_vec();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;

    let err = Record::decode(&bytes).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_flipped_crc_byte_detected() {
    let mut bytes = Record::tombstone(b"key".to_vec(), 5).encode().to_vec();
    bytes[0] ^= 0x80;

    let err = Record::decode(&bytes).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_flipped_sequence_byte_detected() {
    let mut bytes = Record::put(b"key".to_vec(), b"value".to_vec(), 1).encode().to_vec();
    bytes[4] ^= 0x02;

    let err = Record::decode(&bytes).unwrap_err();
    assert!(err.is_corruption());
}

#[test]
fn test_impossible_key_length_detected() {
    let header = raw_header(MAX_KEY_SIZE as u32 + 1, 0);

    let err = Record::decode(&header).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("key length"));
}

#[test]
fn test_impossible_value_length_detected() {
    let header = raw_header(1, MAX_VALUE_SIZE as u32 + 1);

    let err = Record::decode(&header).unwrap_err();
    assert!(err.is_corruption());
    assert!(err.to_string().contains("value length"));
}

// =============================================================================
// Stream Tests
// =============================================================================

#[test]
fn test_decode_consumes_only_first_record() {
    let first = Record::put(b"a".to_vec(), b"1".to_vec(), 1);
    let second = Record::tombstone(b"b".to_vec(), 2);
    let mut bytes = first.encode().to_vec();
    bytes.extend_from_slice(&second.encode());

    let (decoded, consumed) = Record::decode(&bytes).unwrap();
    assert_eq!(decoded, first);

    let (decoded, _) = Record::decode(&bytes[consumed..]).unwrap();
    assert_eq!(decoded, second);
}

#[test]
fn test_read_from_stream_until_clean_end() {
    let records = vec![
        Record::put(b"a".to_vec(), b"1".to_vec(), 1),
        Record::tombstone(b"a".to_vec(), 2),
        Record::put(b"b".to_vec(), Vec::new(), 3),
    ];
    let bytes: Vec<u8> = records.iter().flat_map(|r| r.encode().to_vec()).collect();

    let mut stream = bytes.as_slice();
    let mut read = Vec::new();
    while let Some(record) = Record::read_from(&mut stream).unwrap() {
        read.push(record);
    }

    assert_eq!(read, records);
}

#[test]
fn test_read_from_torn_tail_is_corruption() {
    let mut bytes = Record::put(b"a".to_vec(), b"1".to_vec(), 1).encode().to_vec();
    let torn = Record::put(b"b".to_vec(), b"2".to_vec(), 2).encode();
    bytes.extend_from_slice(&torn[..torn.len() - 2]);

    let mut stream = bytes.as_slice();
    assert!(Record::read_from(&mut stream).unwrap().is_some());
    let err = Record::read_from(&mut stream).unwrap_err();
    assert!(err.is_corruption());
}
