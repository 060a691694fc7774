//! WAL Recovery
//!
//! Handles crash recovery by replaying WAL segments.

use std::fs::OpenOptions;
use std::path::Path;

use crate::codec::Record;
use crate::error::Result;

use super::{list_segments, segment_path, WalReader};

/// Handles WAL recovery after crash
pub struct WalRecovery;

/// Result of a recovery operation
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryResult {
    /// Number of records successfully recovered
    pub records_recovered: u64,

    /// Number of segments replayed
    pub segments_replayed: u64,

    /// Bytes discarded from torn or corrupt tails
    pub bytes_discarded: u64,

    /// Highest sequence number seen (0 if none)
    pub last_sequence: u64,

    /// Whether any segment was truncated (partial writes removed)
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Replay every segment `>= min_segment` in `dir`, oldest first
    ///
    /// Each record is handed to `apply` as it is read. A segment whose tail is
    /// torn or corrupt is truncated at its last valid record; the discarded
    /// bytes belong to appends that were never acknowledged.
    pub fn recover_into<F>(dir: &Path, min_segment: u64, mut apply: F) -> Result<RecoveryResult>
    where
        F: FnMut(Record),
    {
        let mut result = RecoveryResult::default();

        for id in list_segments(dir)?.into_iter().filter(|&s| s >= min_segment) {
            let path = segment_path(dir, id);
            let mut reader = WalReader::open(&path)?;

            while let Some(record) = reader.next_record()? {
                result.last_sequence = result.last_sequence.max(record.sequence);
                result.records_recovered += 1;
                apply(record);
            }
            result.segments_replayed += 1;

            if let Some(reason) = reader.tail_error() {
                let file = OpenOptions::new().write(true).open(&path)?;
                let file_len = file.metadata()?.len();
                let valid_len = reader.valid_len();

                tracing::warn!(
                    segment = id,
                    valid_len,
                    discarded = file_len - valid_len,
                    reason,
                    "discarding invalid WAL tail"
                );

                file.set_len(valid_len)?;
                file.sync_all()?;
                result.bytes_discarded += file_len - valid_len;
                result.was_truncated = true;
            }
        }

        Ok(result)
    }

    /// Replay into a vector (convenience for tools and tests)
    pub fn recover(dir: &Path, min_segment: u64) -> Result<(Vec<Record>, RecoveryResult)> {
        let mut records = Vec::new();
        let result = Self::recover_into(dir, min_segment, |r| records.push(r))?;
        Ok((records, result))
    }

    /// Verify integrity of one segment without modifying it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;
        let mut result = RecoveryResult {
            segments_replayed: 1,
            ..Default::default()
        };

        while let Some(record) = reader.next_record()? {
            result.last_sequence = result.last_sequence.max(record.sequence);
            result.records_recovered += 1;
        }

        if reader.tail_error().is_some() {
            result.bytes_discarded = file_len - reader.valid_len();
            result.was_truncated = true;
        }

        Ok(result)
    }
}
