//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Append encoded records before any mutation is acknowledged
//! - CRC32 checksums (via the record codec) for corruption detection
//! - Numbered segments, rotated when a memtable is frozen for flushing
//! - Crash recovery and replay, discarding torn tails
//!
//! ## File Layout
//! ```text
//! {data_dir}/wal-00000001.log   oldest live segment
//! {data_dir}/wal-00000002.log   ...
//! {data_dir}/wal-00000003.log   segment currently appended to
//! ```
//! Each segment is a plain concatenation of codec records. A segment may be
//! deleted once the manifest's `log_number` has moved past it.

mod writer;
mod reader;
mod recovery;

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use writer::WalWriter;
pub use reader::WalReader;
pub use recovery::{WalRecovery, RecoveryResult};

const SEGMENT_PREFIX: &str = "wal-";
const SEGMENT_SUFFIX: &str = ".log";

/// Path of WAL segment `id` inside `dir`
pub fn segment_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{}{:08}{}", SEGMENT_PREFIX, id, SEGMENT_SUFFIX))
}

/// Parse a segment id from a file name
/// "wal-00000042.log" → Some(42)
pub fn parse_segment_id(path: &Path) -> Option<u64> {
    let name = path.file_name()?.to_str()?;
    name.strip_prefix(SEGMENT_PREFIX)?
        .strip_suffix(SEGMENT_SUFFIX)?
        .parse()
        .ok()
}

/// All segment ids present in `dir`, ascending
pub fn list_segments(dir: &Path) -> Result<Vec<u64>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_segment_id(&path) {
                ids.push(id);
            }
        }
    }
    ids.sort_unstable();
    Ok(ids)
}

/// Delete every segment with an id below `id`
///
/// Returns the number of segments removed.
pub fn remove_segments_before(dir: &Path, id: u64) -> Result<usize> {
    let mut removed = 0;
    for old in list_segments(dir)?.into_iter().filter(|&s| s < id) {
        fs::remove_file(segment_path(dir, old))?;
        tracing::debug!(segment = old, "removed obsolete WAL segment");
        removed += 1;
    }
    Ok(removed)
}
