//! Storage Module
//!
//! Persistent storage layer: immutable sorted table files organised in levels.
//!
//! ## Responsibilities
//! - Persist flushed memtables as sorted table files with a sparse index
//! - Point lookups newest → oldest, skipping files by key range
//! - Copy-on-write file-set (`Version`) swapped atomically for readers
//! - Manifest recording file-set membership, rewritten atomically
//! - Background leveled compaction
//!
//! ## Directory Layout
//! ```text
//! {data_dir}/MANIFEST     current file-set + next ids
//! {data_dir}/000001.sst   records in key order
//! {data_dir}/000001.idx   sparse index, key range, counts, CRC
//! ```

pub mod sstable;
mod version;
mod manifest;
mod merge;
mod compaction;
mod manager;

use std::path::Path;

use crate::error::Result;

pub use sstable::{SSTableBuilder, SSTableIterator, SSTableMeta, SSTableReader};
pub use version::Version;
pub use manifest::{Manifest, ManifestData};
pub use merge::{MergeIterator, NewestPerKey, RecordSource};
pub use compaction::{CompactionTask, Compactor};
pub use manager::{LevelStats, StorageManager};

/// fsync a directory so newly created or renamed entries survive a crash
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    std::fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
