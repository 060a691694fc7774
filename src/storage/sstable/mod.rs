//! SSTable Module
//!
//! Sorted String Table - immutable on-disk sorted key-value storage, stored
//! as a data file plus a sparse index file.
//!
//! ## Data File (`NNNNNN.sst`)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (6 bytes)                                        │
//! │   Magic: "LDKV" (4) | Version: u16 (2)                  │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (codec format, strictly increasing keys)        │
//! │   ... one record per key ...                            │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Index File (`NNNNNN.idx`)
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Magic: "LDKI" (4) | Version: u16 (2)                    │
//! │ EntryCount: u64 | MaxSequence: u64 | DataLen: u64       │
//! │ IndexCount: u32                                         │
//! │   [KeyLen: u32][Offset: u64][Key]  (every Nth record)   │
//! │ [MinKeyLen: u32][MinKey] [MaxKeyLen: u32][MaxKey]       │
//! │ CRC32 of everything above: u32                          │
//! └─────────────────────────────────────────────────────────┘
//! ```
//!
//! A "block" is the run of records between two consecutive index offsets.

mod builder;
mod iterator;
mod reader;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use builder::SSTableBuilder;
pub(crate) use builder::remove_table_files;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

// =============================================================================
// Shared Constants (used by builder, reader, iterator)
// =============================================================================

/// Magic bytes identifying a LodeKV table data file
pub(crate) const DATA_MAGIC: &[u8; 4] = b"LDKV";

/// Magic bytes identifying a LodeKV sparse index file
pub(crate) const INDEX_MAGIC: &[u8; 4] = b"LDKI";

/// Current table format version
pub(crate) const VERSION: u16 = 1;

/// Data header size: Magic (4) + Version (2) = 6 bytes
pub(crate) const DATA_HEADER_SIZE: u64 = 6;

// =============================================================================
// SSTable Metadata
// =============================================================================

/// Table file metadata, as recorded in the manifest
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SSTableMeta {
    /// File number shared by the `.sst` and `.idx` pair
    pub id: u64,
    /// Number of records
    pub entry_count: u64,
    /// Smallest key (for range filtering)
    pub min_key: Vec<u8>,
    /// Largest key (for range filtering)
    pub max_key: Vec<u8>,
    /// Highest sequence number stored in the file
    pub max_sequence: u64,
    /// Data file size in bytes
    pub file_size: u64,
}

impl SSTableMeta {
    /// Get the number of entries
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false if key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.entry_count > 0 && key >= self.min_key.as_slice() && key <= self.max_key.as_slice()
    }

    /// True if `[min, max]` intersects this file's key range
    pub fn overlaps(&self, min: &[u8], max: &[u8]) -> bool {
        self.entry_count > 0 && self.min_key.as_slice() <= max && self.max_key.as_slice() >= min
    }
}

/// Path of the data file for table `id`
pub fn data_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.sst", id))
}

/// Path of the index file for table `id`
pub fn index_path(dir: &Path, id: u64) -> PathBuf {
    dir.join(format!("{:06}.idx", id))
}

/// Parse a table id from either file of the pair
/// "000042.sst" → Some(42)
pub fn parse_table_id(path: &Path) -> Option<u64> {
    match path.extension()?.to_str()? {
        "sst" | "idx" => path.file_stem()?.to_str()?.parse().ok(),
        _ => None,
    }
}
