//! MemTable Module
//!
//! In-memory data structure for recent writes.
//!
//! ## Responsibilities
//! - Fast reads and writes in memory
//! - Single-writer/multi-reader access pattern
//! - Track size for flush triggers
//! - Ordered iteration for table file creation
//!
//! ## Data Structure Choice
//! BTreeMap wrapped in a parking_lot RwLock:
//! - Ordered keys (required for table file generation and range scans)
//! - One version per key; the sequence number travels with it so the
//!   flushed records keep their write order
//!
//! Once a memtable is frozen for flushing nothing writes to it again, so its
//! read lock is never contended.

mod table;

pub use table::{MemTable, MemTableIterator, ENTRY_OVERHEAD};

/// Entry stored in the MemTable
pub use crate::codec::ValueEntry as MemTableEntry;
