//! MemTable implementation
//!
//! BTreeMap-based memtable with RwLock for concurrency.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;

use crate::codec::{Record, ValueEntry};
use crate::error::Result;

/// Bookkeeping bytes charged per key on top of key and value lengths
pub const ENTRY_OVERHEAD: usize = 32;

/// In-memory table for recent writes
pub struct MemTable {
    /// key → (sequence, value-or-tombstone)
    data: RwLock<BTreeMap<Vec<u8>, (u64, ValueEntry)>>,
    /// Approximate size in bytes, readable without the lock
    size: AtomicUsize,
}

impl MemTable {
    /// Create a new empty MemTable
    pub fn new() -> Self {
        Self {
            data: RwLock::new(BTreeMap::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Get the current entry for a key (read lock)
    pub fn get(&self, key: &[u8]) -> Option<ValueEntry> {
        self.data.read().get(key).map(|(_, entry)| entry.clone())
    }

    /// Put a key-value pair (write lock), returns the new approximate size
    pub fn put(&self, key: Vec<u8>, value: Vec<u8>, sequence: u64) -> usize {
        self.insert(key, ValueEntry::Value(value), sequence)
    }

    /// Delete a key (write lock, inserts tombstone), returns the new approximate size
    pub fn delete(&self, key: Vec<u8>, sequence: u64) -> usize {
        self.insert(key, ValueEntry::Tombstone, sequence)
    }

    /// Apply a decoded record (WAL replay)
    pub fn apply(&self, record: Record) -> usize {
        self.insert(record.key, record.entry, record.sequence)
    }

    fn insert(&self, key: Vec<u8>, entry: ValueEntry, sequence: u64) -> usize {
        let mut data = self.data.write();

        match data.get_mut(&key) {
            // An older write never replaces a newer one
            Some((existing_seq, _)) if *existing_seq > sequence => {}
            Some(slot) => {
                let old_len = slot.1.encoded_len();
                let new_len = entry.encoded_len();
                *slot = (sequence, entry);
                if new_len >= old_len {
                    self.size.fetch_add(new_len - old_len, Ordering::Relaxed);
                } else {
                    self.size.fetch_sub(old_len - new_len, Ordering::Relaxed);
                }
            }
            None => {
                let added = key.len() + entry.encoded_len() + ENTRY_OVERHEAD;
                data.insert(key, (sequence, entry));
                self.size.fetch_add(added, Ordering::Relaxed);
            }
        }

        self.size.load(Ordering::Relaxed)
    }

    /// Get approximate size in bytes
    pub fn size(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    /// Get entry count
    pub fn entry_count(&self) -> usize {
        self.data.read().len()
    }

    /// Check if the memtable holds no entries
    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Snapshot of the records in `[from, to)`, in key order
    pub fn range(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Vec<Record> {
        let lower = from.map_or(Bound::Unbounded, Bound::Included);
        let upper = to.map_or(Bound::Unbounded, Bound::Excluded);

        if let (Some(f), Some(t)) = (from, to) {
            if f >= t {
                return Vec::new();
            }
        }

        self.data
            .read()
            .range::<[u8], _>((lower, upper))
            .map(|(key, (sequence, entry))| Record {
                key: key.clone(),
                entry: entry.clone(),
                sequence: *sequence,
            })
            .collect()
    }

    /// Iterate over a snapshot of all records in sorted key order
    pub fn iter(&self) -> MemTableIterator {
        MemTableIterator {
            inner: self.range(None, None).into_iter(),
        }
    }

    /// Visit every record in key order without copying the table
    ///
    /// Holds the read lock for the duration; meant for frozen memtables.
    pub fn try_for_each<F>(&self, mut f: F) -> Result<()>
    where
        F: FnMut(&[u8], u64, &ValueEntry) -> Result<()>,
    {
        let data = self.data.read();
        for (key, (sequence, entry)) in data.iter() {
            f(key, *sequence, entry)?;
        }
        Ok(())
    }
}

impl Default for MemTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a snapshot of MemTable records
pub struct MemTableIterator {
    inner: std::vec::IntoIter<Record>,
}

impl Iterator for MemTableIterator {
    type Item = Record;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
