//! SSTable Iterator
//!
//! Lazy, block-at-a-time iteration over a table in key order.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::codec::Record;
use crate::error::Result;

use super::SSTableReader;

/// Iterator over SSTable records in sorted key order
///
/// Owns a reference to its reader, so the table stays readable (and its
/// files stay on disk) for as long as the iterator lives.
pub struct SSTableIterator {
    reader: Arc<SSTableReader>,
    /// Next block to load
    next_block: usize,
    /// Decoded records of the current block not yet returned
    buffered: VecDeque<Record>,
    /// Skip records below this key
    lower_bound: Option<Vec<u8>>,
    /// Set after an error; iteration ends
    failed: bool,
}

impl SSTableIterator {
    pub(super) fn new(reader: Arc<SSTableReader>, lower_bound: Option<Vec<u8>>) -> Self {
        let next_block = match &lower_bound {
            Some(key) if reader.block_count() > 0 => reader.block_for(key),
            _ => 0,
        };
        Self {
            reader,
            next_block,
            buffered: VecDeque::new(),
            lower_bound,
            failed: false,
        }
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }

        loop {
            if let Some(record) = self.buffered.pop_front() {
                if let Some(lower) = &self.lower_bound {
                    if record.key.as_slice() < lower.as_slice() {
                        continue;
                    }
                }
                return Some(Ok(record));
            }

            if self.next_block >= self.reader.block_count() {
                return None;
            }

            match self.reader.read_block(self.next_block) {
                Ok(records) => {
                    self.buffered.extend(records);
                    self.next_block += 1;
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}
