//! K-way merge over record sources
//!
//! Yields records ordered by (key ascending, sequence descending). Wrapping
//! the merge in [`NewestPerKey`] keeps only the first, i.e. newest, version
//! of every key.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::codec::Record;
use crate::error::{LodeError, Result};

/// A boxed, sendable stream of records in key order
pub type RecordSource = Box<dyn Iterator<Item = Result<Record>> + Send>;

struct HeapItem {
    record: Record,
    /// Position of the source; lower positions hold newer data
    source: usize,
}

impl Ord for HeapItem {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap: the "greatest" item is the smallest key,
        // then the highest sequence, then the newest source
        other
            .record
            .key
            .cmp(&self.record.key)
            .then_with(|| self.record.sequence.cmp(&other.record.sequence))
            .then_with(|| other.source.cmp(&self.source))
    }
}

impl PartialOrd for HeapItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for HeapItem {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapItem {}

/// Merges several key-ordered sources into one ordered stream
pub struct MergeIterator {
    sources: Vec<RecordSource>,
    heap: BinaryHeap<HeapItem>,
    /// Error raised while refilling, returned before anything else
    pending_error: Option<LodeError>,
    failed: bool,
}

impl MergeIterator {
    /// Sources are listed newest first; the order only breaks sequence ties
    pub fn new(sources: Vec<RecordSource>) -> Self {
        let mut merge = Self {
            heap: BinaryHeap::with_capacity(sources.len()),
            sources,
            pending_error: None,
            failed: false,
        };
        for idx in 0..merge.sources.len() {
            merge.refill(idx);
        }
        merge
    }

    fn refill(&mut self, source: usize) {
        match self.sources[source].next() {
            Some(Ok(record)) => self.heap.push(HeapItem { record, source }),
            Some(Err(e)) => {
                if self.pending_error.is_none() {
                    self.pending_error = Some(e);
                }
            }
            None => {}
        }
    }
}

impl Iterator for MergeIterator {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        if let Some(e) = self.pending_error.take() {
            self.failed = true;
            return Some(Err(e));
        }

        let HeapItem { record, source } = self.heap.pop()?;
        self.refill(source);
        Some(Ok(record))
    }
}

/// Keeps the first record of every run of equal keys
pub struct NewestPerKey<I> {
    inner: I,
    last_key: Option<Vec<u8>>,
}

impl<I> NewestPerKey<I>
where
    I: Iterator<Item = Result<Record>>,
{
    pub fn new(inner: I) -> Self {
        Self {
            inner,
            last_key: None,
        }
    }
}

impl<I> Iterator for NewestPerKey<I>
where
    I: Iterator<Item = Result<Record>>,
{
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let record = match self.inner.next()? {
                Ok(record) => record,
                Err(e) => return Some(Err(e)),
            };
            if self.last_key.as_deref() == Some(record.key.as_slice()) {
                continue;
            }
            self.last_key = Some(record.key.clone());
            return Some(Ok(record));
        }
    }
}
