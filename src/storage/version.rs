//! Version
//!
//! An immutable snapshot of the table file-set, organised in levels.
//!
//! - L0 holds flushed memtables; files may overlap and are kept newest first
//! - L1 and deeper hold compaction output; files are sorted by key and never
//!   overlap within a level
//!
//! A new `Version` is built for every flush or compaction and swapped in as a
//! single `Arc`; readers that already hold the old one keep using it.

use std::sync::Arc;

use crate::codec::Record;
use crate::error::Result;

use super::{SSTableMeta, SSTableReader};

#[derive(Clone, Debug)]
pub struct Version {
    levels: Vec<Vec<Arc<SSTableReader>>>,
}

impl Version {
    /// An empty file-set with `num_levels` levels
    pub fn new(num_levels: usize) -> Self {
        Self {
            levels: vec![Vec::new(); num_levels],
        }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }

    /// Files of `level`, in lookup order
    pub fn level(&self, level: usize) -> &[Arc<SSTableReader>] {
        self.levels.get(level).map_or(&[], Vec::as_slice)
    }

    /// Every file, newest data first
    pub fn all_files(&self) -> impl Iterator<Item = &Arc<SSTableReader>> {
        self.levels.iter().flatten()
    }

    /// True if table `id` is part of this file-set
    pub fn contains(&self, id: u64) -> bool {
        self.all_files().any(|t| t.id() == id)
    }

    pub fn file_count(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Data bytes held by `level`
    pub fn level_bytes(&self, level: usize) -> u64 {
        self.level(level).iter().map(|t| t.file_size()).sum()
    }

    /// Find the newest record for `key`
    ///
    /// L0 is searched newest first, then each deeper level; within L1+ at
    /// most one file can hold the key. The record returned may be a tombstone.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        for table in self.level(0) {
            if let Some(record) = table.get(key)? {
                return Ok(Some(record));
            }
        }

        for files in self.levels.iter().skip(1) {
            let idx = files.partition_point(|t| t.key_range().1 < key);
            if let Some(table) = files.get(idx) {
                if let Some(record) = table.get(key)? {
                    return Ok(Some(record));
                }
            }
        }

        Ok(None)
    }

    /// Files of `level` whose key range intersects `[min, max]`
    pub fn overlapping(&self, level: usize, min: &[u8], max: &[u8]) -> Vec<Arc<SSTableReader>> {
        self.level(level)
            .iter()
            .filter(|t| t.meta().overlaps(min, max))
            .cloned()
            .collect()
    }

    /// True if any level below `level` holds keys in `[min, max]`
    pub fn deeper_levels_overlap(&self, level: usize, min: &[u8], max: &[u8]) -> bool {
        ((level + 1)..self.levels.len()).any(|l| !self.overlapping(l, min, max).is_empty())
    }

    /// A copy with `table` added to `level`, keeping the level's ordering
    pub fn with_added(&self, level: usize, tables: Vec<Arc<SSTableReader>>) -> Self {
        let mut next = self.clone();
        next.add(level, tables);
        next
    }

    pub(crate) fn add(&mut self, level: usize, tables: Vec<Arc<SSTableReader>>) {
        if self.levels.len() <= level {
            self.levels.resize(level + 1, Vec::new());
        }
        let files = &mut self.levels[level];
        files.extend(tables);
        if level == 0 {
            files.sort_by(|a, b| b.id().cmp(&a.id()));
        } else {
            files.sort_by(|a, b| a.key_range().0.cmp(b.key_range().0));
        }
    }

    /// A copy without the tables whose ids are listed
    pub fn without(&self, ids: &[u64]) -> Self {
        let levels = self
            .levels
            .iter()
            .map(|files| {
                files
                    .iter()
                    .filter(|t| !ids.contains(&t.id()))
                    .cloned()
                    .collect()
            })
            .collect();
        Self { levels }
    }

    /// Metadata for the manifest, level by level
    pub fn metas(&self) -> Vec<Vec<SSTableMeta>> {
        self.levels
            .iter()
            .map(|files| files.iter().map(|t| t.meta().clone()).collect())
            .collect()
    }
}
