//! Leveled compaction
//!
//! ## Policy
//! - L0 → L1 when L0 holds `level0_compaction_trigger` files: every L0 file
//!   plus the L1 files they overlap
//! - Ln → Ln+1 when Ln exceeds its byte budget: one Ln file, chosen
//!   round-robin by key, plus the Ln+1 files it overlaps
//!
//! Output keeps only the newest version of each key and is split into files
//! of roughly `target_file_size`. Tombstones are dropped when no deeper level
//! can still hold an older version of the key.

use std::path::Path;
use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;

use super::sstable::remove_table_files;
use super::{MergeIterator, NewestPerKey, RecordSource, SSTableBuilder, SSTableReader, Version};

/// A unit of compaction work
#[derive(Debug, Clone)]
pub struct CompactionTask {
    /// Level the primary inputs come from
    pub level: usize,
    /// Level the output is written to
    pub output_level: usize,
    /// Files from `level`, newest data first
    pub inputs: Vec<Arc<SSTableReader>>,
    /// Overlapping files from `output_level`
    pub next_inputs: Vec<Arc<SSTableReader>>,
    /// Tombstones can be discarded instead of rewritten
    pub drop_tombstones: bool,
}

impl CompactionTask {
    /// Ids of every input file
    pub fn input_ids(&self) -> Vec<u64> {
        self.all_inputs().map(|t| t.id()).collect()
    }

    /// Total data bytes read by this task
    pub fn input_bytes(&self) -> u64 {
        self.all_inputs().map(|t| t.file_size()).sum()
    }

    fn all_inputs(&self) -> impl Iterator<Item = &Arc<SSTableReader>> {
        self.inputs.iter().chain(self.next_inputs.iter())
    }
}

/// Picks and runs compactions
///
/// Holds the per-level round-robin pointers; the storage manager keeps it
/// behind a mutex so only one compaction runs at a time.
pub struct Compactor {
    config: Config,
    /// Largest key compacted last time, per level; grows with the version
    pointers: Vec<Option<Vec<u8>>>,
}

impl Compactor {
    pub fn new(config: Config) -> Self {
        let levels = config.num_levels;
        Self {
            config,
            pointers: vec![None; levels],
        }
    }

    /// True if `version` has a level over its trigger or budget
    pub fn needs_compaction(&self, version: &Version) -> bool {
        version.level(0).len() >= self.config.level0_compaction_trigger
            || self.most_oversized_level(version).is_some()
    }

    /// Choose the next compaction, if any level needs one
    pub fn pick(&mut self, version: &Version) -> Option<CompactionTask> {
        if version.level(0).len() >= self.config.level0_compaction_trigger {
            let inputs = version.level(0).to_vec();
            return Some(self.expand(version, 0, inputs));
        }

        let level = self.most_oversized_level(version)?;
        // A reopened manifest may carry more levels than the config asks for
        if self.pointers.len() < version.num_levels() {
            self.pointers.resize(version.num_levels(), None);
        }
        let files = version.level(level);
        let chosen = match &self.pointers[level] {
            Some(pointer) => files
                .iter()
                .find(|t| t.key_range().0 > pointer.as_slice())
                .unwrap_or(&files[0]),
            None => &files[0],
        };
        self.pointers[level] = Some(chosen.key_range().1.to_vec());

        let inputs = vec![Arc::clone(chosen)];
        Some(self.expand(version, level, inputs))
    }

    /// A task merging every live file into the last level
    pub fn full_compaction(&self, version: &Version) -> Option<CompactionTask> {
        if version.file_count() == 0 {
            return None;
        }
        Some(CompactionTask {
            level: 0,
            output_level: version.num_levels() - 1,
            inputs: version.all_files().cloned().collect(),
            next_inputs: Vec::new(),
            drop_tombstones: true,
        })
    }

    /// Merge the task's inputs into new table files
    ///
    /// `alloc_id` hands out fresh file numbers. On failure every file this
    /// call created is removed and the live file-set is untouched.
    pub fn run<F>(&self, task: &CompactionTask, dir: &Path, alloc_id: F) -> Result<Vec<Arc<SSTableReader>>>
    where
        F: FnMut() -> u64,
    {
        let mut created = Vec::new();
        match self.write_outputs(task, dir, alloc_id, &mut created) {
            Ok(outputs) => Ok(outputs),
            Err(e) => {
                for id in created {
                    remove_table_files(dir, id);
                }
                Err(e)
            }
        }
    }

    fn write_outputs<F>(
        &self,
        task: &CompactionTask,
        dir: &Path,
        mut alloc_id: F,
        created: &mut Vec<u64>,
    ) -> Result<Vec<Arc<SSTableReader>>>
    where
        F: FnMut() -> u64,
    {
        let sources: Vec<RecordSource> = task
            .all_inputs()
            .map(|table| Box::new(table.iter()) as RecordSource)
            .collect();
        let merged = NewestPerKey::new(MergeIterator::new(sources));

        let mut metas = Vec::new();
        let mut builder: Option<SSTableBuilder> = None;

        for record in merged {
            let record = record?;
            if task.drop_tombstones && record.entry.is_tombstone() {
                continue;
            }

            let mut current = match builder.take() {
                Some(b) => b,
                None => {
                    let id = alloc_id();
                    created.push(id);
                    SSTableBuilder::new(dir, id, self.config.index_interval)?
                }
            };
            current.add(&record)?;

            if current.estimated_size() >= self.config.target_file_size {
                metas.push(current.finish()?);
            } else {
                builder = Some(current);
            }
        }
        if let Some(last) = builder.take() {
            metas.push(last.finish()?);
        }

        metas
            .iter()
            .map(|meta| SSTableReader::open(dir, meta.id).map(Arc::new))
            .collect()
    }

    /// Complete a task's input set with the overlapping output-level files
    fn expand(&self, version: &Version, level: usize, inputs: Vec<Arc<SSTableReader>>) -> CompactionTask {
        let output_level = level + 1;
        let (min, max) = key_span(&inputs);
        let next_inputs = version.overlapping(output_level, &min, &max);

        let (min, max) = key_span(inputs.iter().chain(next_inputs.iter()));
        let drop_tombstones = !version.deeper_levels_overlap(output_level, &min, &max);

        CompactionTask {
            level,
            output_level,
            inputs,
            next_inputs,
            drop_tombstones,
        }
    }

    /// Level with the highest size / budget ratio above 1, excluding the last
    fn most_oversized_level(&self, version: &Version) -> Option<usize> {
        let last = version.num_levels().saturating_sub(1);
        (1..last)
            .filter_map(|level| {
                let bytes = version.level_bytes(level);
                let budget = self.config.max_bytes_for_level(level);
                (bytes > budget).then(|| (level, bytes as f64 / budget as f64))
            })
            .max_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(level, _)| level)
    }
}

/// Smallest min key and largest max key across `tables`
fn key_span<'a, I>(tables: I) -> (Vec<u8>, Vec<u8>)
where
    I: IntoIterator<Item = &'a Arc<SSTableReader>>,
{
    let mut min: Option<&[u8]> = None;
    let mut max: Option<&[u8]> = None;
    for table in tables {
        let (lo, hi) = table.key_range();
        if min.map_or(true, |m| lo < m) {
            min = Some(lo);
        }
        if max.map_or(true, |m| hi > m) {
            max = Some(hi);
        }
    }
    (
        min.unwrap_or_default().to_vec(),
        max.unwrap_or_default().to_vec(),
    )
}
