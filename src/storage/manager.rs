//! Storage Manager
//!
//! Manages the table file-set and coordinates flushes and compactions.
//!
//! ## Responsibilities
//! - Load the manifest and open its tables on startup
//! - Search tables newest → oldest for reads
//! - Create new L0 tables from memtable flushes
//! - Install compaction results and retire their inputs
//! - Track file ids and the WAL/sequence state recorded in the manifest

use std::collections::HashSet;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use crate::codec::Record;
use crate::config::Config;
use crate::error::{LodeError, Result};
use crate::memtable::MemTable;

use super::sstable::{data_path, index_path, parse_table_id, remove_table_files};
use super::{CompactionTask, Compactor, Manifest, ManifestData, SSTableBuilder, SSTableMeta, SSTableReader, Version};

/// Per-level file count and size
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LevelStats {
    pub level: usize,
    pub files: usize,
    pub bytes: u64,
}

/// Manages the storage layer
///
/// ## Concurrency:
/// - `current`: the live `Version`, swapped whole under a short write lock
/// - `manifest`: serializes every file-set change (flush or compaction)
/// - `compactor`: held for the duration of a compaction, so one runs at a time
/// - `next_file_id`: atomic counter (lock-free)
pub struct StorageManager {
    /// Directory where tables and the manifest live
    data_dir: PathBuf,

    config: Config,

    /// Live file-set; readers clone the `Arc` and never block writers
    current: RwLock<Arc<Version>>,

    manifest: Mutex<Manifest>,

    /// Next ID for creating new tables (atomic, lock-free)
    next_file_id: AtomicU64,

    compactor: Mutex<Compactor>,
}

impl StorageManager {
    /// Open storage in `config.data_dir`
    ///
    /// On startup:
    /// 1. Load the manifest (create one for an empty directory)
    /// 2. Open a reader for every listed table, setting aside unreadable ones
    /// 3. Remove table files the manifest does not list
    pub fn open(config: &Config) -> Result<Self> {
        let dir = config.data_dir.clone();
        fs::create_dir_all(&dir)?;
        Manifest::remove_stale_temp(&dir)?;

        let manifest = match Manifest::load(&dir)? {
            Some(manifest) => manifest,
            None => {
                if Self::table_ids_on_disk(&dir)?.next().is_some() {
                    return Err(LodeError::Corruption(format!(
                        "{}: table files present but MANIFEST is missing",
                        dir.display()
                    )));
                }
                tracing::info!(dir = %dir.display(), "creating new manifest");
                Manifest::create(&dir, config.num_levels)?
            }
        };

        let data = manifest.data().clone();
        let num_levels = config.num_levels.max(data.levels.len());
        let mut version = Version::new(num_levels);

        for (level, metas) in data.levels.iter().enumerate() {
            let mut readers = Vec::with_capacity(metas.len());
            for meta in metas {
                match SSTableReader::open(&dir, meta.id) {
                    Ok(reader) => readers.push(Arc::new(reader)),
                    Err(e) if Self::is_unreadable(&e) => {
                        tracing::error!(table = meta.id, level, error = %e, "table unreadable, setting it aside");
                        Self::quarantine(&dir, meta.id);
                    }
                    Err(e) => return Err(e),
                }
            }
            version.add(level, readers);
        }

        let live: HashSet<u64> = data.table_ids().collect();
        let mut orphans: Vec<u64> = Self::table_ids_on_disk(&dir)?
            .filter(|id| !live.contains(id))
            .collect();
        orphans.sort_unstable();
        orphans.dedup();
        for id in orphans {
            tracing::warn!(table = id, "removing table not listed in manifest");
            remove_table_files(&dir, id);
        }

        let max_live = live.iter().copied().max().unwrap_or(0);
        let next_id = data.next_file_id.max(max_live + 1).max(1);

        tracing::info!(
            tables = version.file_count(),
            levels = num_levels,
            next_file_id = next_id,
            "storage opened"
        );

        Ok(Self {
            data_dir: dir,
            config: config.clone(),
            current: RwLock::new(Arc::new(version)),
            manifest: Mutex::new(manifest),
            next_file_id: AtomicU64::new(next_id),
            compactor: Mutex::new(Compactor::new(config.clone())),
        })
    }

    /// Snapshot of the live file-set
    pub fn current(&self) -> Arc<Version> {
        Arc::clone(&self.current.read())
    }

    /// Get the newest record for a key (searches all tables newest → oldest)
    ///
    /// The record may be a tombstone; `None` means no table holds the key.
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        self.current().get(key)
    }

    /// Copy of the persisted metadata
    pub fn manifest_data(&self) -> ManifestData {
        self.manifest.lock().data().clone()
    }

    /// Oldest WAL segment the manifest still needs
    pub fn log_number(&self) -> u64 {
        self.manifest.lock().data().log_number
    }

    /// Fail the next `count` manifest directory syncs
    #[cfg(test)]
    pub(crate) fn fail_manifest_syncs(&self, count: usize) {
        self.manifest.lock().fail_dir_syncs = count;
    }

    /// Hand out a fresh table id
    pub fn allocate_file_id(&self) -> u64 {
        self.next_file_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Flush a frozen MemTable to a new L0 table
    ///
    /// The manifest written with the new table also records `last_sequence`
    /// and `log_number` (the oldest WAL segment still needed). An empty
    /// memtable only records those two values.
    pub fn flush_memtable(
        &self,
        memtable: &MemTable,
        last_sequence: u64,
        log_number: u64,
    ) -> Result<Option<SSTableMeta>> {
        if memtable.is_empty() {
            self.record_log_state(last_sequence, log_number)?;
            return Ok(None);
        }

        let started = Instant::now();
        let id = self.allocate_file_id();
        let mut builder = SSTableBuilder::new(&self.data_dir, id, self.config.index_interval)?;

        let written = memtable.try_for_each(|key, sequence, entry| {
            builder.add(&Record {
                key: key.to_vec(),
                entry: entry.clone(),
                sequence,
            })
        });
        if let Err(e) = written {
            builder.abandon();
            return Err(e);
        }

        let reader = match builder.finish().and_then(|_| SSTableReader::open(&self.data_dir, id)) {
            Ok(reader) => Arc::new(reader),
            Err(e) => {
                remove_table_files(&self.data_dir, id);
                return Err(e);
            }
        };

        let installed = self.install(
            |version| version.with_added(0, vec![Arc::clone(&reader)]),
            Some((last_sequence, log_number)),
        );
        if let Err(e) = installed {
            // The on-disk manifest may already list it
            if !self.current().contains(id) {
                reader.mark_obsolete();
            }
            return Err(e);
        }

        tracing::info!(
            table = id,
            entries = reader.entry_count(),
            bytes = reader.file_size(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "flushed memtable to L0"
        );

        Ok(Some(reader.meta().clone()))
    }

    /// Persist the sequence/WAL state without changing the file-set
    pub fn record_log_state(&self, last_sequence: u64, log_number: u64) -> Result<()> {
        self.install(|version| version.clone(), Some((last_sequence, log_number)))
            .map(|_| ())
    }

    /// True if a level is over its trigger or budget
    pub fn needs_compaction(&self) -> bool {
        self.compactor.lock().needs_compaction(&self.current())
    }

    /// Run one leveled compaction if any level needs it
    ///
    /// Returns whether a compaction ran.
    pub fn compact_once(&self) -> Result<bool> {
        let mut compactor = self.compactor.lock();
        let version = self.current();
        let Some(task) = compactor.pick(&version) else {
            return Ok(false);
        };
        self.run_task(&compactor, task)?;
        Ok(true)
    }

    /// Merge every live table into the last level
    ///
    /// Returns whether there was anything to merge.
    pub fn compact_all(&self) -> Result<bool> {
        let compactor = self.compactor.lock();
        let version = self.current();
        let Some(task) = compactor.full_compaction(&version) else {
            return Ok(false);
        };
        self.run_task(&compactor, task)?;
        Ok(true)
    }

    fn run_task(&self, compactor: &Compactor, task: CompactionTask) -> Result<()> {
        let started = Instant::now();
        let input_bytes = task.input_bytes();

        let outputs = compactor.run(&task, &self.data_dir, || self.allocate_file_id())?;

        let input_ids = task.input_ids();
        let installed = self.install(
            |version| {
                version
                    .without(&input_ids)
                    .with_added(task.output_level, outputs.clone())
            },
            None,
        );
        if let Err(e) = installed {
            // Inputs left behind by a half-installed edit are swept on the next open
            let current = self.current();
            if input_ids.iter().all(|id| current.contains(*id)) {
                for table in &outputs {
                    table.mark_obsolete();
                }
            }
            return Err(e);
        }

        for table in task.inputs.iter().chain(task.next_inputs.iter()) {
            table.mark_obsolete();
        }

        tracing::info!(
            level = task.level,
            output_level = task.output_level,
            inputs = input_ids.len(),
            outputs = outputs.len(),
            input_bytes,
            output_bytes = outputs.iter().map(|t| t.file_size()).sum::<u64>(),
            dropped_tombstones = task.drop_tombstones,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "compaction finished"
        );
        Ok(())
    }

    /// Apply an edit to the live file-set: write the manifest, then swap
    ///
    /// If the manifest was renamed into place but its directory sync failed,
    /// the edit is still swapped in (disk may already reference it) and the
    /// error is returned.
    fn install<F>(&self, edit: F, log_state: Option<(u64, u64)>) -> Result<Arc<Version>>
    where
        F: FnOnce(&Version) -> Version,
    {
        let mut manifest = self.manifest.lock();
        let next = Arc::new(edit(&self.current()));

        let mut data = manifest.data().clone();
        data.levels = next.metas();
        data.next_file_id = self.next_file_id.load(Ordering::SeqCst);
        if let Some((last_sequence, log_number)) = log_state {
            data.last_sequence = data.last_sequence.max(last_sequence);
            data.log_number = data.log_number.max(log_number);
        }

        if let Err(e) = manifest.write(data.clone()) {
            if manifest.data() != &data {
                return Err(e);
            }
            tracing::error!(error = %e, "manifest replaced but not synced");
            *self.current.write() = next;
            return Err(e);
        }

        *self.current.write() = Arc::clone(&next);
        Ok(next)
    }

    /// Get per-level file counts and sizes
    pub fn level_stats(&self) -> Vec<LevelStats> {
        let version = self.current();
        (0..version.num_levels())
            .map(|level| LevelStats {
                level,
                files: version.level(level).len(),
                bytes: version.level_bytes(level),
            })
            .collect()
    }

    /// Get the number of live tables
    pub fn sstable_count(&self) -> usize {
        self.current().file_count()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// Get the next table ID (for testing/debugging)
    pub fn next_file_id(&self) -> u64 {
        self.next_file_id.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    /// Ids of every `.sst`/`.idx` file in `dir` (a pair yields its id twice)
    fn table_ids_on_disk(dir: &Path) -> Result<impl Iterator<Item = u64>> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() {
                if let Some(id) = parse_table_id(&path) {
                    ids.push(id);
                }
            }
        }
        Ok(ids.into_iter())
    }

    fn is_unreadable(e: &LodeError) -> bool {
        match e {
            LodeError::Corruption(_) => true,
            LodeError::Io(io) => io.kind() == ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Rename a bad table pair out of the way so it is neither read nor
    /// collected as an orphan
    fn quarantine(dir: &Path, id: u64) {
        for path in [data_path(dir, id), index_path(dir, id)] {
            let mut target = path.clone().into_os_string();
            target.push(".corrupt");
            if let Err(e) = fs::rename(&path, &target) {
                if e.kind() != ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %e, "failed to set table aside");
                }
            }
        }
    }
}
