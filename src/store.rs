//! Store Module
//!
//! The facade that coordinates the WAL, the memtables and the table files.
//!
//! ## Responsibilities
//! - Lifecycle: `Closed → Opening → Open → Closing → Closed`
//! - Write path: WAL append (durable) then memtable insert
//! - Read path: active memtable, flushing memtable, then tables newest → oldest
//! - Freeze full memtables and flush them on a background thread
//! - Run leveled compaction on a background thread
//! - Crash recovery on startup

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::Serialize;

use crate::codec::{Record, ValueEntry, MAX_KEY_SIZE, MAX_VALUE_SIZE};
use crate::config::Config;
use crate::error::{LodeError, Result};
use crate::memtable::MemTable;
use crate::storage::{LevelStats, MergeIterator, NewestPerKey, RecordSource, StorageManager};
use crate::wal::{self, WalRecovery, WalWriter};

/// Lifecycle state of a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreState {
    Closed,
    Opening,
    Open,
    Closing,
}

/// Point-in-time statistics
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub state: StoreState,
    pub memtable_bytes: usize,
    pub memtable_entries: usize,
    pub flush_pending: bool,
    pub sstable_count: usize,
    pub levels: Vec<LevelStats>,
    pub last_sequence: u64,
    pub wal_segment: u64,
}

/// The embedded key-value store
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (put/delete): serialized by the `writer` mutex, which owns
///   the WAL and the sequence counter. A write is acknowledged only after its
///   WAL record is durable.
/// - **Reads** (get/iterate): never take the writer lock. They clone the
///   current memtable view and the current table `Version` (two `Arc`s) and
///   work from those snapshots.
/// - **Flush**: a full memtable is frozen (swapped out under the writer lock
///   together with a WAL rotation) and written to L0 by the flush thread.
/// - **Compaction**: a separate thread, woken after each flush and on a timer.
pub struct Store {
    inner: Arc<StoreInner>,
    workers: Mutex<Workers>,
}

struct StoreInner {
    config: Config,
    state: RwLock<StoreState>,
    /// WAL + sequence counter; held for the whole write path
    writer: Mutex<WriteState>,
    /// Active and flushing memtables, swapped as a unit
    view: RwLock<Arc<MemView>>,
    storage: StorageManager,
    flush_tx: Sender<FlushTask>,
    compaction_tx: Sender<()>,
    /// Background flush outcomes; `flush_cv` is signalled on each one
    flush_status: Mutex<FlushStatus>,
    flush_cv: Condvar,
    _dir_lock: DirLock,
}

struct WriteState {
    wal: WalWriter,
    next_sequence: u64,
}

/// The memtables visible to readers
struct MemView {
    active: Arc<MemTable>,
    flushing: Option<FlushTask>,
}

/// A frozen memtable waiting to become an L0 table
#[derive(Clone)]
struct FlushTask {
    memtable: Arc<MemTable>,
    /// First WAL segment not covered by `memtable`
    log_number: u64,
    last_sequence: u64,
}

#[derive(Default)]
struct FlushStatus {
    /// Failed background flush attempts so far
    failures: u64,
    last_error: Option<String>,
}

#[derive(Default)]
struct Workers {
    /// Dropping the sender tells every worker to stop
    shutdown_tx: Option<Sender<()>>,
    handles: Vec<JoinHandle<()>>,
}

impl Store {
    /// Open or create a store in `config.data_dir`
    ///
    /// On startup:
    /// 1. Validate config, create the directory, claim it for this process
    /// 2. Load the manifest and the table files it lists
    /// 3. Replay live WAL segments into a fresh memtable
    /// 4. Start a new WAL segment and the background workers
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;
        let dir = fs::canonicalize(&config.data_dir)?;
        let dir_lock = DirLock::acquire(&dir)?;

        tracing::info!(state = ?StoreState::Opening, dir = %dir.display(), "opening store");

        let mut config = config;
        config.data_dir = dir.clone();

        let storage = StorageManager::open(&config)?;
        let manifest = storage.manifest_data();

        let memtable = MemTable::new();
        let recovery = WalRecovery::recover_into(&dir, manifest.log_number, |record| {
            memtable.apply(record);
        })?;
        if recovery.records_recovered > 0 || recovery.was_truncated {
            tracing::info!(
                records = recovery.records_recovered,
                segments = recovery.segments_replayed,
                discarded_bytes = recovery.bytes_discarded,
                last_sequence = recovery.last_sequence,
                "WAL recovery complete"
            );
        }
        wal::remove_segments_before(&dir, manifest.log_number)?;

        let next_sequence = manifest.last_sequence.max(recovery.last_sequence) + 1;
        let segment = wal::list_segments(&dir)?
            .last()
            .map_or(1, |id| id + 1)
            .max(manifest.log_number)
            .max(1);
        let wal = WalWriter::open(&dir, segment, config.wal_sync_strategy)?;

        let (flush_tx, flush_rx) = channel::unbounded();
        let (compaction_tx, compaction_rx) = channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let inner = Arc::new(StoreInner {
            config,
            state: RwLock::new(StoreState::Open),
            writer: Mutex::new(WriteState { wal, next_sequence }),
            view: RwLock::new(Arc::new(MemView {
                active: Arc::new(memtable),
                flushing: None,
            })),
            storage,
            flush_tx,
            compaction_tx,
            flush_status: Mutex::new(FlushStatus::default()),
            flush_cv: Condvar::new(),
            _dir_lock: dir_lock,
        });

        let mut workers = Workers {
            shutdown_tx: Some(shutdown_tx),
            handles: Vec::new(),
        };

        let flusher = Arc::clone(&inner);
        let shutdown = shutdown_rx.clone();
        workers.handles.push(
            thread::Builder::new()
                .name("lodekv-flush".into())
                .spawn(move || flusher.flush_loop(flush_rx, shutdown))?,
        );

        if inner.config.background_compaction {
            let compactor = Arc::clone(&inner);
            workers.handles.push(
                thread::Builder::new()
                    .name("lodekv-compact".into())
                    .spawn(move || compactor.compaction_loop(compaction_rx, shutdown_rx))?,
            );
            let _ = inner.compaction_tx.try_send(());
        }

        tracing::info!(
            state = ?StoreState::Open,
            next_sequence,
            wal_segment = segment,
            tables = inner.storage.sstable_count(),
            "store open"
        );

        Ok(Self {
            inner,
            workers: Mutex::new(workers),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Get a value by key
    ///
    /// Search order:
    /// 1. Active MemTable (most recent writes)
    /// 2. MemTable being flushed, if any
    /// 3. Tables (newest to oldest)
    ///
    /// `Ok(None)` means not found (never written, or deleted).
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.inner.ensure_open()?;

        let view = self.inner.view();
        if let Some(entry) = view.active.get(key) {
            return Ok(entry.into_value());
        }
        if let Some(flushing) = &view.flushing {
            if let Some(entry) = flushing.memtable.get(key) {
                return Ok(entry.into_value());
            }
        }

        Ok(self
            .inner
            .storage
            .get(key)?
            .and_then(|record| record.entry.into_value()))
    }

    /// Put a key-value pair
    ///
    /// Steps:
    /// 1. Acquire write lock
    /// 2. Write to WAL (durability)
    /// 3. Write to MemTable
    /// 4. Freeze the MemTable for flushing if it is full
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.inner.write(key, ValueEntry::Value(value.to_vec()))
    }

    /// Delete a key (writes a tombstone)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        self.inner.write(key, ValueEntry::Tombstone)
    }

    /// Iterate live key-value pairs in key order over `[from, to)`
    ///
    /// The iterator reads from a snapshot taken now; later writes are not
    /// seen. Dropping it early has no side effects.
    pub fn iterate(&self, from: Option<&[u8]>, to: Option<&[u8]>) -> Result<StoreIterator> {
        self.inner.ensure_open()?;

        let view = self.inner.view();
        let version = self.inner.storage.current();

        let mut sources: Vec<RecordSource> = Vec::new();
        sources.push(Box::new(
            view.active.range(from, to).into_iter().map(Ok::<Record, LodeError>),
        ));
        if let Some(flushing) = &view.flushing {
            sources.push(Box::new(
                flushing
                    .memtable
                    .range(from, to)
                    .into_iter()
                    .map(Ok::<Record, LodeError>),
            ));
        }

        for table in version.all_files() {
            let (min, max) = table.key_range();
            let below = from.map_or(false, |f| max < f);
            let above = to.map_or(false, |t| min >= t);
            if below || above {
                continue;
            }
            let iter = match from {
                Some(f) => table.iter_from(f),
                None => table.iter(),
            };
            sources.push(Box::new(iter));
        }

        Ok(StoreIterator {
            inner: NewestPerKey::new(MergeIterator::new(sources)),
            upper: to.map(<[u8]>::to_vec),
            done: false,
        })
    }

    /// Flush the active memtable to a table now and wait for it
    ///
    /// Fails if a background flush already in progress fails while waiting.
    pub fn flush(&self) -> Result<()> {
        self.inner.ensure_open()?;
        let mut writer = self.inner.writer.lock();
        self.inner.wait_for_pending_flush()?;

        if self.inner.view().active.is_empty() {
            return Ok(());
        }
        let task = self.inner.freeze(&mut writer)?;
        if let Err(e) = self.inner.complete_flush(&task) {
            // The frozen memtable stays readable; the flush thread retries it
            if self.inner.flush_tx.send(task).is_err() {
                tracing::error!("flush worker has stopped; memtable kept for close()");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Run leveled compactions until no level needs one
    ///
    /// Returns the number of compactions run.
    pub fn compact(&self) -> Result<usize> {
        self.inner.ensure_open()?;
        let mut runs = 0;
        while self.inner.storage.compact_once()? {
            runs += 1;
        }
        Ok(runs)
    }

    /// Merge every table into the last level, dropping all tombstones
    pub fn compact_all(&self) -> Result<()> {
        self.inner.ensure_open()?;
        self.inner.storage.compact_all().map(|_| ())
    }

    /// Close the store gracefully
    ///
    /// Stops the workers, flushes every memtable, and releases the directory.
    pub fn close(self) -> Result<()> {
        {
            let mut state = self.inner.state.write();
            if *state != StoreState::Open {
                return Ok(());
            }
            *state = StoreState::Closing;
        }
        tracing::info!(state = ?StoreState::Closing, "closing store");

        self.stop_workers();
        let result = self.inner.final_flush();

        *self.inner.state.write() = StoreState::Closed;
        match &result {
            Ok(()) => tracing::info!(state = ?StoreState::Closed, "store closed"),
            Err(e) => tracing::error!(error = %e, "store closed with unflushed data (kept in WAL)"),
        }
        result
    }

    fn stop_workers(&self) {
        let mut workers = self.workers.lock();
        drop(workers.shutdown_tx.take());
        for handle in workers.handles.drain(..) {
            if handle.join().is_err() {
                tracing::error!("background worker panicked");
            }
        }
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn state(&self) -> StoreState {
        *self.inner.state.read()
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the active memtable size
    pub fn memtable_size(&self) -> usize {
        self.inner.view().active.size()
    }

    /// Get the number of live tables
    pub fn sstable_count(&self) -> usize {
        self.inner.storage.sstable_count()
    }

    /// Get point-in-time statistics
    pub fn stats(&self) -> StoreStats {
        let (last_sequence, wal_segment) = {
            let writer = self.inner.writer.lock();
            (writer.next_sequence - 1, writer.wal.segment_id())
        };
        let view = self.inner.view();
        StoreStats {
            state: self.state(),
            memtable_bytes: view.active.size(),
            memtable_entries: view.active.entry_count(),
            flush_pending: view.flushing.is_some(),
            sstable_count: self.inner.storage.sstable_count(),
            levels: self.inner.storage.level_stats(),
            last_sequence,
            wal_segment,
        }
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Without close(), unflushed writes stay in the WAL for the next open
        self.stop_workers();
    }
}

impl StoreInner {
    fn ensure_open(&self) -> Result<()> {
        match *self.state.read() {
            StoreState::Open => Ok(()),
            _ => Err(LodeError::Closed),
        }
    }

    fn view(&self) -> Arc<MemView> {
        Arc::clone(&self.view.read())
    }

    fn write(&self, key: &[u8], entry: ValueEntry) -> Result<()> {
        self.ensure_open()?;
        if key.len() > MAX_KEY_SIZE {
            return Err(LodeError::Storage(format!(
                "key of {} bytes exceeds limit of {}",
                key.len(),
                MAX_KEY_SIZE
            )));
        }
        if entry.encoded_len() > MAX_VALUE_SIZE {
            return Err(LodeError::Storage(format!(
                "value of {} bytes exceeds limit of {}",
                entry.encoded_len(),
                MAX_VALUE_SIZE
            )));
        }

        let mut writer = self.writer.lock();
        let record = Record {
            key: key.to_vec(),
            entry,
            sequence: writer.next_sequence,
        };
        writer.wal.append(&record)?;
        writer.next_sequence += 1;

        let view = self.view();
        let size = view.active.apply(record);

        if size >= self.config.memtable_size_limit && view.flushing.is_none() {
            let scheduled = self.freeze(&mut writer).and_then(|task| {
                self.flush_tx
                    .send(task)
                    .map_err(|_| LodeError::Storage("flush worker has stopped".into()))
            });
            // The write itself is durable; a failed freeze is retried next write
            if let Err(e) = scheduled {
                tracing::error!(error = %e, "failed to schedule memtable flush");
            }
        }

        Ok(())
    }

    /// Swap in an empty memtable and rotate the WAL (writer lock held)
    fn freeze(&self, writer: &mut WriteState) -> Result<FlushTask> {
        let closed = writer.wal.rotate()?;

        let mut view = self.view.write();
        let task = FlushTask {
            memtable: Arc::clone(&view.active),
            log_number: closed + 1,
            last_sequence: writer.next_sequence - 1,
        };
        *view = Arc::new(MemView {
            active: Arc::new(MemTable::new()),
            flushing: Some(task.clone()),
        });

        tracing::debug!(
            entries = task.memtable.entry_count(),
            bytes = task.memtable.size(),
            log_number = task.log_number,
            "froze memtable for flush"
        );
        Ok(task)
    }

    /// Write a frozen memtable to L0 and retire it from the view
    fn complete_flush(&self, task: &FlushTask) -> Result<()> {
        if self.storage.log_number() >= task.log_number {
            // An earlier attempt installed the table but could not sync the manifest
            self.storage
                .record_log_state(task.last_sequence, task.log_number)?;
        } else {
            self.storage
                .flush_memtable(&task.memtable, task.last_sequence, task.log_number)?;
        }

        {
            let mut view = self.view.write();
            let is_current = view
                .flushing
                .as_ref()
                .map_or(false, |f| Arc::ptr_eq(&f.memtable, &task.memtable));
            if is_current {
                let active = Arc::clone(&view.active);
                *view = Arc::new(MemView {
                    active,
                    flushing: None,
                });
            }
        }
        {
            let _status = self.flush_status.lock();
            self.flush_cv.notify_all();
        }

        if let Err(e) = wal::remove_segments_before(&self.config.data_dir, task.log_number) {
            tracing::warn!(error = %e, "failed to remove obsolete WAL segments");
        }
        let _ = self.compaction_tx.try_send(());
        Ok(())
    }

    /// Block until no frozen memtable is waiting; an attempt that fails
    /// meanwhile ends the wait with its error
    fn wait_for_pending_flush(&self) -> Result<()> {
        let mut status = self.flush_status.lock();
        let failures = status.failures;
        while self.view().flushing.is_some() {
            self.ensure_open()?;
            if status.failures != failures {
                return Err(LodeError::Storage(format!(
                    "pending memtable flush failed: {}",
                    status.last_error.as_deref().unwrap_or("unknown error")
                )));
            }
            self.flush_cv.wait_for(&mut status, Duration::from_millis(100));
        }
        Ok(())
    }

    /// Flush everything left in memory (workers already stopped)
    fn final_flush(&self) -> Result<()> {
        let mut writer = self.writer.lock();

        if let Some(task) = self.view().flushing.clone() {
            self.complete_flush(&task)?;
        }
        if !self.view().active.is_empty() {
            let task = self.freeze(&mut writer)?;
            self.complete_flush(&task)?;
        }

        writer.wal.sync()
    }

    // =========================================================================
    // Background Workers
    // =========================================================================

    fn flush_loop(&self, tasks: Receiver<FlushTask>, shutdown: Receiver<()>) {
        loop {
            channel::select! {
                recv(tasks) -> task => match task {
                    Ok(task) => self.flush_with_retry(&task, &shutdown),
                    Err(_) => return,
                },
                recv(shutdown) -> _ => {
                    while let Ok(task) = tasks.try_recv() {
                        self.flush_with_retry(&task, &shutdown);
                    }
                    return;
                }
            }
        }
    }

    fn flush_with_retry(&self, task: &FlushTask, shutdown: &Receiver<()>) {
        let mut backoff = Duration::from_millis(100);
        loop {
            match self.complete_flush(task) {
                Ok(()) => return,
                Err(e) => {
                    tracing::error!(error = %e, retry_in_ms = backoff.as_millis() as u64, "memtable flush failed");
                    {
                        let mut status = self.flush_status.lock();
                        status.failures += 1;
                        status.last_error = Some(e.to_string());
                        self.flush_cv.notify_all();
                    }
                    // Once shutdown starts, close() makes the last attempt
                    match shutdown.recv_timeout(backoff) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => return,
                    }
                    backoff = (backoff * 2).min(Duration::from_secs(5));
                }
            }
        }
    }

    fn compaction_loop(&self, wake: Receiver<()>, shutdown: Receiver<()>) {
        let ticker = channel::tick(Duration::from_millis(self.config.compaction_interval_ms));
        loop {
            channel::select! {
                recv(wake) -> msg => if msg.is_err() { return },
                recv(ticker) -> _ => {},
                recv(shutdown) -> _ => return,
            }

            loop {
                if !matches!(shutdown.try_recv(), Err(TryRecvError::Empty)) {
                    return;
                }
                match self.storage.compact_once() {
                    Ok(true) => continue,
                    Ok(false) => break,
                    Err(e) => {
                        tracing::error!(error = %e, "background compaction failed");
                        break;
                    }
                }
            }
        }
    }
}

// =============================================================================
// Iteration
// =============================================================================

/// Ordered iterator over live `(key, value)` pairs
pub struct StoreIterator {
    inner: NewestPerKey<MergeIterator>,
    /// Exclusive upper bound
    upper: Option<Vec<u8>>,
    done: bool,
}

impl Iterator for StoreIterator {
    type Item = Result<(Vec<u8>, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        loop {
            let record = match self.inner.next() {
                Some(Ok(record)) => record,
                Some(Err(e)) => {
                    self.done = true;
                    return Some(Err(e));
                }
                None => {
                    self.done = true;
                    return None;
                }
            };

            if let Some(upper) = &self.upper {
                if record.key >= *upper {
                    self.done = true;
                    return None;
                }
            }

            match record.entry {
                ValueEntry::Value(value) => return Some(Ok((record.key, value))),
                ValueEntry::Tombstone => continue,
            }
        }
    }
}

// =============================================================================
// Directory Claim
// =============================================================================

/// Directories held open by stores in this process
static OPEN_DIRS: Mutex<Vec<PathBuf>> = parking_lot::const_mutex(Vec::new());

/// Claim on a data directory, released on drop
struct DirLock {
    path: PathBuf,
}

impl DirLock {
    fn acquire(path: &Path) -> Result<Self> {
        let mut open = OPEN_DIRS.lock();
        if open.iter().any(|p| p == path) {
            return Err(LodeError::Config(format!(
                "{} is already open by another store",
                path.display()
            )));
        }
        open.push(path.to_path_buf());
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        OPEN_DIRS.lock().retain(|p| p != &self.path);
    }
}
