//! WAL Writer
//!
//! Handles appending records to the active WAL segment.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::BytesMut;

use crate::codec::Record;
use crate::config::WalSyncStrategy;
use crate::error::Result;

use super::segment_path;

/// Writes records to the active WAL segment
pub struct WalWriter {
    /// Directory holding the segments
    dir: PathBuf,
    /// Id of the segment being appended to
    segment_id: u64,
    /// Buffered handle, flushed on every append
    writer: BufWriter<File>,
    sync_strategy: WalSyncStrategy,
    /// Appends since the last fsync
    unsynced: usize,
    /// File length after the last complete record
    committed_len: u64,
    /// An append failed and its bytes have not been discarded yet
    torn: bool,
    /// Reused encode buffer
    scratch: BytesMut,
    #[cfg(test)]
    fail_next_append: bool,
}

impl WalWriter {
    /// Open (or create) segment `segment_id` in `dir` for appending
    pub fn open(dir: &Path, segment_id: u64, sync_strategy: WalSyncStrategy) -> Result<Self> {
        let path = segment_path(dir, segment_id);
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let committed_len = file.metadata()?.len();
        crate::storage::sync_dir(dir)?;

        tracing::debug!(segment = segment_id, path = %path.display(), len = committed_len, "opened WAL segment");

        Ok(Self {
            dir: dir.to_path_buf(),
            segment_id,
            writer: BufWriter::new(file),
            sync_strategy,
            unsynced: 0,
            committed_len,
            torn: false,
            scratch: BytesMut::new(),
            #[cfg(test)]
            fail_next_append: false,
        })
    }

    /// Append a record
    ///
    /// Under `WalSyncStrategy::EveryWrite` the record is on stable storage when
    /// this returns. On error nothing of the record is left in the segment or
    /// the buffer, so a retry with the same sequence does not duplicate it.
    pub fn append(&mut self, record: &Record) -> Result<()> {
        if self.torn {
            self.discard_torn()?;
        }

        self.scratch.clear();
        record.encode_to(&mut self.scratch);

        let must_sync = match self.sync_strategy {
            WalSyncStrategy::EveryWrite => true,
            WalSyncStrategy::EveryNEntries { count } => self.unsynced + 1 >= count,
        };

        if let Err(e) = self.write_scratch(must_sync) {
            tracing::warn!(segment = self.segment_id, error = %e, "WAL append failed, discarding partial record");
            self.torn = true;
            if let Err(discard) = self.discard_torn() {
                tracing::error!(segment = self.segment_id, error = %discard, "failed to discard partial WAL record");
            }
            return Err(e);
        }

        self.committed_len += self.scratch.len() as u64;
        self.unsynced = if must_sync { 0 } else { self.unsynced + 1 };
        Ok(())
    }

    /// Force sync to disk
    pub fn sync(&mut self) -> Result<()> {
        if self.torn {
            self.discard_torn()?;
        }
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    fn write_scratch(&mut self, sync: bool) -> Result<()> {
        #[cfg(test)]
        self.tear_if_requested()?;

        self.writer.write_all(&self.scratch)?;
        self.writer.flush()?;
        if sync {
            self.writer.get_ref().sync_data()?;
        }
        Ok(())
    }

    /// Half the record reaches the file, the rest stays buffered, then fail
    #[cfg(test)]
    fn tear_if_requested(&mut self) -> Result<()> {
        if !std::mem::take(&mut self.fail_next_append) {
            return Ok(());
        }
        let half = self.scratch.len() / 2;
        self.writer.write_all(&self.scratch[..half])?;
        self.writer.flush()?;
        self.writer.write_all(&self.scratch[half..])?;
        Err(std::io::Error::new(std::io::ErrorKind::Other, "injected write failure").into())
    }

    /// Drop buffered bytes and cut the file back to the last complete record
    fn discard_torn(&mut self) -> Result<()> {
        let file = self.writer.get_ref().try_clone()?;
        // into_parts hands back the buffer without flushing it
        let (_, _unwritten) = std::mem::replace(&mut self.writer, BufWriter::new(file)).into_parts();

        let file = self.writer.get_ref();
        file.set_len(self.committed_len)?;
        file.sync_data()?;
        self.torn = false;
        Ok(())
    }

    /// Close the current segment and continue in a fresh one
    ///
    /// Returns the id of the segment that was closed.
    pub fn rotate(&mut self) -> Result<u64> {
        self.sync()?;
        let closed = self.segment_id;
        let next = Self::open(&self.dir, closed + 1, self.sync_strategy)?;
        *self = next;
        tracing::debug!(closed, active = self.segment_id, "rotated WAL");
        Ok(closed)
    }

    /// Id of the segment currently appended to
    pub fn segment_id(&self) -> u64 {
        self.segment_id
    }

    /// Path of the segment currently appended to
    pub fn path(&self) -> PathBuf {
        segment_path(&self.dir, self.segment_id)
    }
}
