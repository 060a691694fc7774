//! SSTable Builder
//!
//! Writes sorted records to a new data file and its sparse index.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};

use crate::codec::Record;
use crate::error::{LodeError, Result};

use super::{data_path, index_path, SSTableMeta, DATA_HEADER_SIZE, DATA_MAGIC, INDEX_MAGIC, VERSION};

/// Builder for creating new SSTables from sorted records
pub struct SSTableBuilder {
    /// Directory holding the table pair
    dir: PathBuf,
    /// Table id (file number)
    id: u64,
    /// Buffered writer for the data file
    writer: BufWriter<File>,
    /// One index entry every `index_interval` records
    index_interval: usize,
    /// Number of records written
    entry_count: u64,
    /// Current write position in the data file
    current_offset: u64,
    /// Sparse index: key → data file offset of its record
    index: Vec<(Vec<u8>, u64)>,
    /// Track min/max keys for metadata
    min_key: Option<Vec<u8>>,
    last_key: Option<Vec<u8>>,
    max_sequence: u64,
    /// Reused encode buffer
    scratch: BytesMut,
}

impl SSTableBuilder {
    /// Create a new SSTable builder for table `id` in `dir`
    ///
    /// Writes the data header immediately; call `add()` in strictly
    /// increasing key order, then `finish()` to write the index.
    pub fn new(dir: &Path, id: u64, index_interval: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(data_path(dir, id))?;

        let mut writer = BufWriter::new(file);
        writer.write_all(DATA_MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;

        Ok(Self {
            dir: dir.to_path_buf(),
            id,
            writer,
            index_interval: index_interval.max(1),
            entry_count: 0,
            current_offset: DATA_HEADER_SIZE,
            index: Vec::new(),
            min_key: None,
            last_key: None,
            max_sequence: 0,
            scratch: BytesMut::new(),
        })
    }

    /// Add a record (keys must be strictly increasing)
    pub fn add(&mut self, record: &Record) -> Result<()> {
        if let Some(last) = &self.last_key {
            if record.key.as_slice() <= last.as_slice() {
                return Err(LodeError::Storage(format!(
                    "table {}: keys out of order ({:?} after {:?})",
                    self.id,
                    String::from_utf8_lossy(&record.key),
                    String::from_utf8_lossy(last)
                )));
            }
        }

        if self.entry_count % self.index_interval as u64 == 0 {
            self.index.push((record.key.clone(), self.current_offset));
        }
        if self.min_key.is_none() {
            self.min_key = Some(record.key.clone());
        }
        self.last_key = Some(record.key.clone());
        self.max_sequence = self.max_sequence.max(record.sequence);

        self.scratch.clear();
        record.encode_to(&mut self.scratch);
        self.writer.write_all(&self.scratch)?;

        self.current_offset += self.scratch.len() as u64;
        self.entry_count += 1;
        Ok(())
    }

    /// Bytes written to the data file so far
    pub fn estimated_size(&self) -> u64 {
        self.current_offset
    }

    /// Number of records added so far
    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Table id being built
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Finish building: sync the data file, write the index, return metadata
    pub fn finish(mut self) -> Result<SSTableMeta> {
        self.writer.flush()?;
        let data_file = self.writer.into_inner().map_err(|e| {
            LodeError::Storage(format!("Failed to flush SSTable: {}", e))
        })?;
        data_file.sync_all()?;
        let file_size = data_file.metadata()?.len();

        let min_key = self.min_key.unwrap_or_default();
        let max_key = self.last_key.unwrap_or_default();

        let mut buf = BytesMut::new();
        buf.put_slice(INDEX_MAGIC);
        buf.put_u16_le(VERSION);
        buf.put_u64_le(self.entry_count);
        buf.put_u64_le(self.max_sequence);
        buf.put_u64_le(self.current_offset);
        buf.put_u32_le(self.index.len() as u32);
        for (key, offset) in &self.index {
            buf.put_u32_le(key.len() as u32);
            buf.put_u64_le(*offset);
            buf.put_slice(key);
        }
        buf.put_u32_le(min_key.len() as u32);
        buf.put_slice(&min_key);
        buf.put_u32_le(max_key.len() as u32);
        buf.put_slice(&max_key);
        let crc = crc32fast::hash(&buf);
        buf.put_u32_le(crc);

        let mut index_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(index_path(&self.dir, self.id))?;
        index_file.write_all(&buf)?;
        index_file.sync_all()?;
        crate::storage::sync_dir(&self.dir)?;

        Ok(SSTableMeta {
            id: self.id,
            entry_count: self.entry_count,
            min_key,
            max_key,
            max_sequence: self.max_sequence,
            file_size,
        })
    }

    /// Drop a partially built table and remove its files
    pub fn abandon(self) {
        let (dir, id) = (self.dir.clone(), self.id);
        drop(self);
        remove_table_files(&dir, id);
    }
}

/// Best-effort removal of both files of table `id`
pub(crate) fn remove_table_files(dir: &Path, id: u64) {
    for path in [data_path(dir, id), index_path(dir, id)] {
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove table file"),
        }
    }
}
