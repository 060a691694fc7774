//! SSTable Reader
//!
//! Opens a table pair and serves point lookups through the sparse index.

use std::fs::{self, File};
use std::io::{ErrorKind, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Buf;
use parking_lot::Mutex;

use crate::codec::Record;
use crate::error::{LodeError, Result};

use super::builder::remove_table_files;
use super::iterator::SSTableIterator;
use super::{data_path, index_path, SSTableMeta, DATA_HEADER_SIZE, DATA_MAGIC, INDEX_MAGIC, VERSION};

/// Reader for a table pair with the sparse index held in memory
///
/// Shared as `Arc<SSTableReader>` by every `Version` that lists the table and
/// by every iterator reading it. Once marked obsolete, both files are removed
/// when the last reference drops.
pub struct SSTableReader {
    dir: PathBuf,
    meta: SSTableMeta,
    /// Data file handle; locked only for the seek + read of one block
    file: Mutex<File>,
    /// Sparse index: (first key of block, data offset), ascending
    index: Vec<(Vec<u8>, u64)>,
    /// End of the record section in the data file
    data_len: u64,
    obsolete: AtomicBool,
}

impl SSTableReader {
    /// Open table `id` in `dir`
    ///
    /// Fails with `Corruption` if the index file fails its checksum or does
    /// not describe the data file.
    pub fn open(dir: &Path, id: u64) -> Result<Self> {
        let raw = fs::read(index_path(dir, id))?;
        let parsed = parse_index(id, &raw)?;

        let mut file = File::open(data_path(dir, id))?;
        let file_size = file.metadata()?.len();
        if file_size < parsed.data_len {
            return Err(LodeError::Corruption(format!(
                "table {}: data file has {} bytes, index expects {}",
                id, file_size, parsed.data_len
            )));
        }

        let mut header = [0u8; DATA_HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| truncated(id, e))?;
        if &header[0..4] != DATA_MAGIC {
            return Err(LodeError::Corruption(format!(
                "table {}: invalid data magic {:?}",
                id,
                &header[0..4]
            )));
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            meta: SSTableMeta {
                id,
                entry_count: parsed.entry_count,
                min_key: parsed.min_key,
                max_key: parsed.max_key,
                max_sequence: parsed.max_sequence,
                file_size,
            },
            file: Mutex::new(file),
            index: parsed.index,
            data_len: parsed.data_len,
            obsolete: AtomicBool::new(false),
        })
    }

    /// Look up a key
    ///
    /// Returns:
    /// - `Ok(Some(record))`: key present (the record may be a tombstone)
    /// - `Ok(None)`: key not in this table
    pub fn get(&self, key: &[u8]) -> Result<Option<Record>> {
        if !self.might_contain(key) {
            return Ok(None);
        }

        // Last block whose first key is <= key
        let block = match self.index.partition_point(|(k, _)| k.as_slice() <= key) {
            0 => return Ok(None),
            n => n - 1,
        };

        for record in self.read_block(block)? {
            match record.key.as_slice().cmp(key) {
                std::cmp::Ordering::Less => continue,
                std::cmp::Ordering::Equal => return Ok(Some(record)),
                std::cmp::Ordering::Greater => break,
            }
        }
        Ok(None)
    }

    /// Read and decode every record of block `block`
    pub(super) fn read_block(&self, block: usize) -> Result<Vec<Record>> {
        let start = self.index[block].1;
        let end = self
            .index
            .get(block + 1)
            .map_or(self.data_len, |(_, offset)| *offset);

        let mut buf = vec![0u8; (end - start) as usize];
        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut buf).map_err(|e| truncated(self.meta.id, e))?;
        }

        let mut records = Vec::new();
        let mut pos = 0;
        while pos < buf.len() {
            let (record, used) = Record::decode(&buf[pos..]).map_err(|e| {
                LodeError::Corruption(format!(
                    "table {} block {} offset {}: {}",
                    self.meta.id,
                    block,
                    start + pos as u64,
                    e
                ))
            })?;
            records.push(record);
            pos += used;
        }
        Ok(records)
    }

    /// Index of the block that could hold `key` (first block if key is before all)
    pub(super) fn block_for(&self, key: &[u8]) -> usize {
        self.index
            .partition_point(|(k, _)| k.as_slice() <= key)
            .saturating_sub(1)
    }

    /// Number of blocks (sparse index entries)
    pub fn block_count(&self) -> usize {
        self.index.len()
    }

    /// Iterate over every record in key order
    pub fn iter(self: &Arc<Self>) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), None)
    }

    /// Iterate over records with key >= `from`
    pub fn iter_from(self: &Arc<Self>, from: &[u8]) -> SSTableIterator {
        SSTableIterator::new(Arc::clone(self), Some(from.to_vec()))
    }

    /// Get the table id
    pub fn id(&self) -> u64 {
        self.meta.id
    }

    /// Get the table metadata
    pub fn meta(&self) -> &SSTableMeta {
        &self.meta
    }

    /// Get entry count
    pub fn entry_count(&self) -> u64 {
        self.meta.entry_count
    }

    /// Data file size in bytes
    pub fn file_size(&self) -> u64 {
        self.meta.file_size
    }

    /// (min, max) key stored in this table
    pub fn key_range(&self) -> (&[u8], &[u8]) {
        (&self.meta.min_key, &self.meta.max_key)
    }

    /// Quick check if a key might be in this SSTable (range check)
    /// Returns false only if the key is definitely outside [min_key, max_key]
    pub fn might_contain(&self, key: &[u8]) -> bool {
        self.meta.might_contain(key)
    }

    /// Delete the files once the last reference to this reader is dropped
    pub fn mark_obsolete(&self) {
        self.obsolete.store(true, Ordering::Release);
    }

    pub fn is_obsolete(&self) -> bool {
        self.obsolete.load(Ordering::Acquire)
    }
}

impl Drop for SSTableReader {
    fn drop(&mut self) {
        if self.is_obsolete() {
            remove_table_files(&self.dir, self.meta.id);
            tracing::debug!(table = self.meta.id, "removed obsolete table files");
        }
    }
}

impl std::fmt::Debug for SSTableReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SSTableReader")
            .field("id", &self.meta.id)
            .field("entry_count", &self.meta.entry_count)
            .field("blocks", &self.index.len())
            .finish()
    }
}

// =============================================================================
// Index Parsing
// =============================================================================

struct ParsedIndex {
    entry_count: u64,
    max_sequence: u64,
    data_len: u64,
    index: Vec<(Vec<u8>, u64)>,
    min_key: Vec<u8>,
    max_key: Vec<u8>,
}

fn parse_index(id: u64, raw: &[u8]) -> Result<ParsedIndex> {
    let corrupt = |what: &str| LodeError::Corruption(format!("table {} index: {}", id, what));

    // Magic (4) + Version (2) + counts (8 + 8 + 8) + IndexCount (4) + ... + CRC (4)
    if raw.len() < 4 + 2 + 24 + 4 + 8 + 4 {
        return Err(corrupt("file too short"));
    }

    let (body, crc_bytes) = raw.split_at(raw.len() - 4);
    let stored_crc = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(body) != stored_crc {
        return Err(corrupt("checksum mismatch"));
    }

    let mut buf = body;
    if &buf[0..4] != INDEX_MAGIC {
        return Err(corrupt("invalid magic"));
    }
    buf.advance(4);
    let version = buf.get_u16_le();
    if version != VERSION {
        return Err(corrupt(&format!("unsupported version {}", version)));
    }

    let entry_count = buf.get_u64_le();
    let max_sequence = buf.get_u64_le();
    let data_len = buf.get_u64_le();
    let index_count = buf.get_u32_le() as usize;

    let mut index = Vec::with_capacity(index_count.min(1 << 20));
    for _ in 0..index_count {
        if buf.remaining() < 12 {
            return Err(corrupt("truncated index entry"));
        }
        let key_len = buf.get_u32_le() as usize;
        let offset = buf.get_u64_le();
        if buf.remaining() < key_len {
            return Err(corrupt("truncated index key"));
        }
        let key = buf.copy_to_bytes(key_len).to_vec();
        if offset < DATA_HEADER_SIZE || offset >= data_len {
            return Err(corrupt("index offset outside data section"));
        }
        index.push((key, offset));
    }

    let min_key = read_key(&mut buf).ok_or_else(|| corrupt("truncated min key"))?;
    let max_key = read_key(&mut buf).ok_or_else(|| corrupt("truncated max key"))?;

    if (entry_count == 0) != index.is_empty() {
        return Err(corrupt("entry count disagrees with index"));
    }

    Ok(ParsedIndex {
        entry_count,
        max_sequence,
        data_len,
        index,
        min_key,
        max_key,
    })
}

fn read_key(buf: &mut &[u8]) -> Option<Vec<u8>> {
    if buf.remaining() < 4 {
        return None;
    }
    let len = buf.get_u32_le() as usize;
    if buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len).to_vec())
}

fn truncated(id: u64, e: std::io::Error) -> LodeError {
    if e.kind() == ErrorKind::UnexpectedEof {
        LodeError::Corruption(format!("table {}: unexpected end of data file", id))
    } else {
        LodeError::Io(e)
    }
}
