//! WAL Reader
//!
//! Lazily reads records from a single WAL segment.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use crate::codec::Record;
use crate::error::{LodeError, Result};

/// Reads records from a WAL segment
///
/// Iteration is lazy and finite: it ends at the clean end of the file or at
/// the first torn/corrupt record, whichever comes first. Opening the segment
/// again restarts from the beginning.
pub struct WalReader {
    path: PathBuf,
    reader: BufReader<File>,
    /// Byte offset just past the last valid record
    valid_len: u64,
    /// Why iteration stopped early, if it did
    tail_error: Option<String>,
    done: bool,
}

impl WalReader {
    /// Open a WAL segment for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            reader: BufReader::new(file),
            valid_len: 0,
            tail_error: None,
            done: false,
        })
    }

    /// Read the next record, `Ok(None)` once the valid prefix is exhausted
    pub fn next_record(&mut self) -> Result<Option<Record>> {
        if self.done {
            return Ok(None);
        }

        match Record::read_from(&mut self.reader) {
            Ok(Some(record)) => {
                self.valid_len += record.encoded_len() as u64;
                Ok(Some(record))
            }
            Ok(None) => {
                self.done = true;
                Ok(None)
            }
            Err(LodeError::Corruption(reason)) => {
                self.done = true;
                self.tail_error = Some(reason);
                Ok(None)
            }
            Err(e) => {
                self.done = true;
                Err(e)
            }
        }
    }

    /// Length of the valid prefix read so far
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Set when iteration stopped at a torn or corrupt record
    pub fn tail_error(&self) -> Option<&str> {
        self.tail_error.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Iterator for WalReader {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
