//! Manifest
//!
//! The metadata file recording which table files are live, the next file id,
//! the last assigned sequence number and the oldest WAL segment still needed.
//!
//! ## File Format
//! ```text
//! ┌──────────┬───────────┬─────────────────────┬──────────┐
//! │Magic (4) │ Len (4)   │ bincode(ManifestData)│ CRC (4)  │
//! └──────────┴───────────┴─────────────────────┴──────────┘
//! ```
//! Rewritten whole on every change: written to `MANIFEST.tmp`, fsynced, then
//! renamed over `MANIFEST` and the directory fsynced.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{LodeError, Result};

use super::SSTableMeta;

const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_TMP_FILE: &str = "MANIFEST.tmp";
const MANIFEST_MAGIC: &[u8; 4] = b"LDKM";

/// Persisted store metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestData {
    /// Next table file id to allocate
    pub next_file_id: u64,
    /// Highest sequence number reflected in table files
    pub last_sequence: u64,
    /// WAL segments below this id are fully reflected in table files
    pub log_number: u64,
    /// Live tables, level by level
    pub levels: Vec<Vec<SSTableMeta>>,
}

impl ManifestData {
    /// Ids of every live table
    pub fn table_ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.levels.iter().flatten().map(|m| m.id)
    }
}

/// Owner of the manifest file
pub struct Manifest {
    dir: PathBuf,
    data: ManifestData,
    /// Upcoming directory syncs to fail
    #[cfg(test)]
    pub(crate) fail_dir_syncs: usize,
}

impl Manifest {
    /// Load the manifest from `dir`, `Ok(None)` if there is none yet
    ///
    /// A manifest that exists but fails its checksum is fatal.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let raw = match fs::read(Self::path(dir)) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let data = decode(&raw)?;
        Ok(Some(Self {
            dir: dir.to_path_buf(),
            data,
            #[cfg(test)]
            fail_dir_syncs: 0,
        }))
    }

    /// Create and persist a fresh manifest
    pub fn create(dir: &Path, num_levels: usize) -> Result<Self> {
        let mut manifest = Self {
            dir: dir.to_path_buf(),
            data: ManifestData::default(),
            #[cfg(test)]
            fail_dir_syncs: 0,
        };
        manifest.write(ManifestData {
            next_file_id: 1,
            last_sequence: 0,
            log_number: 0,
            levels: vec![Vec::new(); num_levels],
        })?;
        Ok(manifest)
    }

    /// Current contents
    pub fn data(&self) -> &ManifestData {
        &self.data
    }

    /// Atomically replace the manifest with `data`
    ///
    /// Once the rename succeeds `data()` reflects the new contents, even if
    /// the directory sync that follows fails and an error is returned.
    pub fn write(&mut self, data: ManifestData) -> Result<()> {
        let encoded = encode(&data)?;

        let tmp_path = self.dir.join(MANIFEST_TMP_FILE);
        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        drop(file);

        fs::rename(&tmp_path, Self::path(&self.dir))?;
        self.data = data;

        self.sync_dir()
    }

    #[cfg(not(test))]
    fn sync_dir(&mut self) -> Result<()> {
        super::sync_dir(&self.dir)
    }

    #[cfg(test)]
    fn sync_dir(&mut self) -> Result<()> {
        if self.fail_dir_syncs > 0 {
            self.fail_dir_syncs -= 1;
            return Err(std::io::Error::new(std::io::ErrorKind::Other, "injected directory sync failure").into());
        }
        super::sync_dir(&self.dir)
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }

    /// Remove a temp file left by a crash mid-write
    pub fn remove_stale_temp(dir: &Path) -> Result<()> {
        match fs::remove_file(dir.join(MANIFEST_TMP_FILE)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

fn encode(data: &ManifestData) -> Result<Vec<u8>> {
    let body = bincode::serialize(data)?;
    let mut out = Vec::with_capacity(body.len() + 12);
    out.extend_from_slice(MANIFEST_MAGIC);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(&body);
    let crc = crc32fast::hash(&out);
    out.extend_from_slice(&crc.to_le_bytes());
    Ok(out)
}

fn decode(raw: &[u8]) -> Result<ManifestData> {
    if raw.len() < 12 || &raw[0..4] != MANIFEST_MAGIC {
        return Err(LodeError::Corruption("manifest: invalid header".into()));
    }

    let len = u32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]) as usize;
    if raw.len() != 8 + len + 4 {
        return Err(LodeError::Corruption(format!(
            "manifest: length {} does not match file size {}",
            len,
            raw.len()
        )));
    }

    let (body, crc_bytes) = raw.split_at(8 + len);
    let stored = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    if crc32fast::hash(body) != stored {
        return Err(LodeError::Corruption("manifest: checksum mismatch".into()));
    }

    bincode::deserialize(&body[8..])
        .map_err(|e| LodeError::Corruption(format!("manifest: {}", e)))
}
