//! Record encoding and decoding

use std::io::{ErrorKind, Read};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{LodeError, Result};

/// Header size: CRC (4) + Sequence (8) + KeyLen (4) + ValLen (4) = 20 bytes
pub const HEADER_SIZE: usize = 20;

/// Sentinel value length indicating a tombstone (deleted key)
pub const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Largest key accepted by the codec (1 MB)
pub const MAX_KEY_SIZE: usize = 1024 * 1024;

/// Largest value accepted by the codec (64 MB)
pub const MAX_VALUE_SIZE: usize = 64 * 1024 * 1024;

/// A live value or a deletion marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueEntry {
    /// A live value
    Value(Vec<u8>),

    /// A tombstone (deleted key)
    Tombstone,
}

impl ValueEntry {
    pub fn is_tombstone(&self) -> bool {
        matches!(self, ValueEntry::Tombstone)
    }

    /// The value bytes, `None` for a tombstone
    pub fn value(&self) -> Option<&[u8]> {
        match self {
            ValueEntry::Value(v) => Some(v),
            ValueEntry::Tombstone => None,
        }
    }

    pub fn into_value(self) -> Option<Vec<u8>> {
        match self {
            ValueEntry::Value(v) => Some(v),
            ValueEntry::Tombstone => None,
        }
    }

    /// Payload bytes this entry contributes to an encoded record
    pub fn encoded_len(&self) -> usize {
        self.value().map_or(0, <[u8]>::len)
    }
}

/// A single versioned mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub key: Vec<u8>,
    pub entry: ValueEntry,
    /// Monotonic write sequence; higher wins for the same key
    pub sequence: u64,
}

impl Record {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            key: key.into(),
            entry: ValueEntry::Value(value.into()),
            sequence,
        }
    }

    pub fn tombstone(key: impl Into<Vec<u8>>, sequence: u64) -> Self {
        Self {
            key: key.into(),
            entry: ValueEntry::Tombstone,
            sequence,
        }
    }

    /// Size of the encoded form in bytes
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.key.len() + self.entry.encoded_len()
    }

    /// Encode into the fixed-header binary layout
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Append the encoded record to `buf`
    pub fn encode_to(&self, buf: &mut BytesMut) {
        let val_len = match &self.entry {
            ValueEntry::Value(v) => v.len() as u32,
            ValueEntry::Tombstone => TOMBSTONE_MARKER,
        };

        let start = buf.len();
        buf.put_u32_le(0); // CRC placeholder
        buf.put_u64_le(self.sequence);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_u32_le(val_len);
        buf.put_slice(&self.key);
        if let ValueEntry::Value(v) = &self.entry {
            buf.put_slice(v);
        }

        let crc = crc32fast::hash(&buf[start + 4..]);
        buf[start..start + 4].copy_from_slice(&crc.to_le_bytes());
    }

    /// Decode one record from the front of `bytes`
    ///
    /// Returns the record and the number of bytes consumed.
    pub fn decode(bytes: &[u8]) -> Result<(Record, usize)> {
        if bytes.len() < HEADER_SIZE {
            return Err(LodeError::Corruption(format!(
                "truncated record header: {} of {} bytes",
                bytes.len(),
                HEADER_SIZE
            )));
        }

        let (stored_crc, sequence, key_len, val_len) = parse_header(&bytes[..HEADER_SIZE])?;
        let payload_len = key_len + val_len.unwrap_or(0);
        let total = HEADER_SIZE + payload_len;
        if bytes.len() < total {
            return Err(LodeError::Corruption(format!(
                "truncated record payload: {} of {} bytes",
                bytes.len(),
                total
            )));
        }

        let actual_crc = crc32fast::hash(&bytes[4..total]);
        if actual_crc != stored_crc {
            return Err(LodeError::Corruption(format!(
                "record checksum mismatch: stored {:#010x}, computed {:#010x}",
                stored_crc, actual_crc
            )));
        }

        let mut payload = &bytes[HEADER_SIZE..total];
        let key = payload.copy_to_bytes(key_len).to_vec();
        let entry = match val_len {
            Some(len) => ValueEntry::Value(payload.copy_to_bytes(len).to_vec()),
            None => ValueEntry::Tombstone,
        };

        Ok((
            Record {
                key,
                entry,
                sequence,
            },
            total,
        ))
    }

    /// Read one record from a stream
    ///
    /// - `Ok(None)`: clean end of stream (no bytes left)
    /// - `Err(Corruption)`: torn tail, impossible length or checksum mismatch
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<Record>> {
        let mut header = [0u8; HEADER_SIZE];
        let mut filled = 0;
        while filled < HEADER_SIZE {
            match reader.read(&mut header[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_SIZE {
            return Err(LodeError::Corruption(format!(
                "truncated record header: {} of {} bytes",
                filled, HEADER_SIZE
            )));
        }

        let (_, _, key_len, val_len) = parse_header(&header)?;
        let payload_len = key_len + val_len.unwrap_or(0);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload_len);
        buf.extend_from_slice(&header);
        buf.resize(HEADER_SIZE + payload_len, 0);
        if let Err(e) = reader.read_exact(&mut buf[HEADER_SIZE..]) {
            if e.kind() == ErrorKind::UnexpectedEof {
                return Err(LodeError::Corruption(
                    "truncated record payload at end of stream".to_string(),
                ));
            }
            return Err(e.into());
        }

        Record::decode(&buf).map(|(record, _)| Some(record))
    }
}

/// Parse and sanity-check a header: (crc, sequence, key_len, value_len)
fn parse_header(mut header: &[u8]) -> Result<(u32, u64, usize, Option<usize>)> {
    let crc = header.get_u32_le();
    let sequence = header.get_u64_le();
    let key_len = header.get_u32_le() as usize;
    let raw_val_len = header.get_u32_le();

    if key_len > MAX_KEY_SIZE {
        return Err(LodeError::Corruption(format!(
            "impossible key length {}",
            key_len
        )));
    }

    let val_len = if raw_val_len == TOMBSTONE_MARKER {
        None
    } else {
        let len = raw_val_len as usize;
        if len > MAX_VALUE_SIZE {
            return Err(LodeError::Corruption(format!(
                "impossible value length {}",
                len
            )));
        }
        Some(len)
    };

    Ok((crc, sequence, key_len, val_len))
}
