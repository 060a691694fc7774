//! Record Codec
//!
//! The binary record shared by the write-ahead log and the table files.
//!
//! ## Record Format
//! ```text
//! ┌──────────┬──────────────┬─────────────┬─────────────┬─────┬───────┐
//! │ CRC (4)  │ Sequence (8) │ KeyLen (4)  │ ValLen (4)  │ Key │ Value │
//! └──────────┴──────────────┴─────────────┴─────────────┴─────┴───────┘
//! ```
//! - All integers little-endian
//! - CRC32 covers every byte after the CRC field
//! - ValLen = u32::MAX marks a tombstone (no value bytes follow)

mod record;

pub use record::{Record, ValueEntry, HEADER_SIZE, MAX_KEY_SIZE, MAX_VALUE_SIZE, TOMBSTONE_MARKER};
