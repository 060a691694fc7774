//! # LodeKV
//!
//! An embedded, ordered, crash-safe key-value store with:
//! - Write-Ahead Logging (WAL) for durability
//! - Crash recovery with torn-tail handling
//! - Single-writer/multi-reader concurrency model
//! - Sorted table files with sparse indexes
//! - Background flushing and leveled compaction
//! - A small JSON-over-HTTP front end
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 HTTP Server (network, http)                  │
//! │              POST /set   GET /get/:key                       │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//! ┌─────────────────────▼───────────────────────────────────────┐
//! │                       Store                                  │
//! │            (Single Writer / Multi Reader)                    │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┴────────────┐
//!          │                         │
//!          ▼                         ▼
//!   ┌─────────────┐          ┌─────────────┐
//!   │     WAL     │          │  MemTable   │── freeze ──┐
//!   │  (Append)   │          │  (RwLock)   │            │ flush thread
//!   └─────────────┘          └─────────────┘            ▼
//!                                            ┌─────────────────────┐
//!                                            │  Storage (L0..Ln)   │
//!                                            │  SSTables+Manifest  │
//!                                            │  compaction thread  │
//!                                            └─────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use lodekv::{Config, Store};
//!
//! let store = Store::open(Config::builder().data_dir("./data").build())?;
//! store.put(b"a", b"1")?;
//! assert_eq!(store.get(b"a")?, Some(b"1".to_vec()));
//! store.close()?;
//! # Ok::<(), lodekv::LodeError>(())
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod codec;
pub mod memtable;
pub mod storage;
pub mod store;
pub mod wal;

pub mod http;
pub mod network;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use error::{LodeError, Result};
pub use store::{Store, StoreIterator, StoreState, StoreStats};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of LodeKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
