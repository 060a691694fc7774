//! Error types for LodeKV
//!
//! Provides a unified error type for all operations. A missing key is not an
//! error: lookups return `Ok(None)`.

use thiserror::Error;

/// Result type alias using LodeError
pub type Result<T> = std::result::Result<T, LodeError>;

/// Unified error type for LodeKV operations
#[derive(Debug, Error)]
pub enum LodeError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Data Integrity Errors
    // -------------------------------------------------------------------------
    /// Checksum or format violation in a record, block, index or manifest
    #[error("Corruption detected: {0}")]
    Corruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // HTTP Errors
    // -------------------------------------------------------------------------
    #[error("HTTP error: {0}")]
    Http(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    /// Invalid configuration or a conflicting open of the same directory
    #[error("Configuration error: {0}")]
    Config(String),

    // -------------------------------------------------------------------------
    // Lifecycle Errors
    // -------------------------------------------------------------------------
    #[error("Store is not open")]
    Closed,
}

impl LodeError {
    /// True for checksum/format failures
    pub fn is_corruption(&self) -> bool {
        matches!(self, LodeError::Corruption(_))
    }
}

impl From<bincode::Error> for LodeError {
    fn from(e: bincode::Error) -> Self {
        LodeError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for LodeError {
    fn from(e: serde_json::Error) -> Self {
        LodeError::Serialization(e.to_string())
    }
}

impl From<prometheus::Error> for LodeError {
    fn from(e: prometheus::Error) -> Self {
        LodeError::Http(format!("metrics: {}", e))
    }
}
