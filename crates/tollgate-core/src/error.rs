//! Error types for tollgate-core

use thiserror::Error;

/// Result type alias using tollgate-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tollgate-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Generic storage backend failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Backend refused a write because it is full
    #[error("Storage quota exceeded for '{backend}' ({needed} bytes, {quota} allowed)")]
    QuotaExceeded {
        backend: &'static str,
        needed: usize,
        quota: usize,
    },

    /// Backend is switched off (private mode, blocked cookies)
    #[error("Storage backend '{0}' is disabled")]
    StorageDisabled(&'static str),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration rejected during validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Category key that is not one of the consent categories
    #[error("Unknown consent category: {0}")]
    UnknownCategory(String),
}
