//! Error types for the ledger

use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Uniqueness or precondition violated by a write
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Record failed validation before it was written
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// True for errors caused by the caller's request rather than the store itself
    pub fn is_precondition(&self) -> bool {
        matches!(self, Error::NotFound(_) | Error::Conflict(_) | Error::InvalidRecord(_))
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
