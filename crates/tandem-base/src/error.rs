//! Error types for tandem-base.

use thiserror::Error;

/// Result type for causal-log operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in causal-log operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Local writer is not in the writer set
    #[error("local writer is not authorized")]
    NotWritable,

    /// The base has been closed
    #[error("base is closed")]
    Closed,

    /// Malformed key material
    #[error("Key error: {0}")]
    Key(#[from] tandem_protocols::Error),
}

impl From<rocksdb::Error> for Error {
    fn from(e: rocksdb::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
