//! Error types for tandem-protocols.

use thiserror::Error;

/// Result type for tandem-protocols operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while handling protocol values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// A key was not 64 hex characters.
    #[error("invalid key: expected {expected} hex chars, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// A key contained non-hex characters.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}
