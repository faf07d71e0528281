//! Error types for tandem-node.

use thiserror::Error;

/// Result type for instance operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in instance operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Causal log error
    #[error("Base error: {0}")]
    Base(#[from] tandem_base::Error),

    /// Discovery transport error
    #[error("Swarm error: {0}")]
    Swarm(#[from] tandem_swarm::Error),

    /// Malformed key material
    #[error("Key error: {0}")]
    Key(#[from] tandem_protocols::Error),

    /// Invalid configuration
    #[error("Config error: {0}")]
    Config(String),

    /// Lifecycle call made in the wrong state
    #[error("Invalid state: expected {expected}, was {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    /// Operation needs `ready()` first
    #[error("instance is not ready")]
    NotReady,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
