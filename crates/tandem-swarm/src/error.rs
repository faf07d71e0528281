//! Error types for tandem-swarm.

use std::io;
use thiserror::Error;

/// Result type for swarm operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while joining or tearing down channels.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// The swarm was destroyed
    #[error("swarm has been destroyed")]
    Destroyed,

    /// Peer spoke something other than the expected preamble
    #[error("Protocol error: {0}")]
    Protocol(String),
}

/// Whether an IO error is ordinary connection teardown.
///
/// Resets, broken pipes and truncated reads happen whenever a peer goes away
/// mid-write. Callers swallow these instead of surfacing them.
pub fn is_disconnect(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::UnexpectedEof
    )
}
