//! Crate-level error types
//!
//! Transient transport errors are handled inside the replication session
//! (reconnect with backoff) and never escape it; only registry invariant
//! violations are treated as fatal by callers.

use crate::registry::RegistryError;
use crate::wire::FrameError;

/// Convenience result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for read-node operations
#[derive(Debug)]
pub enum Error {
    /// I/O error from the underlying transport
    Io(std::io::Error),
    /// Malformed or unexpected wire frame
    Frame(FrameError),
    /// Registry invariant violation, fatal to the node
    Registry(RegistryError),
    /// Peer closed the connection
    ConnectionClosed,
    /// An operation exceeded its deadline
    Timeout(&'static str),
    /// The peer sent a frame that is invalid at this point of the protocol
    Protocol(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Frame(e) => write!(f, "frame error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::ConnectionClosed => write!(f, "connection closed by peer"),
            Error::Timeout(what) => write!(f, "timed out: {}", what),
            Error::Protocol(what) => write!(f, "protocol violation: {}", what),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Frame(e) => Some(e),
            Error::Registry(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        Error::Frame(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl Error {
    /// Whether this error is fatal for the process.
    ///
    /// Serving an inconsistent registry view is worse than stopping, so
    /// invariant violations must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Registry(_))
    }
}
