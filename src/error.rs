/// Unified error handling for the faro client
///
/// Every failure surfaced by this crate is one of four kinds: transport
/// failures, wire protocol violations, server-reported operation failures,
/// and cluster discovery failures. Nothing else crosses the public boundary.
use std::io;
use thiserror::Error;

/// Main error type for faro operations
#[derive(Debug, Error)]
pub enum FaroError {
    /// Transport-level errors: connect failures, timeouts, closed sockets
    #[error("Connection error: {0}")]
    Connection(String),

    /// Wire protocol violations: bad framing, unexpected message kinds
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Failure reported by the server for a single operation
    #[error("Operational error {code}: {message}")]
    Operational { code: u64, message: String },

    /// Cluster-level errors: leader discovery exhausted, no nodes configured
    #[error("Cluster error: {0}")]
    Cluster(String),
}

/// Result type alias for faro operations
pub type FaroResult<T> = Result<T, FaroError>;

/// Convenience methods for creating specific error types
impl FaroError {
    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        FaroError::Connection(message.into())
    }

    /// Create a protocol error
    pub fn protocol<S: Into<String>>(message: S) -> Self {
        FaroError::Protocol(message.into())
    }

    /// Create an operational error with a server failure code
    pub fn operational<S: Into<String>>(code: u64, message: S) -> Self {
        FaroError::Operational {
            code,
            message: message.into(),
        }
    }

    /// Create a cluster error
    pub fn cluster<S: Into<String>>(message: S) -> Self {
        FaroError::Cluster(message.into())
    }

    /// Check if this error is likely to heal on retry
    ///
    /// Connection and cluster errors come from transient conditions such as
    /// node restarts and leader elections. Protocol and operational errors
    /// will reproduce on every attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FaroError::Connection(_) | FaroError::Cluster(_))
    }
}

impl From<io::Error> for FaroError {
    fn from(err: io::Error) -> Self {
        FaroError::Connection(err.to_string())
    }
}
