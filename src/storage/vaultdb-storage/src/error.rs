//! Storage error types.

use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Connection to the underlying store could not be established.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A query against the underlying store failed.
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// Caller supplied an invalid argument.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Generic I/O error.
    #[error("io error: {0}")]
    Io(String),
}
