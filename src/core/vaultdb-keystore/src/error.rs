//! Key store error types.

use thiserror::Error;

/// Errors that can occur while reading or writing key slots.
#[derive(Debug, Error)]
pub enum KeyStoreError {
    /// An active key exists and the caller did not ask to override it.
    #[error("database key already set")]
    KeyAlreadySet,

    /// A stored slot does not hold a valid key.
    #[error("corrupted key slot '{0}'")]
    Corrupted(String),

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<vaultdb_storage::StorageError> for KeyStoreError {
    fn from(e: vaultdb_storage::StorageError) -> Self {
        KeyStoreError::Storage(e.to_string())
    }
}
