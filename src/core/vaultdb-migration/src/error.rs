//! Migration error types.

use thiserror::Error;

use vaultdb_cipher::{AccessError, ConversionError};
use vaultdb_keystore::KeyStoreError;

/// Errors that can occur while migrating a database.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// Invalid database configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A previous promotion was interrupted; finish it before migrating again.
    #[error("an interrupted promotion must be finished first")]
    PromotionPending,

    /// The keys given do not fit the pending migration.
    #[error("pending migration does not match the given keys: {0}")]
    KeyMismatch(String),

    /// The temp database no longer matches the digest recorded when it was built.
    #[error("temp database checksum mismatch: {0}")]
    ChecksumMismatch(String),

    /// Building the temp database failed.
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// The temp or live database did not open with the expected key.
    #[error(transparent)]
    Access(#[from] AccessError),

    /// Key store error.
    #[error(transparent)]
    KeyStore(#[from] KeyStoreError),

    /// The live database could not be put back from its backup.
    #[error("failed to restore database backup: {0}")]
    RestoreFailed(String),

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),

    /// The background task running the migration died.
    #[error("migration task failed: {0}")]
    Task(String),
}

impl From<std::io::Error> for MigrationError {
    fn from(e: std::io::Error) -> Self {
        MigrationError::Io(e.to_string())
    }
}
