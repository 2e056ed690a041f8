//! Storage backend trait definition.

use async_trait::async_trait;

use crate::error::StorageError;

/// Key-value store holding opaque secret values.
///
/// Implementations stand in for platform secure storage (Keystore, Keychain,
/// Secret Service). Values are raw bytes; callers own their encoding.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Get a value by key.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Put a value with a key, replacing any previous value.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a value by key. Deleting a missing key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Check if a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
