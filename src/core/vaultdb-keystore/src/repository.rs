//! Contract consumed by the migration engine.

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::StreamExt;

use vaultdb_crypto::DatabaseKey;

use crate::error::KeyStoreError;

/// Stream of slot values: current value first, then every change.
///
/// A read fault is delivered as an `Err` item and ends the stream.
pub type KeyStream = BoxStream<'static, Result<Option<DatabaseKey>, KeyStoreError>>;

/// Durable, observable storage of the active and backup database keys.
#[async_trait]
pub trait DatabaseKeyRepository: Send + Sync {
    /// Produces a fresh random key. Nothing is persisted.
    fn generate_key(&self) -> DatabaseKey {
        DatabaseKey::generate()
    }

    /// Observes the active key.
    fn key_flow(&self) -> KeyStream;

    /// Installs the active key.
    ///
    /// Fails with [`KeyStoreError::KeyAlreadySet`] when a key is present and
    /// `override_existing` is false; the slot is left untouched in that case.
    async fn set_key(
        &self,
        key: &DatabaseKey,
        override_existing: bool,
    ) -> Result<(), KeyStoreError>;

    /// Clears the active slot. No-op when already empty.
    async fn remove_key(&self) -> Result<(), KeyStoreError>;

    /// Observes the backup key.
    fn backup_key_flow(&self) -> KeyStream;

    /// Clears the backup slot.
    async fn remove_backup_key(&self) -> Result<(), KeyStoreError>;

    /// Snapshots the active key into the backup slot.
    ///
    /// No-op when there is no active key.
    async fn copy_key_to_backup_key(&self) -> Result<(), KeyStoreError>;

    /// Current active key.
    async fn key(&self) -> Result<Option<DatabaseKey>, KeyStoreError> {
        first_value(self.key_flow()).await
    }

    /// Current backup key.
    async fn backup_key(&self) -> Result<Option<DatabaseKey>, KeyStoreError> {
        first_value(self.backup_key_flow()).await
    }
}

async fn first_value(mut flow: KeyStream) -> Result<Option<DatabaseKey>, KeyStoreError> {
    flow.next().await.unwrap_or(Ok(None))
}
