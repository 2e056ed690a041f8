//! Key slots persisted through a [`StorageBackend`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use tokio::sync::{watch, Mutex};
use tracing::{debug, info};
use zeroize::Zeroizing;

use vaultdb_crypto::DatabaseKey;
use vaultdb_storage::StorageBackend;
use vaultdb_storage_keyring::KeyringBackend;
use vaultdb_storage_sqlite::SqliteBackend;

use crate::error::KeyStoreError;
use crate::repository::{DatabaseKeyRepository, KeyStream};

/// Name of the durable store file inside the data directory.
pub const KEYSTORE_NAME: &str = "keystore";

/// Storage keys of the two slots.
mod keys {
    pub const ACTIVE: &str = "database_key";
    pub const BACKUP: &str = "database_key_backup";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Active,
    Backup,
}

impl Slot {
    fn storage_key(self) -> &'static str {
        match self {
            Slot::Active => keys::ACTIVE,
            Slot::Backup => keys::BACKUP,
        }
    }
}

struct Inner<B> {
    backend: Arc<B>,
    active: watch::Sender<Option<DatabaseKey>>,
    backup: watch::Sender<Option<DatabaseKey>>,
    /// Serializes check-then-write sequences on the slots.
    write_lock: Mutex<()>,
}

/// The active/backup key slots of one installation.
///
/// Writes go to the backend first and are then published to every open
/// flow. Clones share the same slots.
pub struct KeyStore<B> {
    inner: Arc<Inner<B>>,
}

impl<B> Clone for KeyStore<B> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl KeyStore<SqliteBackend> {
    /// Opens the file key store kept in `data_dir`.
    ///
    /// Keys are held in clear in `keystore.db`. Meant for development and
    /// tests; installations should use [`KeyStore::open_keyring`].
    pub async fn open(data_dir: impl AsRef<Path>) -> Result<Self, KeyStoreError> {
        let backend = SqliteBackend::open(data_dir, KEYSTORE_NAME).await?;
        Self::new(backend).await
    }
}

impl KeyStore<KeyringBackend> {
    /// Opens the key slots filed under `service` in the OS keyring.
    pub async fn open_keyring(service: &str) -> Result<Self, KeyStoreError> {
        let backend = KeyringBackend::new(service)?;
        Self::new(backend).await
    }
}

impl<B: StorageBackend + 'static> KeyStore<B> {
    /// Creates a key store over `backend`, loading both slots.
    pub async fn new(backend: B) -> Result<Self, KeyStoreError> {
        let active = read_slot(&backend, Slot::Active).await?;
        let backup = read_slot(&backend, Slot::Backup).await?;

        debug!(
            has_key = active.is_some(),
            has_backup = backup.is_some(),
            "Key slots loaded"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                backend: Arc::new(backend),
                active: watch::Sender::new(active),
                backup: watch::Sender::new(backup),
                write_lock: Mutex::new(()),
            }),
        })
    }

    /// The underlying storage backend.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    fn channel(&self, slot: Slot) -> &watch::Sender<Option<DatabaseKey>> {
        match slot {
            Slot::Active => &self.inner.active,
            Slot::Backup => &self.inner.backup,
        }
    }

    async fn write_slot(&self, slot: Slot, key: Option<&DatabaseKey>) -> Result<(), KeyStoreError> {
        match key {
            Some(key) => {
                self.inner
                    .backend
                    .put(slot.storage_key(), key.as_bytes())
                    .await?
            }
            None => self.inner.backend.delete(slot.storage_key()).await?,
        }
        self.channel(slot).send_replace(key.cloned());
        Ok(())
    }

    fn watch_slot(&self, slot: Slot) -> KeyStream {
        let backend = Arc::clone(&self.inner.backend);
        let rx = self.channel(slot).subscribe();

        stream::unfold(Cursor::Start(backend, rx), move |cursor| async move {
            match cursor {
                Cursor::Start(backend, mut rx) => {
                    let _ = rx.borrow_and_update();
                    match read_slot(backend.as_ref(), slot).await {
                        Ok(value) => Some((Ok(value), Cursor::Follow(rx))),
                        Err(e) => Some((Err(e), Cursor::Done)),
                    }
                }
                Cursor::Follow(mut rx) => {
                    rx.changed().await.ok()?;
                    let value = rx.borrow_and_update().clone();
                    Some((Ok(value), Cursor::Follow(rx)))
                }
                Cursor::Done => None,
            }
        })
        .boxed()
    }
}

enum Cursor<B> {
    Start(Arc<B>, watch::Receiver<Option<DatabaseKey>>),
    Follow(watch::Receiver<Option<DatabaseKey>>),
    Done,
}

async fn read_slot<B: StorageBackend + ?Sized>(
    backend: &B,
    slot: Slot,
) -> Result<Option<DatabaseKey>, KeyStoreError> {
    let Some(raw) = backend.get(slot.storage_key()).await? else {
        return Ok(None);
    };
    let raw = Zeroizing::new(raw);
    DatabaseKey::from_bytes(&raw)
        .map(Some)
        .map_err(|_| KeyStoreError::Corrupted(slot.storage_key().to_string()))
}

#[async_trait]
impl<B: StorageBackend + 'static> DatabaseKeyRepository for KeyStore<B> {
    fn key_flow(&self) -> KeyStream {
        self.watch_slot(Slot::Active)
    }

    async fn set_key(
        &self,
        key: &DatabaseKey,
        override_existing: bool,
    ) -> Result<(), KeyStoreError> {
        let _guard = self.inner.write_lock.lock().await;

        if !override_existing && self.inner.backend.exists(keys::ACTIVE).await? {
            return Err(KeyStoreError::KeyAlreadySet);
        }

        self.write_slot(Slot::Active, Some(key)).await?;
        info!(override_existing, "Database key installed");
        Ok(())
    }

    async fn remove_key(&self) -> Result<(), KeyStoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.write_slot(Slot::Active, None).await?;
        info!("Database key removed");
        Ok(())
    }

    fn backup_key_flow(&self) -> KeyStream {
        self.watch_slot(Slot::Backup)
    }

    async fn remove_backup_key(&self) -> Result<(), KeyStoreError> {
        let _guard = self.inner.write_lock.lock().await;
        self.write_slot(Slot::Backup, None).await?;
        debug!("Backup key removed");
        Ok(())
    }

    async fn copy_key_to_backup_key(&self) -> Result<(), KeyStoreError> {
        let _guard = self.inner.write_lock.lock().await;

        match read_slot(self.inner.backend.as_ref(), Slot::Active).await? {
            Some(key) => {
                self.write_slot(Slot::Backup, Some(&key)).await?;
                debug!("Database key copied to backup slot");
            }
            None => debug!("No database key to back up"),
        }
        Ok(())
    }
}
