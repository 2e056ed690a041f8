//! # vaultdb Storage - Keyring Backend
//!
//! Keeps key slots in the platform credential store (Keychain, Credential
//! Manager, Secret Service) through the `keyring` crate. This is the store
//! meant for real installations: values never touch the data directory.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use keyring::Entry;
use tracing::debug;
use zeroize::Zeroizing;

use vaultdb_storage::{StorageBackend, StorageError};

/// Keyring storage backend.
///
/// Each storage key maps to one credential `(service, key)`. Values are
/// stored hex-encoded since credential stores hold strings.
#[derive(Clone)]
pub struct KeyringBackend {
    service: String,
    entries: Arc<Mutex<HashMap<String, Arc<Entry>>>>,
}

impl KeyringBackend {
    /// Creates a backend storing credentials under `service`.
    ///
    /// # Errors
    ///
    /// Returns an error if the service name is empty.
    pub fn new(service: impl Into<String>) -> Result<Self, StorageError> {
        let service = service.into();
        if service.is_empty() {
            return Err(StorageError::InvalidInput(
                "keyring service name cannot be empty".into(),
            ));
        }

        debug!(service = %service, "Using OS keyring for key slots");

        Ok(Self {
            service,
            entries: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Service name the credentials are filed under.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// One `Entry` per storage key, reused across calls.
    fn entry(&self, key: &str) -> Result<Arc<Entry>, StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::ConnectionFailed("keyring entry cache poisoned".into()))?;

        if let Some(entry) = entries.get(key) {
            return Ok(Arc::clone(entry));
        }

        let entry = Arc::new(
            Entry::new(&self.service, key)
                .map_err(|e| StorageError::ConnectionFailed(format!("keyring init: {e}")))?,
        );
        entries.insert(key.to_string(), Arc::clone(&entry));
        Ok(entry)
    }
}

/// Runs a blocking keyring call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, StorageError>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StorageError::Io(format!("keyring task failed: {e}")))?
}

#[async_trait]
impl StorageBackend for KeyringBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let entry = self.entry(key)?;
        let encoded = blocking(move || match entry.get_password() {
            Ok(encoded) => Ok(Some(Zeroizing::new(encoded))),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(StorageError::QueryFailed(format!("load: {e}"))),
        })
        .await?;

        encoded
            .map(|encoded| {
                hex::decode(encoded.as_str())
                    .map_err(|e| StorageError::QueryFailed(format!("decode stored value: {e}")))
            })
            .transpose()
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let entry = self.entry(key)?;
        let encoded = Zeroizing::new(hex::encode(value));
        blocking(move || {
            entry
                .set_password(&encoded)
                .map_err(|e| StorageError::QueryFailed(format!("store: {e}")))
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let entry = self.entry(key)?;
        blocking(move || match entry.delete_password() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(StorageError::QueryFailed(format!("delete: {e}"))),
        })
        .await
    }
}
