//! In-memory storage backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use crate::{StorageBackend, StorageError};

/// Volatile backend keeping values in a process-local map.
///
/// Clones share the same map, so a clone can be used to simulate a process
/// restart against the same "device" storage.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, Zeroizing<Vec<u8>>>>>,
}

impl MemoryBackend {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.read().await.get(key).map(|v| v.to_vec()))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
