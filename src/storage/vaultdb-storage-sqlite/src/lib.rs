//! # vaultdb Storage - SQLite Backend
//!
//! Durable key-value store backing the database key slots.
//! Each store is a single SQLite file inside the data directory, kept apart
//! from the vault database it protects.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, info};

use vaultdb_storage::{StorageBackend, StorageError};

/// SQLite storage backend.
///
/// The store lives at `{base_path}/{name}.db`. Values are overwritten in
/// place; previous versions of a slot are never retained.
#[derive(Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl SqliteBackend {
    /// Opens or creates a key store file.
    ///
    /// # Arguments
    ///
    /// * `base_path` - Directory where the store file is kept
    /// * `name` - Store name (must match `[a-z0-9_-]+`)
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Store name is invalid
    /// - Directory cannot be created
    /// - Database connection fails
    pub async fn open(base_path: impl AsRef<Path>, name: &str) -> Result<Self, StorageError> {
        Self::validate_name(name)?;

        let base = base_path.as_ref();
        tokio::fs::create_dir_all(base).await.map_err(|e| {
            StorageError::ConnectionFailed(format!("failed to create directory: {e}"))
        })?;

        let db_path = base.join(format!("{name}.db"));

        debug!(store = %name, path = %db_path.display(), "Opening key store");

        let options = SqliteConnectOptions::new()
            .filename(&db_path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let backend = Self { pool, db_path };

        backend.migrate().await?;

        info!(store = %name, "SQLite key store ready");

        Ok(backend)
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.db_path
    }

    /// Closes the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Validates that a store name is safe.
    ///
    /// Only allows: lowercase letters, digits, underscore, hyphen.
    fn validate_name(name: &str) -> Result<(), StorageError> {
        if name.is_empty() {
            return Err(StorageError::InvalidInput("store name cannot be empty".into()));
        }

        if name.len() > 64 {
            return Err(StorageError::InvalidInput("store name too long".into()));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-');

        if !valid {
            return Err(StorageError::InvalidInput(
                "store name must match [a-z0-9_-]+".into(),
            ));
        }

        Ok(())
    }

    async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key        TEXT PRIMARY KEY,
                value      BLOB NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::ConnectionFailed(format!("migration failed: {e}")))?;

        Ok(())
    }

    /// Returns the current Unix timestamp.
    fn now() -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let row: Option<(Vec<u8>,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(row.map(|(v,)| v))
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Self::now())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::QueryFailed(e.to_string()))?;

        Ok(())
    }
}
