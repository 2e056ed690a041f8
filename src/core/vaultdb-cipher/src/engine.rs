//! Encrypted store engine backed by SQLCipher.
//!
//! The engine offers two primitives: open a file with a key and verify it,
//! and export a file's full contents into a new file under another key.
//! Everything above this module is engine-agnostic.

use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use vaultdb_crypto::DatabaseKey;

use crate::error::EngineError;

/// Schema name the export destination is attached under.
const EXPORT_SCHEMA: &str = "migrated";

/// Page-level encrypted embedded SQL engine.
#[async_trait]
pub trait EncryptedStoreEngine: Send + Sync {
    /// Opens `path` with `key` (absent means plaintext), reads the schema and
    /// runs an integrity check. The file is not modified.
    async fn verify(&self, path: &Path, key: Option<&DatabaseKey>) -> Result<(), EngineError>;

    /// Writes the schema and data of `source` into a new file at `dest`.
    ///
    /// `source` is opened with `source_key` and only read from. `dest` is
    /// keyed with `dest_key`, or written as plaintext when it is absent.
    async fn export(
        &self,
        source: &Path,
        source_key: Option<&DatabaseKey>,
        dest: &Path,
        dest_key: Option<&DatabaseKey>,
    ) -> Result<(), EngineError>;
}

/// [`EncryptedStoreEngine`] over the SQLCipher build of SQLite, driven by sqlx.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlCipherEngine;

impl SqlCipherEngine {
    /// Creates the engine.
    pub fn new() -> Self {
        Self
    }

    /// Opens a single connection to an existing database file.
    ///
    /// The key pragma is the first statement sqlx runs on a new connection.
    /// Statement logging is off so key material never reaches the logs.
    pub async fn connect(
        path: &Path,
        key: Option<&DatabaseKey>,
    ) -> Result<SqliteConnection, EngineError> {
        Ok(Self::options(path, key).connect().await?)
    }

    fn options(path: &Path, key: Option<&DatabaseKey>) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(false)
            .disable_statement_logging();

        match key {
            Some(key) => options.pragma("key", key.to_sqlcipher_literal().as_str().to_owned()),
            None => options,
        }
    }

    /// Connection to an existing `source` whose open flags let `ATTACH`
    /// create the export destination.
    async fn connect_for_export(
        source: &Path,
        key: Option<&DatabaseKey>,
    ) -> Result<SqliteConnection, EngineError> {
        // The create flag would also apply to the source itself.
        if !tokio::fs::try_exists(source).await? {
            return Err(EngineError::CantOpen(format!(
                "{} does not exist",
                source.display()
            )));
        }

        Ok(Self::options(source, key)
            .create_if_missing(true)
            .connect()
            .await?)
    }

    async fn close(conn: SqliteConnection) {
        if let Err(e) = conn.close().await {
            warn!(error = %e, "Failed to close database connection");
        }
    }

    async fn verify_on(conn: &mut SqliteConnection) -> Result<(), EngineError> {
        let _tables: i64 = sqlx::query_scalar("SELECT count(*) FROM sqlite_master")
            .fetch_one(&mut *conn)
            .await?;

        let verdict: String = sqlx::query_scalar("PRAGMA integrity_check")
            .fetch_one(&mut *conn)
            .await?;

        if verdict != "ok" {
            return Err(EngineError::Corrupted(verdict));
        }

        Ok(())
    }

    async fn export_on(
        conn: &mut SqliteConnection,
        dest: &Path,
        dest_key: Option<&DatabaseKey>,
    ) -> Result<(), EngineError> {
        let user_version: i64 = sqlx::query_scalar("PRAGMA user_version")
            .fetch_one(&mut *conn)
            .await?;

        let dest = dest
            .to_str()
            .ok_or_else(|| EngineError::Io(format!("non UTF-8 path: {}", dest.display())))?
            .replace('\'', "''");

        let key_literal = match dest_key {
            Some(key) => key.to_sqlcipher_literal(),
            None => Zeroizing::new("''".to_string()),
        };

        let attach = Zeroizing::new(format!(
            "ATTACH DATABASE '{dest}' AS {EXPORT_SCHEMA} KEY {}",
            key_literal.as_str()
        ));
        sqlx::query(attach.as_str())
            .persistent(false)
            .execute(&mut *conn)
            .await?;

        let exported = async {
            sqlx::query(&format!("SELECT sqlcipher_export('{EXPORT_SCHEMA}')"))
                .execute(&mut *conn)
                .await?;

            sqlx::query(&format!(
                "PRAGMA {EXPORT_SCHEMA}.user_version = {user_version}"
            ))
            .execute(&mut *conn)
            .await?;

            Ok::<(), EngineError>(())
        }
        .await;

        let detached = sqlx::query(&format!("DETACH DATABASE {EXPORT_SCHEMA}"))
            .execute(&mut *conn)
            .await;

        exported?;
        detached?;

        debug!(user_version, "Database exported");

        Ok(())
    }
}

#[async_trait]
impl EncryptedStoreEngine for SqlCipherEngine {
    async fn verify(&self, path: &Path, key: Option<&DatabaseKey>) -> Result<(), EngineError> {
        let mut conn = Self::connect(path, key).await?;
        let result = Self::verify_on(&mut conn).await;
        Self::close(conn).await;
        result
    }

    async fn export(
        &self,
        source: &Path,
        source_key: Option<&DatabaseKey>,
        dest: &Path,
        dest_key: Option<&DatabaseKey>,
    ) -> Result<(), EngineError> {
        let mut conn = Self::connect_for_export(source, source_key).await?;
        let result = Self::export_on(&mut conn, dest, dest_key).await;
        Self::close(conn).await;
        result
    }
}
