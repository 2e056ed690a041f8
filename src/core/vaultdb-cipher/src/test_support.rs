//! Database fixtures for tests in this workspace.

use std::path::Path;

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, Connection};

use vaultdb_crypto::DatabaseKey;

/// A row of the fixture `items` table.
pub type Row = (i64, String);

/// Builds owned rows from literals.
pub fn rows(items: &[(i64, &str)]) -> Vec<Row> {
    items
        .iter()
        .map(|(id, name)| (*id, (*name).to_string()))
        .collect()
}

/// Creates a database at `path` with an `items` table holding `items`.
///
/// # Panics
///
/// Panics on any database error.
pub async fn create_database(path: &Path, key: Option<&DatabaseKey>, items: &[Row]) {
    let mut options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true);
    if let Some(key) = key {
        options = options.pragma("key", key.to_sqlcipher_literal().as_str().to_owned());
    }

    let mut conn = options.connect().await.expect("create fixture database");

    sqlx::query("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL)")
        .execute(&mut conn)
        .await
        .expect("create items table");

    for (id, name) in items {
        sqlx::query("INSERT INTO items (id, name) VALUES (?, ?)")
            .bind(id)
            .bind(name)
            .execute(&mut conn)
            .await
            .expect("insert fixture row");
    }

    conn.close().await.expect("close fixture database");
}

/// Reads every row of `items`, ordered by id.
///
/// # Panics
///
/// Panics if the database cannot be opened with `key`.
pub async fn read_rows(path: &Path, key: Option<&DatabaseKey>) -> Vec<Row> {
    let mut conn = crate::SqlCipherEngine::connect(path, key)
        .await
        .expect("open database");

    let rows: Vec<Row> = sqlx::query_as("SELECT id, name FROM items ORDER BY id")
        .fetch_all(&mut conn)
        .await
        .expect("read items");

    conn.close().await.expect("close database");
    rows
}

/// Flips the first kilobyte of `path` so no key can open it any more.
///
/// # Panics
///
/// Panics on I/O errors.
pub async fn corrupt_header(path: &Path) {
    let mut bytes = tokio::fs::read(path).await.expect("read database file");
    for byte in bytes.iter_mut().take(1024) {
        *byte ^= 0xFF;
    }
    tokio::fs::write(path, bytes).await.expect("write database file");
}

/// Overwrites the first occurrence of `needle` in `path` with `replacement`,
/// which must have the same length. Leaves the page structure intact.
///
/// # Panics
///
/// Panics on I/O errors, on a length mismatch, or if `needle` is absent.
pub async fn overwrite_bytes(path: &Path, needle: &[u8], replacement: &[u8]) {
    assert_eq!(needle.len(), replacement.len(), "replacement length");

    let mut bytes = tokio::fs::read(path).await.expect("read database file");
    let at = bytes
        .windows(needle.len())
        .position(|window| window == needle)
        .expect("needle present in database file");
    bytes[at..at + needle.len()].copy_from_slice(replacement);
    tokio::fs::write(path, bytes).await.expect("write database file");
}
