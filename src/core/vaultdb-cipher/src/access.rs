//! Key/database access checks.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use vaultdb_crypto::DatabaseKey;

use crate::engine::{EncryptedStoreEngine, SqlCipherEngine};
use crate::error::AccessError;
use crate::files::DatabaseFileSet;

/// Tells whether a key opens a database, and if not, why.
#[derive(Clone)]
pub struct AccessChecker {
    engine: Arc<dyn EncryptedStoreEngine>,
}

impl Default for AccessChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl AccessChecker {
    /// Checker over [`SqlCipherEngine`].
    pub fn new() -> Self {
        Self::with_engine(Arc::new(SqlCipherEngine::new()))
    }

    /// Checker over a custom engine.
    pub fn with_engine(engine: Arc<dyn EncryptedStoreEngine>) -> Self {
        Self { engine }
    }

    /// Checks that `key` (absent means plaintext) opens the database at `path`.
    ///
    /// The database is not modified and the connection is always closed.
    pub async fn check_access(
        &self,
        path: &Path,
        key: Option<&DatabaseKey>,
    ) -> Result<(), AccessError> {
        let exists = DatabaseFileSet::new(path)
            .main_exists()
            .await
            .map_err(|e| AccessError::Storage(e.to_string()))?;
        if !exists {
            return Err(AccessError::NotFound);
        }

        let result = self.engine.verify(path, key).await.map_err(AccessError::from);

        debug!(
            path = %path.display(),
            with_key = key.is_some(),
            ok = result.is_ok(),
            "Access check"
        );

        result
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;
    use crate::test_support::{corrupt_header, create_database, rows};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_database() {
        let tmp = TempDir::new().unwrap();
        let result = AccessChecker::new()
            .check_access(&tmp.path().join("missing.db"), None)
            .await;
        assert!(matches!(result, Err(AccessError::NotFound)));
    }

    #[tokio::test]
    async fn test_encrypted_database() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.db");
        let key = DatabaseKey::generate();
        create_database(&path, Some(&key), &rows(&[(1, "a")])).await;

        let checker = AccessChecker::new();
        checker.check_access(&path, Some(&key)).await.unwrap();
        assert!(matches!(
            checker.check_access(&path, None).await,
            Err(AccessError::WrongKey)
        ));
        assert!(matches!(
            checker.check_access(&path, Some(&DatabaseKey::generate())).await,
            Err(AccessError::WrongKey)
        ));
    }

    #[tokio::test]
    async fn test_plaintext_database() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.db");
        create_database(&path, None, &rows(&[(1, "a")])).await;

        let checker = AccessChecker::new();
        checker.check_access(&path, None).await.unwrap();
        assert!(matches!(
            checker.check_access(&path, Some(&DatabaseKey::generate())).await,
            Err(AccessError::WrongKey)
        ));
    }

    #[tokio::test]
    async fn test_check_does_not_modify_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.db");
        let key = DatabaseKey::generate();
        create_database(&path, Some(&key), &rows(&[(1, "a")])).await;
        let before = tokio::fs::read(&path).await.unwrap();

        let checker = AccessChecker::new();
        checker.check_access(&path, Some(&key)).await.unwrap();
        let _ = checker.check_access(&path, None).await;

        assert_eq!(tokio::fs::read(&path).await.unwrap(), before);
    }

    #[tokio::test]
    async fn test_damaged_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("vault.db");
        let key = DatabaseKey::generate();
        create_database(&path, Some(&key), &rows(&[(1, "a")])).await;
        corrupt_header(&path).await;

        let result = AccessChecker::new().check_access(&path, Some(&key)).await;
        assert!(matches!(result, Err(AccessError::WrongKey)));
    }
}
