//! Integration tests for vaultdb.
//!
//! These tests drive the key store, the converter and the migration manager
//! together against real SQLCipher files, including simulated restarts.

// Allow unwrap() in tests - panics are acceptable for test assertions
#![allow(clippy::disallowed_methods)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use tempfile::TempDir;

use vaultdb_cipher::test_support::{create_database, read_rows, Row};
use vaultdb_cipher::DatabaseFileSet;
use vaultdb_crypto::DatabaseKey;
use vaultdb_keystore::KeyStore;
use vaultdb_migration::{
    DatabaseConfig, DatabaseEncryptionManager, EncryptionSetup, MigrationProgress, MigrationState,
};
use vaultdb_storage_sqlite::SqliteBackend;

// ============================================================================
// Test Vault
// ============================================================================

/// A data directory with a persistent key store, a manager and a setup flow.
pub struct TestVault {
    data_dir: TempDir,
    pub keys: KeyStore<SqliteBackend>,
    pub manager: DatabaseEncryptionManager,
    pub setup: EncryptionSetup,
}

impl TestVault {
    /// Opens a vault over a fresh temporary directory.
    pub async fn new() -> Result<Self> {
        let data_dir = TempDir::new().context("Failed to create temp dir")?;
        Self::open(data_dir).await
    }

    async fn open(data_dir: TempDir) -> Result<Self> {
        let keys = KeyStore::open(data_dir.path())
            .await
            .context("Failed to open key store")?;
        let repository = Arc::new(keys.clone());

        let manager =
            DatabaseEncryptionManager::new(DatabaseConfig::new(data_dir.path()), repository.clone())
                .context("Failed to create manager")?;
        let setup = EncryptionSetup::new(manager.clone(), repository);

        Ok(Self {
            data_dir,
            keys,
            manager,
            setup,
        })
    }

    /// Closes everything and opens the same directory again, as a process
    /// restart would.
    pub async fn restart(self) -> Result<Self> {
        let Self { data_dir, keys, .. } = self;
        keys.backend().close().await;
        drop(keys);
        Self::open(data_dir).await
    }

    /// Path of the live database.
    pub fn live_path(&self) -> PathBuf {
        self.manager.config().database_path()
    }

    /// File set of the live database.
    pub fn live_set(&self) -> DatabaseFileSet {
        self.manager.config().live_set()
    }

    /// File set of the temp database.
    pub fn temp_set(&self) -> DatabaseFileSet {
        self.manager.config().temp_set()
    }

    /// File set the live database is moved to during a promotion.
    pub fn backup_set(&self) -> DatabaseFileSet {
        self.manager.config().backup_set()
    }

    /// Creates the live database with `items`.
    pub async fn seed(&self, key: Option<&DatabaseKey>, items: &[Row]) {
        create_database(&self.live_path(), key, items).await;
    }

    /// Reads every row of the live database.
    pub async fn rows(&self, key: Option<&DatabaseKey>) -> Vec<Row> {
        read_rows(&self.live_path(), key).await
    }

    /// Runs `finish_migration_if_needed` to completion.
    pub async fn finish(
        &self,
        key: Option<&DatabaseKey>,
        old_key: Option<&DatabaseKey>,
    ) -> Vec<MigrationProgress> {
        self.manager
            .finish_migration_if_needed(key.cloned(), old_key.cloned())
            .collect()
            .await
    }

    /// Whether any temp or backup file is left in the data directory.
    pub async fn has_leftovers(&self) -> Result<bool> {
        Ok(self.temp_set().any_exists().await? || self.backup_set().any_exists().await?)
    }
}

/// States carried by a progress sequence, in order.
pub fn states(events: &[MigrationProgress]) -> Vec<Option<MigrationState>> {
    events.iter().map(MigrationProgress::state).collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use vaultdb_cipher::test_support::{corrupt_header, overwrite_bytes, rows};
    use vaultdb_cipher::{AccessChecker, AccessError};
    use vaultdb_keystore::{DatabaseKeyRepository, KeyStoreError};
    use vaultdb_migration::SetupOutcome;

    const DONE: [Option<MigrationState>; 2] =
        [Some(MigrationState::InProgress), Some(MigrationState::Done)];
    const CANCELED: [Option<MigrationState>; 2] =
        [Some(MigrationState::InProgress), Some(MigrationState::Canceled)];
    const NOOP: [Option<MigrationState>; 1] = [Some(MigrationState::Noop)];

    #[tokio::test]
    async fn test_encrypt_end_to_end() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a")])).await;
        let key = DatabaseKey::generate();

        vault.manager.migrate_to_encrypted(&key).await.unwrap();
        let events = vault.finish(Some(&key), None).await;
        assert_eq!(states(&events), DONE);

        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a")]));
        assert!(matches!(
            vault.manager.check_database_access(None).await,
            Err(AccessError::WrongKey)
        ));
        vault.manager.check_database_access(Some(&key)).await.unwrap();

        let stored = vault.keys.key().await.unwrap().unwrap();
        assert!(stored.ct_eq(&key));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_round_trip_through_encryption() {
        let vault = TestVault::new().await.unwrap();
        let original = rows(&[(1, "alpha"), (2, "beta"), (3, "gamma")]);
        vault.seed(None, &original).await;
        let key = DatabaseKey::generate();

        vault.manager.migrate_to_encrypted(&key).await.unwrap();
        assert_eq!(states(&vault.finish(Some(&key), None).await), DONE);
        assert_eq!(states(&vault.finish(Some(&key), None).await), NOOP);
        assert_eq!(vault.rows(Some(&key)).await, original);

        vault.manager.migrate_to_plain(&key).await.unwrap();
        assert_eq!(states(&vault.finish(None, Some(&key)).await), DONE);
        assert_eq!(states(&vault.finish(None, Some(&key)).await), NOOP);
        assert_eq!(vault.rows(None).await, original);

        assert!(vault.keys.key().await.unwrap().is_none());
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_noop_leaves_everything_untouched() {
        let vault = TestVault::new().await.unwrap();
        let key = DatabaseKey::generate();
        vault.seed(Some(&key), &rows(&[(1, "a")])).await;
        vault.keys.set_key(&key, false).await.unwrap();

        let before = tokio::fs::read(vault.live_path()).await.unwrap();

        for _ in 0..3 {
            let events = vault.finish(Some(&key), None).await;
            assert_eq!(states(&events), NOOP);
        }

        assert_eq!(tokio::fs::read(vault.live_path()).await.unwrap(), before);
        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&key));
        assert!(vault.keys.backup_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupted_temp_cancels_encryption() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a")])).await;
        let before = tokio::fs::read(vault.live_path()).await.unwrap();
        let key = DatabaseKey::generate();

        vault.manager.migrate_to_encrypted(&key).await.unwrap();
        corrupt_header(vault.temp_set().main()).await;

        let events = vault.finish(Some(&key), None).await;
        assert_eq!(states(&events), CANCELED);

        assert_eq!(tokio::fs::read(vault.live_path()).await.unwrap(), before);
        assert_eq!(vault.rows(None).await, rows(&[(1, "a")]));
        assert!(vault.keys.key().await.unwrap().is_none());
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_edited_row_in_temp_cancels_decryption() {
        let vault = TestVault::new().await.unwrap();
        let key = DatabaseKey::generate();
        let name = "a".repeat(200);
        vault.seed(Some(&key), &rows(&[(1, name.as_str())])).await;
        vault.keys.set_key(&key, false).await.unwrap();

        vault.manager.migrate_to_plain(&key).await.unwrap();
        overwrite_bytes(vault.temp_set().main(), &[b'a'; 50], &[b'z'; 50]).await;
        AccessChecker::new()
            .check_access(vault.temp_set().main(), None)
            .await
            .unwrap();

        let events = vault.finish(None, Some(&key)).await;
        assert_eq!(states(&events), CANCELED);

        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, name.as_str())]));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupted_temp_cancels_decryption() {
        let vault = TestVault::new().await.unwrap();
        let key = DatabaseKey::generate();
        vault.seed(Some(&key), &rows(&[(1, "a")])).await;
        vault.keys.set_key(&key, false).await.unwrap();

        vault.manager.migrate_to_plain(&key).await.unwrap();
        corrupt_header(vault.temp_set().main()).await;

        let events = vault.finish(None, Some(&key)).await;
        assert_eq!(states(&events), CANCELED);

        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a")]));
        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&key));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_access_classification() {
        let tmp = TempDir::new().unwrap();
        let checker = AccessChecker::new();
        let key = DatabaseKey::generate();

        let missing = tmp.path().join("missing.db");
        assert!(matches!(
            checker.check_access(&missing, None).await,
            Err(AccessError::NotFound)
        ));
        assert!(matches!(
            checker.check_access(&missing, Some(&key)).await,
            Err(AccessError::NotFound)
        ));

        let encrypted = tmp.path().join("encrypted.db");
        create_database(&encrypted, Some(&key), &rows(&[(1, "a")])).await;
        assert!(matches!(
            checker
                .check_access(&encrypted, Some(&DatabaseKey::generate()))
                .await,
            Err(AccessError::WrongKey)
        ));
        assert!(matches!(
            checker.check_access(&encrypted, None).await,
            Err(AccessError::WrongKey)
        ));
        checker.check_access(&encrypted, Some(&key)).await.unwrap();

        let plain = tmp.path().join("plain.db");
        create_database(&plain, None, &rows(&[(1, "a")])).await;
        checker.check_access(&plain, None).await.unwrap();
        assert!(matches!(
            checker.check_access(&plain, Some(&key)).await,
            Err(AccessError::WrongKey)
        ));
    }

    #[tokio::test]
    async fn test_missing_key_error_is_recognized() {
        let vault = TestVault::new().await.unwrap();
        let key = DatabaseKey::generate();
        vault.seed(Some(&key), &rows(&[(1, "a")])).await;

        let err = vault.manager.check_database_access(None).await.unwrap_err();
        assert!(vault.manager.is_missing_database_key_error(&err));

        let err = vault
            .manager
            .migrate_to_plain(&DatabaseKey::generate())
            .await
            .unwrap_err();
        assert!(vault.manager.is_missing_database_key_error(&err));
    }

    #[tokio::test]
    async fn test_key_slots_survive_restart() {
        let vault = TestVault::new().await.unwrap();
        let k1 = DatabaseKey::generate();
        let k2 = DatabaseKey::generate();

        vault.keys.set_key(&k1, false).await.unwrap();
        assert!(matches!(
            vault.keys.set_key(&k2, false).await,
            Err(KeyStoreError::KeyAlreadySet)
        ));
        vault.keys.copy_key_to_backup_key().await.unwrap();
        vault.keys.set_key(&k2, true).await.unwrap();

        let vault = vault.restart().await.unwrap();
        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&k2));
        assert!(vault.keys.backup_key().await.unwrap().unwrap().ct_eq(&k1));

        vault.keys.remove_key().await.unwrap();
        assert!(vault.keys.key().await.unwrap().is_none());
        assert!(vault.keys.backup_key().await.unwrap().unwrap().ct_eq(&k1));

        vault.keys.remove_backup_key().await.unwrap();
        let vault = vault.restart().await.unwrap();
        assert!(vault.keys.key().await.unwrap().is_none());
        assert!(vault.keys.backup_key().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_restart_after_completed_swap_commits() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a")])).await;
        let key = DatabaseKey::generate();
        vault.manager.migrate_to_encrypted(&key).await.unwrap();

        // Crash right after both renames, before the key was committed.
        vault.live_set().rename_to(&vault.backup_set()).await.unwrap();
        vault.temp_set().rename_to(&vault.live_set()).await.unwrap();

        let vault = vault.restart().await.unwrap();
        let events = vault.finish(Some(&key), None).await;
        assert_eq!(states(&events), DONE);

        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a")]));
        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&key));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_restart_after_half_swap_recovers_and_promotes() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a"), (2, "b")])).await;
        let key = DatabaseKey::generate();
        vault.manager.migrate_to_encrypted(&key).await.unwrap();

        // Crash after the live set moved aside, before the temp set moved in.
        vault.live_set().rename_to(&vault.backup_set()).await.unwrap();
        assert!(!vault.live_set().main_exists().await.unwrap());

        let vault = vault.restart().await.unwrap();
        let events = vault.finish(Some(&key), None).await;
        assert_eq!(states(&events), DONE);

        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a"), (2, "b")]));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_database_migrates() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &[]).await;
        let key = DatabaseKey::generate();

        vault.manager.migrate_to_encrypted(&key).await.unwrap();
        assert_eq!(states(&vault.finish(Some(&key), None).await), DONE);

        assert!(vault.rows(Some(&key)).await.is_empty());
    }

    #[tokio::test]
    async fn test_setup_survives_restart_between_start_and_finish() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a")])).await;
        let key = DatabaseKey::generate();

        vault.setup.start(Some(key.clone())).await.unwrap();
        assert!(vault.temp_set().main_exists().await.unwrap());

        let vault = vault.restart().await.unwrap();
        assert_eq!(vault.setup.finish().await.unwrap(), SetupOutcome::Success);

        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&key));
        assert!(vault.keys.backup_key().await.unwrap().is_none());
        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a")]));

        vault.setup.start(None).await.unwrap();
        assert_eq!(vault.setup.finish().await.unwrap(), SetupOutcome::Success);
        assert!(vault.keys.key().await.unwrap().is_none());
        assert_eq!(vault.rows(None).await, rows(&[(1, "a")]));
    }

    #[tokio::test]
    async fn test_setup_rekey() {
        let vault = TestVault::new().await.unwrap();
        vault.seed(None, &rows(&[(1, "a")])).await;
        let k1 = DatabaseKey::generate();
        let k2 = DatabaseKey::generate();

        vault.setup.start(Some(k1.clone())).await.unwrap();
        assert_eq!(vault.setup.finish().await.unwrap(), SetupOutcome::Success);

        vault.setup.start(Some(k2.clone())).await.unwrap();
        assert_eq!(vault.setup.finish().await.unwrap(), SetupOutcome::Success);

        assert_eq!(vault.rows(Some(&k2)).await, rows(&[(1, "a")]));
        assert!(matches!(
            vault.manager.check_database_access(Some(&k1)).await,
            Err(AccessError::WrongKey)
        ));
        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&k2));
    }

    #[tokio::test]
    async fn test_setup_canceled_restores_previous_key() {
        let vault = TestVault::new().await.unwrap();
        let key = DatabaseKey::generate();
        vault.seed(Some(&key), &rows(&[(1, "a")])).await;
        vault.keys.set_key(&key, false).await.unwrap();

        vault.setup.start(None).await.unwrap();
        assert!(vault.keys.key().await.unwrap().is_none());
        corrupt_header(vault.temp_set().main()).await;

        assert_eq!(vault.setup.finish().await.unwrap(), SetupOutcome::Canceled);

        assert!(vault.keys.key().await.unwrap().unwrap().ct_eq(&key));
        assert!(vault.keys.backup_key().await.unwrap().is_none());
        assert_eq!(vault.rows(Some(&key)).await, rows(&[(1, "a")]));
        assert!(!vault.has_leftovers().await.unwrap());
    }

    // ========================================================================
    // Property tests
    // ========================================================================

    fn items_strategy() -> impl Strategy<Value = Vec<Row>> {
        prop::collection::btree_map(any::<i64>(), "[a-zA-Z0-9 ]{0,32}", 0..16)
            .prop_map(|items| items.into_iter().collect())
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(12))]

        /// Property: plain -> encrypted -> plain keeps every row.
        #[test]
        fn prop_round_trip_preserves_rows(items in items_strategy()) {
            let runtime = tokio::runtime::Runtime::new().unwrap();
            let (encrypted, decrypted) = runtime.block_on(async {
                let vault = TestVault::new().await.unwrap();
                vault.seed(None, &items).await;
                let key = DatabaseKey::generate();

                vault.manager.migrate_to_encrypted(&key).await.unwrap();
                vault.finish(Some(&key), None).await;
                let encrypted = vault.rows(Some(&key)).await;

                vault.manager.migrate_to_plain(&key).await.unwrap();
                vault.finish(None, Some(&key)).await;
                (encrypted, vault.rows(None).await)
            });

            prop_assert_eq!(&encrypted, &items);
            prop_assert_eq!(&decrypted, &items);
        }
    }
}
