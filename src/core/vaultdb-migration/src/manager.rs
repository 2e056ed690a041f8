//! Database encryption manager.
//!
//! A migration happens in two steps:
//!
//! 1. `migrate_to_*` builds the temp database under the new key and checks
//!    that it opens. The live database is not touched.
//! 2. `finish_migration_if_needed` validates the temp database and swaps it
//!    in place of the live one, keeping the live file set aside as a backup
//!    until the new database has been verified and the active key updated.
//!
//! The files on disk are the only record of a pending migration: a temp main
//! file means "ready to promote", a backup main file means "a promotion was
//! interrupted". Backup siblings without a backup main file are parts of the
//! live database caught mid-move and go straight back. Step 2 is safe to run
//! at every start-up.

use std::sync::Arc;

use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error, info, warn};

use vaultdb_cipher::{
    AccessChecker, AccessError, CipherFileConverter, DatabaseFileSet, EncryptedStoreEngine,
    SqlCipherEngine,
};
use vaultdb_crypto::{same_key, DatabaseKey};
use vaultdb_keystore::{DatabaseKeyRepository, KeyStoreError};

use crate::classify;
use crate::config::DatabaseConfig;
use crate::error::MigrationError;
use crate::live::LiveConnection;
use crate::state::{MigrationProgress, MigrationState};

/// Stream of progress events: `Loading` (unless nothing is pending), then
/// exactly one terminal event.
pub type ProgressStream = BoxStream<'static, MigrationProgress>;

/// Moves the live database between plaintext and encrypted form.
///
/// Every operation runs in a spawned task, so dropping the returned future
/// or stream never interrupts the work. Migrations on one manager are
/// serialized.
#[derive(Clone)]
pub struct DatabaseEncryptionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: DatabaseConfig,
    keys: Arc<dyn DatabaseKeyRepository>,
    converter: CipherFileConverter,
    checker: AccessChecker,
    live_connection: Mutex<Option<Arc<dyn LiveConnection>>>,
    migration_lock: Mutex<()>,
}

impl DatabaseEncryptionManager {
    /// Creates a manager over the SQLCipher engine.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(
        config: DatabaseConfig,
        keys: Arc<dyn DatabaseKeyRepository>,
    ) -> Result<Self, MigrationError> {
        Self::with_engine(config, keys, Arc::new(SqlCipherEngine::new()))
    }

    /// Creates a manager over a custom engine.
    pub fn with_engine(
        config: DatabaseConfig,
        keys: Arc<dyn DatabaseKeyRepository>,
        engine: Arc<dyn EncryptedStoreEngine>,
    ) -> Result<Self, MigrationError> {
        config.validate()?;

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                keys,
                converter: CipherFileConverter::with_engine(Arc::clone(&engine)),
                checker: AccessChecker::with_engine(engine),
                live_connection: Mutex::new(None),
                migration_lock: Mutex::new(()),
            }),
        })
    }

    /// The database locations.
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Registers the handle the application keeps on the live database.
    ///
    /// It is quiesced and forgotten right before a promotion swaps files.
    pub async fn register_live_connection(&self, connection: Arc<dyn LiveConnection>) {
        *self.inner.live_connection.lock().await = Some(connection);
    }

    /// Builds an encrypted temp copy of the plaintext live database.
    pub async fn migrate_to_encrypted(&self, key: &DatabaseKey) -> Result<(), MigrationError> {
        self.run_migration(None, Some(key.clone())).await
    }

    /// Builds a plaintext temp copy of the live database encrypted with `key`.
    pub async fn migrate_to_plain(&self, key: &DatabaseKey) -> Result<(), MigrationError> {
        self.run_migration(Some(key.clone()), None).await
    }

    /// Builds a temp copy of the live database re-encrypted from `old_key`
    /// to `new_key`.
    pub async fn migrate_to_key(
        &self,
        old_key: &DatabaseKey,
        new_key: &DatabaseKey,
    ) -> Result<(), MigrationError> {
        self.run_migration(Some(old_key.clone()), Some(new_key.clone()))
            .await
    }

    async fn run_migration(
        &self,
        source_key: Option<DatabaseKey>,
        dest_key: Option<DatabaseKey>,
    ) -> Result<(), MigrationError> {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.migrate(source_key, dest_key).await })
            .await
            .map_err(|e| MigrationError::Task(e.to_string()))?
    }

    /// Promotes a pending temp database, if any.
    ///
    /// `key` is the key the temp database was built with, `old_key` the one
    /// protecting the live database (`None` means plaintext). Must run before
    /// the live database is opened for normal use.
    pub fn finish_migration_if_needed(
        &self,
        key: Option<DatabaseKey>,
        old_key: Option<DatabaseKey>,
    ) -> ProgressStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            let _guard = inner.migration_lock.lock().await;
            let outcome = inner.finish(key.as_ref(), old_key.as_ref(), &tx).await;
            let _ = tx.send(outcome);
        });

        stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|event| (event, rx)) })
            .boxed()
    }

    /// Checks `key` against the live database.
    pub async fn check_database_access(
        &self,
        key: Option<&DatabaseKey>,
    ) -> Result<(), AccessError> {
        self.inner
            .checker
            .check_access(&self.inner.config.database_path(), key)
            .await
    }

    /// Whether `error` means the database expects a key that was not given.
    pub fn is_missing_database_key_error(&self, error: &(dyn std::error::Error + 'static)) -> bool {
        classify::is_missing_database_key_error(error)
    }
}

impl Inner {
    async fn migrate(
        &self,
        source_key: Option<DatabaseKey>,
        dest_key: Option<DatabaseKey>,
    ) -> Result<(), MigrationError> {
        let _guard = self.migration_lock.lock().await;

        if self.config.backup_set().main_exists().await? {
            warn!("Refusing to migrate while a promotion is pending");
            return Err(MigrationError::PromotionPending);
        }

        let temp = self.config.temp_database_path();
        let checksum = self.config.temp_checksum();
        checksum.remove().await?;

        self.converter
            .convert(
                &self.config.database_path(),
                source_key.as_ref(),
                &temp,
                dest_key.as_ref(),
            )
            .await?;

        if let Err(e) = self.checker.check_access(&temp, dest_key.as_ref()).await {
            warn!(error = %e, "Temp database does not open with its key");
            self.discard_temp().await;
            return Err(e.into());
        }

        if let Err(e) = checksum.record().await {
            warn!(error = %e, "Failed to record temp database checksum");
            self.discard_temp().await;
            return Err(e);
        }

        info!(encrypted = dest_key.is_some(), "Temp database ready for promotion");

        Ok(())
    }

    async fn finish(
        &self,
        key: Option<&DatabaseKey>,
        old_key: Option<&DatabaseKey>,
        tx: &mpsc::UnboundedSender<MigrationProgress>,
    ) -> MigrationProgress {
        let live = self.config.live_set();
        let temp = self.config.temp_set();
        let backup = self.config.backup_set();

        let (temp_pending, backup_pending, backup_partial) = match inspect(&temp, &backup).await {
            Ok(found) => found,
            Err(e) => {
                error!(error = %e, "Cannot inspect database files");
                return MigrationProgress::Success(MigrationState::Canceled);
            }
        };

        if backup_partial {
            // The live set was caught mid-move: its siblings went ahead of
            // its main file.
            warn!("Live database files found beside the backup path, moving them back");
            if let Err(e) = backup.restore_to(&live).await {
                return restore_failed(e);
            }
        }

        if !temp_pending && !backup_pending {
            // Siblings left by a temp database that never got its main file.
            self.discard_temp().await;
            debug!("No pending migration");
            return MigrationProgress::Success(MigrationState::Noop);
        }

        let _ = tx.send(MigrationProgress::Loading);

        if backup_pending {
            if !temp_pending {
                info!("Resuming interrupted promotion at verification");
                return self.verify_and_commit(key).await;
            }

            warn!("Interrupted promotion found, putting the live database back");
            if let Err(e) = backup.restore_to(&live).await {
                return restore_failed(e);
            }
        }

        info!("Finishing pending database migration");

        if let Err(e) = self.check_preconditions(key, old_key).await {
            warn!(error = %e, "Pending migration canceled");
            self.discard_temp().await;
            return MigrationProgress::Success(MigrationState::Canceled);
        }

        if let Err(e) = self.config.temp_checksum().verify().await {
            warn!(error = %e, "Temp database failed checksum validation");
            self.discard_temp().await;
            return MigrationProgress::Success(MigrationState::Canceled);
        }

        if let Err(e) = self.checker.check_access(temp.main(), key).await {
            warn!(error = %e, "Temp database failed validation");
            self.discard_temp().await;
            return MigrationProgress::Success(MigrationState::Canceled);
        }

        if let Err(e) = self.swap().await {
            error!(error = %e, "Database swap failed");
            return self.roll_back().await;
        }

        self.verify_and_commit(key).await
    }

    /// The keys must describe an actual change, and `old_key` must open the
    /// database that is about to be replaced.
    async fn check_preconditions(
        &self,
        key: Option<&DatabaseKey>,
        old_key: Option<&DatabaseKey>,
    ) -> Result<(), MigrationError> {
        if same_key(key, old_key) {
            return Err(MigrationError::KeyMismatch(
                "new and old keys are identical".into(),
            ));
        }

        self.checker
            .check_access(&self.config.database_path(), old_key)
            .await?;

        Ok(())
    }

    /// Moves live to backup, then temp to live.
    async fn swap(&self) -> Result<(), MigrationError> {
        if let Some(connection) = self.live_connection.lock().await.take() {
            debug!("Quiescing live database connection");
            connection.quiesce().await;
        }

        let live = self.config.live_set();
        live.rename_to(&self.config.backup_set()).await?;
        self.config.temp_set().rename_to(&live).await?;

        debug!("Temp database swapped in");

        Ok(())
    }

    async fn verify_and_commit(&self, key: Option<&DatabaseKey>) -> MigrationProgress {
        if let Err(e) = self
            .checker
            .check_access(&self.config.database_path(), key)
            .await
        {
            warn!(error = %e, "Promoted database failed verification");
            return self.roll_back().await;
        }

        if let Err(e) = self.commit_key(key).await {
            error!(error = %e, "Failed to record the new database key");
            return self.roll_back().await;
        }

        if let Err(e) = self.config.backup_set().remove().await {
            warn!(error = %e, "Failed to delete database backup");
        }
        self.discard_checksum().await;

        info!(encrypted = key.is_some(), "Database migration done");

        MigrationProgress::Success(MigrationState::Done)
    }

    async fn commit_key(&self, key: Option<&DatabaseKey>) -> Result<(), KeyStoreError> {
        match key {
            Some(key) => self.keys.set_key(key, true).await?,
            None => self.keys.remove_key().await?,
        }

        if let Err(e) = self.keys.remove_backup_key().await {
            warn!(error = %e, "Failed to clear backup key");
        }

        Ok(())
    }

    /// Puts the backup set back over live and drops the temp set.
    async fn roll_back(&self) -> MigrationProgress {
        if let Err(e) = self
            .config
            .backup_set()
            .restore_to(&self.config.live_set())
            .await
        {
            return restore_failed(e);
        }

        self.discard_temp().await;
        info!("Pending migration canceled, live database restored");

        MigrationProgress::Success(MigrationState::Canceled)
    }

    async fn discard_temp(&self) {
        if let Err(e) = self.config.temp_set().remove().await {
            warn!(error = %e, "Failed to delete temp database");
        }
        self.discard_checksum().await;
    }

    async fn discard_checksum(&self) {
        let checksum = self.config.temp_checksum();
        if let Err(e) = checksum.remove().await {
            warn!(error = %e, path = %checksum.path().display(), "Failed to delete temp checksum");
        }
    }
}

/// Returns whether the temp main file exists, whether the backup main file
/// exists, and whether backup siblings exist without their main file.
async fn inspect(
    temp: &DatabaseFileSet,
    backup: &DatabaseFileSet,
) -> std::io::Result<(bool, bool, bool)> {
    let temp_pending = temp.main_exists().await?;
    let backup_pending = backup.main_exists().await?;
    let backup_partial = !backup_pending && backup.any_exists().await?;
    Ok((temp_pending, backup_pending, backup_partial))
}

fn restore_failed(e: std::io::Error) -> MigrationProgress {
    error!(error = %e, "Failed to restore database backup");
    MigrationProgress::Failure(MigrationError::RestoreFailed(e.to_string()))
}
