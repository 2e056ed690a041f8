//! Turning database encryption on or off from the application's side.
//!
//! [`EncryptionSetup::start`] records the current key in the backup slot,
//! installs the new one and builds the temp database.
//! [`EncryptionSetup::finish`] promotes it, or puts the old key back when
//! the promotion is canceled.

use std::sync::Arc;

use futures::StreamExt;
use tracing::{debug, info, warn};

use vaultdb_cipher::AccessError;
use vaultdb_crypto::{same_key, DatabaseKey};
use vaultdb_keystore::{DatabaseKeyRepository, KeyStoreError};

use crate::error::MigrationError;
use crate::manager::DatabaseEncryptionManager;
use crate::state::{MigrationProgress, MigrationState};

/// Result of [`EncryptionSetup::finish`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetupOutcome {
    /// Nothing was pending.
    Noop,
    /// The database now uses the new key.
    Success,
    /// The change did not happen; the previous key is active again.
    Canceled,
}

/// Start/finish pair driving the manager and the key slots together.
#[derive(Clone)]
pub struct EncryptionSetup {
    manager: DatabaseEncryptionManager,
    keys: Arc<dyn DatabaseKeyRepository>,
}

impl EncryptionSetup {
    /// Creates the setup flow.
    pub fn new(manager: DatabaseEncryptionManager, keys: Arc<dyn DatabaseKeyRepository>) -> Self {
        Self { manager, keys }
    }

    /// Switches the database to `new_key` (`None` means plaintext).
    ///
    /// Leaves a temp database ready for [`finish`](Self::finish) and returns
    /// `true`, or returns `false` without touching anything when the
    /// database already uses `new_key`. If building the temp database fails,
    /// the previous key is restored and the error returned.
    pub async fn start(&self, new_key: Option<DatabaseKey>) -> Result<bool, MigrationError> {
        let old_key = self.keys.key().await?;

        if same_key(old_key.as_ref(), new_key.as_ref()) {
            debug!("Database already in the requested state");
            return Ok(false);
        }

        match &old_key {
            Some(_) => self.keys.copy_key_to_backup_key().await?,
            None => self.keys.remove_backup_key().await?,
        }

        match &new_key {
            Some(key) => self.keys.set_key(key, true).await?,
            None => self.keys.remove_key().await?,
        }

        let migration = match (&old_key, &new_key) {
            (None, Some(new)) => self.manager.migrate_to_encrypted(new).await,
            (Some(old), None) => self.manager.migrate_to_plain(old).await,
            (Some(old), Some(new)) => self.manager.migrate_to_key(old, new).await,
            (None, None) => return Ok(false),
        };

        if let Err(e) = migration {
            warn!(error = %e, "Migration failed, restoring previous key");
            self.restore_previous_key().await?;
            return Err(e);
        }

        info!(encrypt = new_key.is_some(), "Database encryption change started");

        Ok(true)
    }

    /// Completes a change begun by [`start`](Self::start).
    ///
    /// Safe to call when nothing was started. If the active key does not open
    /// the database in that case, the previous key is put back and the
    /// outcome is [`SetupOutcome::Canceled`].
    pub async fn finish(&self) -> Result<SetupOutcome, MigrationError> {
        let key = self.keys.key().await?;
        let old_key = self.keys.backup_key().await?;

        let mut progress = self
            .manager
            .finish_migration_if_needed(key.clone(), old_key);

        let mut terminal = None;
        while let Some(event) = progress.next().await {
            if event.is_terminal() {
                terminal = Some(event);
            }
        }

        match terminal {
            Some(MigrationProgress::Success(MigrationState::Done)) => Ok(SetupOutcome::Success),
            Some(MigrationProgress::Success(MigrationState::Canceled)) => {
                self.restore_previous_key().await?;
                Ok(SetupOutcome::Canceled)
            }
            Some(MigrationProgress::Success(MigrationState::Noop)) => {
                match self.manager.check_database_access(key.as_ref()).await {
                    Err(AccessError::WrongKey) => {
                        warn!("Active key does not open the database, restoring previous key");
                        self.restore_previous_key().await?;
                        Ok(SetupOutcome::Canceled)
                    }
                    _ => Ok(SetupOutcome::Noop),
                }
            }
            Some(MigrationProgress::Failure(e)) => Err(e),
            _ => Err(MigrationError::Task(
                "progress stream ended without a terminal state".into(),
            )),
        }
    }

    /// Backup slot back to active (or active cleared if there is no backup),
    /// then backup cleared.
    async fn restore_previous_key(&self) -> Result<(), KeyStoreError> {
        match self.keys.backup_key().await? {
            Some(previous) => self.keys.set_key(&previous, true).await?,
            None => self.keys.remove_key().await?,
        }
        self.keys.remove_backup_key().await
    }
}
