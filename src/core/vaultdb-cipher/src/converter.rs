//! Whole-file re-encryption of a database into a new file.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use vaultdb_crypto::{same_key, DatabaseKey};

use crate::engine::{EncryptedStoreEngine, SqlCipherEngine};
use crate::error::ConversionError;
use crate::files::DatabaseFileSet;

/// Produces a copy of a database under a different key.
///
/// The source file set is never written. The destination either ends up
/// holding a complete database or does not exist at all.
#[derive(Clone)]
pub struct CipherFileConverter {
    engine: Arc<dyn EncryptedStoreEngine>,
}

impl Default for CipherFileConverter {
    fn default() -> Self {
        Self::new()
    }
}

impl CipherFileConverter {
    /// Converter over [`SqlCipherEngine`].
    pub fn new() -> Self {
        Self::with_engine(Arc::new(SqlCipherEngine::new()))
    }

    /// Converter over a custom engine.
    pub fn with_engine(engine: Arc<dyn EncryptedStoreEngine>) -> Self {
        Self { engine }
    }

    /// Exports `source_path` (opened with `source_key`) into `dest_path`
    /// keyed with `dest_key`. An absent key means plaintext on that side.
    ///
    /// # Errors
    ///
    /// - [`ConversionError::SameKey`] when both keys are equal
    /// - [`ConversionError::SourceNotFound`] when the source does not exist
    /// - [`ConversionError::Failed`] when the export fails; the destination
    ///   file set has been removed by then
    pub async fn convert(
        &self,
        source_path: &Path,
        source_key: Option<&DatabaseKey>,
        dest_path: &Path,
        dest_key: Option<&DatabaseKey>,
    ) -> Result<(), ConversionError> {
        if same_key(source_key, dest_key) {
            return Err(ConversionError::SameKey);
        }

        let source = DatabaseFileSet::new(source_path);
        if !source.main_exists().await? {
            return Err(ConversionError::SourceNotFound(
                source_path.display().to_string(),
            ));
        }

        let dest = DatabaseFileSet::new(dest_path);
        if dest.any_exists().await? {
            debug!(path = %dest_path.display(), "Removing stale conversion output");
            dest.remove().await?;
        }

        info!(
            source = %source_path.display(),
            dest = %dest_path.display(),
            encrypt = dest_key.is_some(),
            "Converting database"
        );

        let guard = DestinationGuard::new(dest.clone());

        self.engine
            .export(source_path, source_key, dest_path, dest_key)
            .await
            .inspect_err(|e| warn!(error = %e, "Database conversion failed"))?;

        // SQLite may leave a rollback journal behind for the attached file.
        dest.remove_side_files().await?;
        guard.disarm();

        Ok(())
    }
}

/// Deletes the destination file set when dropped, unless disarmed.
///
/// Covers every early return and a dropped conversion future alike.
struct DestinationGuard {
    dest: Option<DatabaseFileSet>,
}

impl DestinationGuard {
    fn new(dest: DatabaseFileSet) -> Self {
        Self { dest: Some(dest) }
    }

    fn disarm(mut self) {
        self.dest = None;
    }
}

impl Drop for DestinationGuard {
    fn drop(&mut self) {
        if let Some(dest) = self.dest.take() {
            debug!(path = %dest.main().display(), "Cleaning up partial conversion output");
            dest.remove_blocking();
        }
    }
}
