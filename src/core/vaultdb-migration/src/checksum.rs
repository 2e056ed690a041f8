//! Digest of the temp database.
//!
//! Recorded once the temp database has been built and checked, verified
//! before it is promoted. Any byte changed in between cancels the promotion,
//! including changes inside row data that an integrity check cannot see.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::debug;

use crate::error::MigrationError;

const READ_CHUNK: usize = 64 * 1024;

/// The digest file kept next to a temp database.
#[derive(Debug, Clone)]
pub(crate) struct TempChecksum {
    database: PathBuf,
    path: PathBuf,
}

impl TempChecksum {
    /// Digest file `<database><suffix>`.
    pub(crate) fn new(database: &Path, suffix: &str) -> Self {
        let mut path = database.as_os_str().to_owned();
        path.push(suffix);
        Self {
            database: database.to_path_buf(),
            path: PathBuf::from(path),
        }
    }

    /// Path of the digest file.
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Hashes the database and stores the digest.
    pub(crate) async fn record(&self) -> Result<(), MigrationError> {
        let digest = sha256_file(&self.database).await?;
        tokio::fs::write(&self.path, &digest).await?;
        debug!(path = %self.path.display(), "Temp database checksum recorded");
        Ok(())
    }

    /// Checks the database against the stored digest.
    ///
    /// A missing digest counts as a mismatch.
    pub(crate) async fn verify(&self) -> Result<(), MigrationError> {
        let expected = match tokio::fs::read_to_string(&self.path).await {
            Ok(expected) => expected,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(MigrationError::ChecksumMismatch(
                    "no checksum recorded".into(),
                ))
            }
            Err(e) => return Err(e.into()),
        };

        let actual = sha256_file(&self.database).await?;
        if actual != expected.trim() {
            return Err(MigrationError::ChecksumMismatch(format!(
                "{} was modified after it was built",
                self.database.display()
            )));
        }

        Ok(())
    }

    /// Deletes the digest file. Missing is fine.
    pub(crate) async fn remove(&self) -> std::io::Result<()> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

async fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; READ_CHUNK];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
