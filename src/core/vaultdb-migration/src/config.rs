//! Database location configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use vaultdb_cipher::files::SIDE_SUFFIXES;
use vaultdb_cipher::DatabaseFileSet;

use crate::checksum::TempChecksum;
use crate::error::MigrationError;

/// Default file name of the live database.
pub const DEFAULT_DATABASE_NAME: &str = "vault.db";

/// Default file name of the scratch database built by a migration.
pub const DEFAULT_TEMP_DATABASE_NAME: &str = "vault_cipher_temp.db";

/// Suffix of the file set the live database is moved to during a promotion.
pub const BACKUP_SUFFIX: &str = ".backup";

/// Suffix of the digest file recorded next to the temp database.
pub const CHECKSUM_SUFFIX: &str = "-sha256";

/// Where the live and temp databases live.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Directory holding every database file.
    pub data_dir: PathBuf,

    /// File name of the live database.
    #[serde(default = "default_database_name")]
    pub database_name: String,

    /// File name of the temp database.
    #[serde(default = "default_temp_database_name")]
    pub temp_database_name: String,
}

fn default_database_name() -> String {
    DEFAULT_DATABASE_NAME.to_string()
}

fn default_temp_database_name() -> String {
    DEFAULT_TEMP_DATABASE_NAME.to_string()
}

impl DatabaseConfig {
    /// Config with default file names under `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            database_name: default_database_name(),
            temp_database_name: default_temp_database_name(),
        }
    }

    /// Validates the file names.
    ///
    /// Only allows: ASCII letters, digits, underscore, hyphen, dot. The two
    /// names must differ and neither may be `.` or `..`.
    pub fn validate(&self) -> Result<(), MigrationError> {
        Self::validate_name("database_name", &self.database_name)?;
        Self::validate_name("temp_database_name", &self.temp_database_name)?;

        if self.database_name == self.temp_database_name {
            return Err(MigrationError::InvalidConfig(
                "database and temp database names must differ".into(),
            ));
        }

        let backup = format!("{}{BACKUP_SUFFIX}", self.database_name);
        let mut live_files = sibling_names(&self.database_name, &SIDE_SUFFIXES)
            .chain(sibling_names(&backup, &SIDE_SUFFIXES))
            .chain([backup.clone()]);
        if live_files.any(|name| name == self.temp_database_name) {
            return Err(MigrationError::InvalidConfig(
                "temp database name collides with a file of the live database".into(),
            ));
        }

        let mut temp_files = sibling_names(&self.temp_database_name, &SIDE_SUFFIXES)
            .chain(sibling_names(&self.temp_database_name, &[CHECKSUM_SUFFIX]));
        if temp_files.any(|name| name == self.database_name) {
            return Err(MigrationError::InvalidConfig(
                "database name collides with a file of the temp database".into(),
            ));
        }

        Ok(())
    }

    fn validate_name(field: &str, name: &str) -> Result<(), MigrationError> {
        if name.is_empty() {
            return Err(MigrationError::InvalidConfig(format!(
                "{field} cannot be empty"
            )));
        }

        if name.len() > 64 {
            return Err(MigrationError::InvalidConfig(format!("{field} too long")));
        }

        let valid = name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.');

        if !valid || name == "." || name == ".." {
            return Err(MigrationError::InvalidConfig(format!(
                "{field} must match [A-Za-z0-9_.-]+"
            )));
        }

        Ok(())
    }

    /// Path of the live database.
    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join(&self.database_name)
    }

    /// Path of the temp database.
    pub fn temp_database_path(&self) -> PathBuf {
        self.data_dir.join(&self.temp_database_name)
    }

    /// Directory holding the databases.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    /// File set of the live database.
    pub fn live_set(&self) -> DatabaseFileSet {
        DatabaseFileSet::new(self.database_path())
    }

    /// File set of the temp database.
    pub fn temp_set(&self) -> DatabaseFileSet {
        DatabaseFileSet::new(self.temp_database_path())
    }

    /// File set the live database is moved to while a promotion runs.
    pub fn backup_set(&self) -> DatabaseFileSet {
        self.live_set().with_suffix(BACKUP_SUFFIX)
    }

    pub(crate) fn temp_checksum(&self) -> TempChecksum {
        TempChecksum::new(&self.temp_database_path(), CHECKSUM_SUFFIX)
    }
}

fn sibling_names<'a>(name: &'a str, suffixes: &'a [&'a str]) -> impl Iterator<Item = String> + 'a {
    suffixes.iter().map(move |suffix| format!("{name}{suffix}"))
}
