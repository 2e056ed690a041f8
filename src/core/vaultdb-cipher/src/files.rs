//! Database file sets: a main file plus its journal siblings.
//!
//! SQLite keeps state next to the main file (`-wal`, `-shm`, `-journal`).
//! Moving or deleting a database means moving or deleting all of them
//! together, and the main file always goes last: a crash part-way leaves the
//! main file where it was, which is what recovery keys off.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Suffixes of the files SQLite may keep next to a database.
pub const SIDE_SUFFIXES: [&str; 3] = ["-wal", "-shm", "-journal"];

/// A database main file and its siblings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseFileSet {
    main: PathBuf,
}

impl DatabaseFileSet {
    /// File set rooted at `main`.
    pub fn new(main: impl Into<PathBuf>) -> Self {
        Self { main: main.into() }
    }

    /// Path of the main database file.
    pub fn main(&self) -> &Path {
        &self.main
    }

    /// Paths of the sibling files, in [`SIDE_SUFFIXES`] order.
    pub fn side_files(&self) -> Vec<PathBuf> {
        SIDE_SUFFIXES
            .iter()
            .map(|suffix| append(&self.main, suffix))
            .collect()
    }

    /// Every path of the set, main file last.
    pub fn all_files(&self) -> Vec<PathBuf> {
        let mut files = self.side_files();
        files.push(self.main.clone());
        files
    }

    /// Sibling set whose main file is `<main><suffix>`.
    pub fn with_suffix(&self, suffix: &str) -> Self {
        Self::new(append(&self.main, suffix))
    }

    /// Whether the main file exists.
    pub async fn main_exists(&self) -> std::io::Result<bool> {
        tokio::fs::try_exists(&self.main).await
    }

    /// Whether any file of the set exists.
    pub async fn any_exists(&self) -> std::io::Result<bool> {
        for path in self.all_files() {
            if tokio::fs::try_exists(&path).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Deletes every file of the set, main file last. Missing files are skipped.
    pub async fn remove(&self) -> std::io::Result<()> {
        for path in self.all_files() {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    /// Deletes the siblings only, leaving the main file alone.
    pub async fn remove_side_files(&self) -> std::io::Result<()> {
        for path in self.side_files() {
            remove_if_exists(&path).await?;
        }
        Ok(())
    }

    /// Moves this set over `dest` using `rename`.
    ///
    /// Side files move first. A side file absent here is deleted at `dest`
    /// so a stale journal can never be replayed against the new main file.
    /// The main file is renamed last. Fails with `NotFound` before touching
    /// anything if this set has no main file.
    pub async fn rename_to(&self, dest: &DatabaseFileSet) -> std::io::Result<()> {
        if !self.main_exists().await? {
            return Err(std::io::Error::new(
                ErrorKind::NotFound,
                format!("{} does not exist", self.main.display()),
            ));
        }

        for (from, to) in self.side_files().into_iter().zip(dest.side_files()) {
            if tokio::fs::try_exists(&from).await? {
                tokio::fs::rename(&from, &to).await?;
            } else {
                remove_if_exists(&to).await?;
            }
        }

        tokio::fs::rename(&self.main, &dest.main).await?;

        debug!(
            from = %self.main.display(),
            to = %dest.main.display(),
            "Database file set moved"
        );

        Ok(())
    }

    /// Moves whatever part of this set exists back over `dest`.
    ///
    /// Undoes a [`rename_to`](Self::rename_to) that may have stopped
    /// part-way. Side files present here are moved; when the main file is
    /// present, siblings missing here are deleted at `dest`. The main file
    /// is renamed last. Returns whether a main file was moved.
    pub async fn restore_to(&self, dest: &DatabaseFileSet) -> std::io::Result<bool> {
        let has_main = self.main_exists().await?;

        for (from, to) in self.side_files().into_iter().zip(dest.side_files()) {
            if tokio::fs::try_exists(&from).await? {
                tokio::fs::rename(&from, &to).await?;
            } else if has_main {
                remove_if_exists(&to).await?;
            }
        }

        if has_main {
            tokio::fs::rename(&self.main, &dest.main).await?;
        }

        Ok(has_main)
    }

    /// Synchronous removal for use from `Drop`. Errors are ignored.
    pub(crate) fn remove_blocking(&self) {
        for path in self.all_files() {
            let _ = std::fs::remove_file(path);
        }
    }
}

fn append(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

async fn remove_if_exists(path: &Path) -> std::io::Result<()> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
