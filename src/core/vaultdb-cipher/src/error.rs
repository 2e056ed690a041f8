//! Error types for the cipher layer.

use thiserror::Error;

/// SQLite primary result codes the engine classifies.
pub mod codes {
    /// `SQLITE_CORRUPT`
    pub const CORRUPT: i32 = 11;
    /// `SQLITE_CANTOPEN`
    pub const CANTOPEN: i32 = 14;
    /// `SQLITE_NOTADB`: unreadable header, which is also what a wrong key looks like.
    pub const NOTADB: i32 = 26;
}

/// Errors raised by an [`EncryptedStoreEngine`](crate::EncryptedStoreEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    /// The file is not a database under the given key.
    #[error("file is not a database or the key is wrong")]
    NotADatabase,

    /// The database opened but its pages are damaged.
    #[error("database is corrupted: {0}")]
    Corrupted(String),

    /// The database file could not be opened.
    #[error("unable to open database: {0}")]
    CantOpen(String),

    /// Any other SQLite failure.
    #[error("sqlite error (code {code:?}): {message}")]
    Sqlite {
        /// Primary result code, when SQLite reported one.
        code: Option<i32>,
        /// Error message.
        message: String,
    },

    /// Filesystem error.
    #[error("io error: {0}")]
    Io(String),
}

/// Primary SQLite result code carried by `err`, if any.
pub fn sqlite_code(err: &sqlx::Error) -> Option<i32> {
    match err {
        sqlx::Error::Database(db) => db
            .code()
            .and_then(|code| code.parse::<i32>().ok())
            .map(|code| code & 0xff),
        _ => None,
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(e: sqlx::Error) -> Self {
        match sqlite_code(&e) {
            Some(codes::NOTADB) => EngineError::NotADatabase,
            Some(codes::CORRUPT) => EngineError::Corrupted(e.to_string()),
            Some(codes::CANTOPEN) => EngineError::CantOpen(e.to_string()),
            code => match e {
                sqlx::Error::Io(io) => EngineError::Io(io.to_string()),
                other => EngineError::Sqlite {
                    code,
                    message: other.to_string(),
                },
            },
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

/// Outcome of an access check that did not succeed.
#[derive(Debug, Error)]
pub enum AccessError {
    /// The key does not open the database.
    #[error("wrong database key")]
    WrongKey,

    /// No database file exists at the path.
    #[error("database not found")]
    NotFound,

    /// The database opened but failed its integrity check.
    #[error("database corrupted: {0}")]
    Corrupted(String),

    /// Any other storage failure. Not retried.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<EngineError> for AccessError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::NotADatabase => AccessError::WrongKey,
            EngineError::Corrupted(msg) => AccessError::Corrupted(msg),
            EngineError::CantOpen(_) => AccessError::NotFound,
            other => AccessError::Storage(other.to_string()),
        }
    }
}

/// Errors raised while converting a database file.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Source and destination keys are identical; nothing to convert.
    #[error("source and destination keys are identical")]
    SameKey,

    /// The source database does not exist.
    #[error("source database not found: {0}")]
    SourceNotFound(String),

    /// Export failed; the destination has been removed.
    #[error("conversion failed: {0}")]
    Failed(#[from] EngineError),

    /// Filesystem error while preparing or cleaning the destination.
    #[error("io error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ConversionError {
    fn from(e: std::io::Error) -> Self {
        ConversionError::Io(e.to_string())
    }
}
