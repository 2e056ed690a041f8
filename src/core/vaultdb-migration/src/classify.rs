//! Error classification helpers.

use std::error::Error;

use vaultdb_cipher::error::codes;
use vaultdb_cipher::{sqlite_code, AccessError, ConversionError, EngineError};

use crate::error::MigrationError;

/// Whether `error`, or anything in its source chain, says the database did
/// not open because the key was missing or wrong (SQLite `NOTADB`).
pub fn is_missing_database_key_error(error: &(dyn Error + 'static)) -> bool {
    let mut current = Some(error);
    while let Some(err) = current {
        if is_wrong_key(err) {
            return true;
        }
        current = err.source();
    }
    false
}

fn is_wrong_key(err: &(dyn Error + 'static)) -> bool {
    if let Some(e) = err.downcast_ref::<AccessError>() {
        return matches!(e, AccessError::WrongKey);
    }
    if let Some(e) = err.downcast_ref::<MigrationError>() {
        return matches!(
            e,
            MigrationError::Access(AccessError::WrongKey)
                | MigrationError::Conversion(ConversionError::Failed(EngineError::NotADatabase))
        );
    }
    if let Some(e) = err.downcast_ref::<ConversionError>() {
        return matches!(e, ConversionError::Failed(EngineError::NotADatabase));
    }
    if let Some(e) = err.downcast_ref::<EngineError>() {
        return matches!(e, EngineError::NotADatabase);
    }
    if let Some(e) = err.downcast_ref::<sqlx::Error>() {
        return sqlite_code(e) == Some(codes::NOTADB);
    }
    false
}
