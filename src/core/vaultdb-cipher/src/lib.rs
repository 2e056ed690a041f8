//! # vaultdb Cipher
//!
//! File-level operations on SQLCipher databases.
//!
//! - [`EncryptedStoreEngine`]: open-with-key and export-with-key primitives,
//!   implemented by [`SqlCipherEngine`]
//! - [`CipherFileConverter`]: re-encrypts a database into a new file
//! - [`AccessChecker`]: tells a wrong key apart from a missing or damaged file
//! - [`DatabaseFileSet`]: a database file together with its journal siblings

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod access;
pub mod converter;
pub mod engine;
pub mod error;
pub mod files;

#[cfg(any(test, feature = "test-util"))]
pub mod test_support;

pub use access::AccessChecker;
pub use converter::CipherFileConverter;
pub use engine::{EncryptedStoreEngine, SqlCipherEngine};
pub use error::{sqlite_code, AccessError, ConversionError, EngineError};
pub use files::DatabaseFileSet;
