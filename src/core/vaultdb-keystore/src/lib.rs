//! # vaultdb Key Store
//!
//! Durable, observable storage of the database encryption key.
//!
//! Two independent slots exist per installation:
//! - **Active**: the key protecting the live database (absent means plaintext)
//! - **Backup**: a snapshot of a previous active key, kept while a risky
//!   operation is in flight so it can be rolled back

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod repository;
pub mod store;

pub use error::KeyStoreError;
pub use repository::{DatabaseKeyRepository, KeyStream};
pub use store::{KeyStore, KEYSTORE_NAME};
