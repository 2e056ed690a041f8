//! # vaultdb Migration
//!
//! Moves the live database between plaintext and SQLCipher-encrypted form
//! without ever leaving it unrecoverable.
//!
//! - [`DatabaseEncryptionManager`]: builds, validates and promotes the temp
//!   database, with crash recovery driven by the files on disk
//! - [`EncryptionSetup`]: start/finish flow that keeps the key slots in step
//!   with the database
//! - [`DatabaseConfig`]: where the database files live

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod checksum;
pub mod classify;
pub mod config;
pub mod error;
pub mod live;
pub mod manager;
pub mod setup;
pub mod state;

pub use classify::is_missing_database_key_error;
pub use config::DatabaseConfig;
pub use error::MigrationError;
pub use live::LiveConnection;
pub use manager::{DatabaseEncryptionManager, ProgressStream};
pub use setup::{EncryptionSetup, SetupOutcome};
pub use state::{MigrationProgress, MigrationState};
