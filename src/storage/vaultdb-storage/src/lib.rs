//! # vaultdb Storage
//!
//! Key-value storage abstraction used to persist database key slots.
//!
//! Provides the [`StorageBackend`] trait and an in-memory implementation.
//! Durable backends live in their own crates.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod error;
pub mod memory;

pub use backend::StorageBackend;
pub use error::StorageError;
pub use memory::MemoryBackend;
