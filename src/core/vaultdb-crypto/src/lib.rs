//! # vaultdb Crypto
//!
//! Key material for the vaultdb database encryption engine.
//!
//! This crate provides:
//! - [`DatabaseKey`], the 256-bit key protecting a whole database file
//! - Secure random generation backed by the operating system CSPRNG
//!
//! Item and field level cryptography is out of scope; the database key is
//! only ever handed to the SQLCipher page codec.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod keys;
pub mod random;

pub use error::CryptoError;
pub use keys::{same_key, DatabaseKey, KEY_SIZE};
