//! Cryptographic error types.

use thiserror::Error;

/// Errors that can occur while handling key material.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Invalid key format or size.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Invalid hex encoding.
    #[error("invalid hex: {0}")]
    InvalidHex(String),
}
