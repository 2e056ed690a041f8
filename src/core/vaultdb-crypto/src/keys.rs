//! Database key type with automatic memory zeroization.
//!
//! [`DatabaseKey`] implements `Zeroize` and `ZeroizeOnDrop` so the key bytes
//! are erased from memory as soon as the last copy goes away.

use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::CryptoError;
use crate::random::generate_key;

/// Size of a database key in bytes.
pub const KEY_SIZE: usize = 32;

/// A 256-bit key protecting an entire database file.
///
/// The type deliberately has no `PartialEq`: keys are only compared through
/// [`DatabaseKey::ct_eq`], which runs in constant time.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DatabaseKey {
    bytes: [u8; KEY_SIZE],
}

impl DatabaseKey {
    /// Generates a new random database key.
    ///
    /// The key is not persisted anywhere.
    pub fn generate() -> Self {
        let key = generate_key();
        Self { bytes: *key }
    }

    /// Creates a database key from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not exactly 32 bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != KEY_SIZE {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_SIZE,
                bytes.len()
            )));
        }

        let mut key_bytes = [0u8; KEY_SIZE];
        key_bytes.copy_from_slice(bytes);

        Ok(Self { bytes: key_bytes })
    }

    /// Parses a key from its 64-character hex form.
    pub fn from_hex(hex_key: &str) -> Result<Self, CryptoError> {
        let raw = Zeroizing::new(
            hex::decode(hex_key.trim()).map_err(|e| CryptoError::InvalidHex(e.to_string()))?,
        );
        Self::from_bytes(&raw)
    }

    /// Returns the raw key bytes.
    ///
    /// Use with caution - the returned slice is not zeroized automatically.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Lowercase hex form of the key.
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.bytes))
    }

    /// Raw-key literal understood by SQLCipher: `"x'<64 hex chars>'"`.
    ///
    /// The surrounding double quotes make the literal usable both in
    /// `PRAGMA key = ...` and in `ATTACH DATABASE ... KEY ...`.
    pub fn to_sqlcipher_literal(&self) -> Zeroizing<String> {
        Zeroizing::new(format!("\"x'{}'\"", hex::encode(self.bytes)))
    }

    /// Constant-time comparison of two keys.
    pub fn ct_eq(&self, other: &DatabaseKey) -> bool {
        self.bytes
            .iter()
            .zip(other.bytes.iter())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

impl std::fmt::Debug for DatabaseKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Compares two optional keys; two absent keys are equal.
pub fn same_key(a: Option<&DatabaseKey>, b: Option<&DatabaseKey>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.ct_eq(b),
        _ => false,
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)]
mod tests {
    use super::*;

    #[test]
    fn test_database_key_generate() {
        let key = DatabaseKey::generate();
        assert_eq!(key.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_database_key_from_bytes() {
        let bytes = [0x42u8; KEY_SIZE];
        let key = DatabaseKey::from_bytes(&bytes).unwrap();
        assert_eq!(key.as_bytes(), &bytes);
    }

    #[test]
    fn test_database_key_invalid_length() {
        let bytes = [0u8; 16];
        let result = DatabaseKey::from_bytes(&bytes);
        assert!(matches!(result, Err(CryptoError::InvalidKey(_))));
    }

    #[test]
    fn test_database_key_debug_redacted() {
        let key = DatabaseKey::from_bytes(&[0x42u8; KEY_SIZE]).unwrap();
        let debug_str = format!("{:?}", key);
        assert!(debug_str.contains("[REDACTED]"));
        assert!(!debug_str.contains("42"));
    }

    #[test]
    fn test_hex_roundtrip() {
        let key = DatabaseKey::generate();
        let parsed = DatabaseKey::from_hex(&key.to_hex()).unwrap();
        assert!(key.ct_eq(&parsed));
    }

    #[test]
    fn test_from_hex_rejects_garbage() {
        assert!(matches!(
            DatabaseKey::from_hex("not-hex"),
            Err(CryptoError::InvalidHex(_))
        ));
        assert!(matches!(
            DatabaseKey::from_hex("abcd"),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_sqlcipher_literal_format() {
        let key = DatabaseKey::from_bytes(&[0xABu8; KEY_SIZE]).unwrap();
        let literal = key.to_sqlcipher_literal();
        assert!(literal.starts_with("\"x'"));
        assert!(literal.ends_with("'\""));
        assert_eq!(literal.len(), 2 * KEY_SIZE + 5);
        assert!(literal.contains(&"ab".repeat(KEY_SIZE)));
    }

    #[test]
    fn test_ct_eq() {
        let key = DatabaseKey::generate();
        let copy = key.clone();
        let other = DatabaseKey::generate();
        assert!(key.ct_eq(&copy));
        assert!(!key.ct_eq(&other));
    }

    #[test]
    fn test_same_key() {
        let key = DatabaseKey::generate();
        assert!(same_key(None, None));
        assert!(same_key(Some(&key), Some(&key.clone())));
        assert!(!same_key(Some(&key), None));
        assert!(!same_key(None, Some(&key)));
    }

    #[test]
    fn test_keys_are_unique() {
        let key1 = DatabaseKey::generate();
        let key2 = DatabaseKey::generate();
        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }
}
