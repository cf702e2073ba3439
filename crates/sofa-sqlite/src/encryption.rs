//! Encryption credentials
//!
//! The key is an opaque unlock credential. This crate never encrypts anything
//! itself: it hands the key to SQLCipher when the linked SQLite supports it
//! and refuses to open the database otherwise.

use std::fmt;

use crate::error::{SqliteError, SqliteResult};

/// Key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// Raw key material for an encrypted database
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_SIZE]);

impl EncryptionKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters
    pub fn from_hex(hex_key: &str) -> SqliteResult<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| SqliteError::EncryptionKey(format!("Key is not valid hex: {}", e)))?;
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|v: Vec<u8>| {
            SqliteError::EncryptionKey(format!(
                "Key must be {} bytes, got {}",
                KEY_SIZE,
                v.len()
            ))
        })?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// SQLCipher raw-key literal: `"x'<hex>'"`
    pub(crate) fn pragma_literal(&self) -> String {
        format!("\"x'{}'\"", hex::encode(self.0))
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(<redacted>)")
    }
}
