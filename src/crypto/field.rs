//! Authenticated encryption for individual stored string attributes.
//!
//! A protected attribute is persisted as Base64(`nonce ‖ ciphertext ‖ tag`).
//! The key is derived once from `ENCRYPTION_SECRET` and handed to the
//! persistence layer through its constructor.

use base64::{Engine as _, engine::general_purpose::STANDARD};

use crate::crypto::aes::{self, SecureKey};
use crate::error::{AppError, Result};

/// Encrypts and decrypts one attribute value at a time.
#[derive(Clone)]
pub struct FieldCipher {
    key: SecureKey,
}

impl FieldCipher {
    /// Derives the process-wide key from a configured secret.
    pub fn from_secret(secret: &str) -> Result<Self> {
        if secret.is_empty() {
            return Err(AppError::Config("ENCRYPTION_SECRET must not be empty".to_string()));
        }
        Ok(Self {
            key: SecureKey::from_secret(secret.as_bytes()),
        })
    }

    /// Encrypts `plaintext`. Empty input is returned unchanged.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        if plaintext.is_empty() {
            return Ok(String::new());
        }
        let sealed = aes::seal(&self.key, plaintext.as_bytes())?;
        Ok(STANDARD.encode(sealed))
    }

    /// Decrypts a value produced by [`FieldCipher::encrypt`]. Empty input is returned unchanged.
    pub fn decrypt(&self, blob: &str) -> Result<String> {
        if blob.is_empty() {
            return Ok(String::new());
        }
        let sealed = STANDARD
            .decode(blob)
            .map_err(|e| AppError::Encryption(format!("Invalid Base64 ciphertext: {}", e)))?;
        let plaintext = aes::open(&self.key, &sealed)?;
        String::from_utf8(plaintext)
            .map_err(|_| AppError::Encryption("Decrypted value is not valid UTF-8".to_string()))
    }

    /// `None` passes through untouched.
    pub fn encrypt_optional(&self, plaintext: Option<&str>) -> Result<Option<String>> {
        plaintext.map(|value| self.encrypt(value)).transpose()
    }

    pub fn decrypt_optional(&self, blob: Option<&str>) -> Result<Option<String>> {
        blob.map(|value| self.decrypt(value)).transpose()
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldCipher").field("key", &"<redacted>").finish()
    }
}
