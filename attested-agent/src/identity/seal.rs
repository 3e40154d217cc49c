//! Credential sealing at rest.
//!
//! When a sealing key is configured the credential is stored as
//! `sealed:v1:<hex(nonce || ciphertext)>` instead of plaintext.
//!
//! # Algorithms
//!
//! - **Encryption**: ChaCha20-Poly1305 (authenticated encryption)
//! - **Nonce**: 12 random bytes per seal, prepended to the ciphertext
//!
//! Values without the prefix are treated as plaintext credentials, so a store
//! written before sealing was enabled keeps working.

use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

use super::Credential;

// =============================================================================
// Constants
// =============================================================================

/// Nonce length for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_LEN: usize = 12;

/// Sealing key length (32 bytes)
pub const KEY_LEN: usize = 32;

/// ChaCha20-Poly1305 auth tag length (16 bytes)
pub const AUTH_TAG_LEN: usize = 16;

const SEALED_PREFIX: &str = "sealed:v1:";

#[derive(Error, Debug)]
pub enum SealError {
    #[error("Invalid sealing key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    Encrypt,

    #[error("Failed to unseal credential (wrong key?)")]
    Decrypt,

    #[error("Credential is sealed but no sealing key is configured")]
    KeyRequired,

    #[error("Malformed sealed credential: {0}")]
    Malformed(String),
}

/// 256-bit key used to seal the credential. Zeroed on drop.
#[derive(Clone)]
pub struct SealingKey(Zeroizing<[u8; KEY_LEN]>);

impl SealingKey {
    pub fn from_hex(value: &str) -> Result<Self, SealError> {
        let bytes = Zeroizing::new(
            hex::decode(value.trim()).map_err(|e| SealError::InvalidKey(e.to_string()))?,
        );
        if bytes.len() != KEY_LEN {
            return Err(SealError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LEN,
                bytes.len()
            )));
        }
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        key.copy_from_slice(&bytes);
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.0.as_slice()))
    }
}

impl std::fmt::Debug for SealingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SealingKey(<redacted>)")
    }
}

/// Encrypt a credential for storage.
pub fn seal(credential: &Credential, key: &SealingKey) -> Result<String, SealError> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);

    let ciphertext = key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), credential.expose().as_bytes())
        .map_err(|_| SealError::Encrypt)?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);
    Ok(format!("{}{}", SEALED_PREFIX, hex::encode(blob)))
}

/// Recover a credential from its stored form.
pub fn unseal(stored: &str, key: Option<&SealingKey>) -> Result<Credential, SealError> {
    let Some(encoded) = stored.strip_prefix(SEALED_PREFIX) else {
        return Ok(Credential::new(stored));
    };
    let key = key.ok_or(SealError::KeyRequired)?;

    let blob = hex::decode(encoded).map_err(|e| SealError::Malformed(e.to_string()))?;
    if blob.len() < NONCE_LEN + AUTH_TAG_LEN {
        return Err(SealError::Malformed(format!(
            "expected at least {} bytes, got {}",
            NONCE_LEN + AUTH_TAG_LEN,
            blob.len()
        )));
    }
    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);

    let plaintext = Zeroizing::new(
        key.cipher()
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| SealError::Decrypt)?,
    );
    let value = std::str::from_utf8(&plaintext)
        .map_err(|_| SealError::Malformed("credential is not UTF-8".into()))?;
    Ok(Credential::new(value))
}

pub fn is_sealed(stored: &str) -> bool {
    stored.starts_with(SEALED_PREFIX)
}
