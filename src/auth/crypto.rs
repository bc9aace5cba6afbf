//! Hashing and field encryption
//!
//! - SHA-256 digests for refresh tokens and national IDs (lookup/uniqueness)
//! - AES-256-GCM sealing for values that must be recoverable for audit
//!   (national ID, KYC storage references)

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;

const KEY_LENGTH: usize = 32;
const NONCE_LENGTH: usize = 12;

/// Errors that can occur while sealing or opening sensitive fields
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Encryption failed")]
    EncryptFailed,

    #[error("Decryption failed")]
    DecryptFailed,

    #[error("Invalid sealed value format")]
    InvalidFormat,
}

/// Hash a token for storage
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// One-way hash of a national ID, used for the uniqueness index
pub fn hash_national_id(national_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(national_id.trim().as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare two secrets without short-circuiting on the first mismatch
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// AES-256-GCM sealing for sensitive string fields.
///
/// Sealed format is `hex(nonce):hex(ciphertext || tag)`.
#[derive(Clone)]
pub struct FieldCipher {
    cipher: Aes256Gcm,
}

impl FieldCipher {
    /// Build a cipher from a 64-character hex key
    pub fn from_hex_key(hex_key: &str) -> Result<Self, CryptoError> {
        let key = hex::decode(hex_key.trim())
            .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        if key.len() != KEY_LENGTH {
            return Err(CryptoError::InvalidKey(format!(
                "expected {} bytes, got {}",
                KEY_LENGTH,
                key.len()
            )));
        }
        let cipher =
            Aes256Gcm::new_from_slice(&key).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self { cipher })
    }

    /// Seal a plaintext value
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CryptoError> {
        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        rand::rngs::OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| CryptoError::EncryptFailed)?;

        Ok(format!(
            "{}:{}",
            hex::encode(nonce_bytes),
            hex::encode(ciphertext)
        ))
    }

    /// Open a value produced by [`FieldCipher::encrypt`]
    pub fn decrypt(&self, sealed: &str) -> Result<String, CryptoError> {
        let (nonce_hex, body_hex) = sealed.split_once(':').ok_or(CryptoError::InvalidFormat)?;
        let nonce_bytes = hex::decode(nonce_hex).map_err(|_| CryptoError::InvalidFormat)?;
        if nonce_bytes.len() != NONCE_LENGTH {
            return Err(CryptoError::InvalidFormat);
        }
        let body = hex::decode(body_hex).map_err(|_| CryptoError::InvalidFormat)?;

        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), body.as_ref())
            .map_err(|_| CryptoError::DecryptFailed)?;

        String::from_utf8(plaintext).map_err(|_| CryptoError::DecryptFailed)
    }
}

impl std::fmt::Debug for FieldCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldCipher(..)")
    }
}
