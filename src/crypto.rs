//! Envelope encryption for secrets held at rest (TOTP shared secrets).
//!
//! A per-user data encryption key is derived from the master key with HKDF,
//! then the secret is sealed with AES-256-GCM.
//!
//! Format of encrypted data: MAGIC (4 bytes) || nonce (12 bytes) || ciphertext

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hkdf::Hkdf;
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::Sha256;
use unicode_normalization::UnicodeNormalization;

use crate::error::{AppError, Result};

/// Nonce size for AES-GCM (96 bits)
const NONCE_SIZE: usize = 12;

/// Master key size (256 bits for AES-256)
const MASTER_KEY_SIZE: usize = 32;

/// Magic bytes to identify encrypted data
const ENCRYPTED_MAGIC: &[u8] = b"ENC1";

/// Holds the master encryption key. Per-user DEKs are derived from it.
#[derive(Clone)]
pub struct MasterKey {
    key: [u8; MASTER_KEY_SIZE],
}

impl MasterKey {
    /// Create a MasterKey from a base64-encoded string.
    /// The decoded key must be exactly 32 bytes.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let decoded = BASE64
            .decode(encoded.trim())
            .map_err(|e| AppError::Internal(format!("Invalid master key encoding: {}", e)))?;

        if decoded.len() != MASTER_KEY_SIZE {
            return Err(AppError::Internal(format!(
                "Master key must be {} bytes, got {}",
                MASTER_KEY_SIZE,
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_SIZE];
        key.copy_from_slice(&decoded);
        Ok(Self { key })
    }

    /// Generate a new random master key, base64-encoded.
    pub fn generate() -> String {
        BASE64.encode(random_bytes::<MASTER_KEY_SIZE>())
    }

    pub fn from_bytes(key: [u8; 32]) -> Self {
        Self { key }
    }

    fn derive_dek(&self, user_id: &str) -> [u8; 32] {
        let hk = Hkdf::<Sha256>::new(Some(b"keyshop-v1"), &self.key);
        let mut dek = [0u8; 32];
        hk.expand(user_id.as_bytes(), &mut dek)
            .expect("HKDF expand should not fail with valid length");
        dek
    }

    /// Encrypt a secret bound to `user_id`.
    pub fn encrypt_secret(&self, user_id: &str, plaintext: &[u8]) -> Result<Vec<u8>> {
        let dek = self.derive_dek(user_id);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| AppError::Internal(format!("Failed to create cipher: {}", e)))?;

        let nonce_bytes = random_bytes::<NONCE_SIZE>();
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| AppError::Internal(format!("Encryption failed: {}", e)))?;

        let mut result = Vec::with_capacity(ENCRYPTED_MAGIC.len() + NONCE_SIZE + ciphertext.len());
        result.extend_from_slice(ENCRYPTED_MAGIC);
        result.extend_from_slice(&nonce_bytes);
        result.extend_from_slice(&ciphertext);

        Ok(result)
    }

    /// Decrypt a secret previously sealed for `user_id`.
    pub fn decrypt_secret(&self, user_id: &str, encrypted: &[u8]) -> Result<Vec<u8>> {
        if encrypted.len() < ENCRYPTED_MAGIC.len() + NONCE_SIZE + 1 {
            return Err(AppError::Internal("Encrypted data too short".into()));
        }

        if &encrypted[..ENCRYPTED_MAGIC.len()] != ENCRYPTED_MAGIC {
            return Err(AppError::Internal(
                "Invalid encrypted data format (missing magic bytes)".into(),
            ));
        }

        let dek = self.derive_dek(user_id);
        let cipher = Aes256Gcm::new_from_slice(&dek)
            .map_err(|e| AppError::Internal(format!("Failed to create cipher: {}", e)))?;

        let nonce_start = ENCRYPTED_MAGIC.len();
        let nonce_end = nonce_start + NONCE_SIZE;
        let nonce = Nonce::from_slice(&encrypted[nonce_start..nonce_end]);
        let ciphertext = &encrypted[nonce_end..];

        cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| AppError::Internal(format!("Decryption failed: {}", e)))
    }
}

/// Fill an array from OS entropy.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Normalize an email for storage and lookup: NFC Unicode form, trimmed, lowercase.
pub fn normalize_email(email: &str) -> String {
    let normalized: String = email.trim().nfc().collect();
    normalized.to_lowercase()
}
