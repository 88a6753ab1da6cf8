//! AES-256-GCM credential boxes.
//!
//! A box wraps one secret under one 256-bit key. Boxes carry their
//! algorithm tag and IV alongside the ciphertext (the GCM tag rides at the
//! end of the ciphertext), so a stash can hold boxes written by older
//! software with different cost parameters. Decryption fails closed: a tag
//! mismatch, an unknown algorithm tag, or malformed base64 all yield
//! `LoginError::Decrypt` and no plaintext.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::{LoginError, LoginResult};

/// Nonce size for AES-256-GCM (12 bytes / 96 bits).
const NONCE_SIZE: usize = 12;

/// Algorithm tag for the only box format this engine writes.
const AES256_GCM_TYPE: &str = "aes256gcm";

/// An encrypted, integrity-protected blob wrapping a secret under a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptedBox {
    /// Algorithm tag; only `"aes256gcm"` is understood.
    pub encryption_type: String,
    /// Base64 nonce.
    pub iv: String,
    /// Base64 ciphertext, GCM tag included.
    pub data: String,
}

impl EncryptedBox {
    /// Encrypt `plaintext` under `key`, producing a fresh box with a
    /// random nonce.
    pub fn encrypt(plaintext: &[u8], key: &[u8; 32]) -> LoginResult<Self> {
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| LoginError::Decrypt)?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|_| LoginError::Decrypt)?;

        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(Self {
            encryption_type: AES256_GCM_TYPE.to_string(),
            iv: b64.encode(nonce_bytes),
            data: b64.encode(ciphertext),
        })
    }

    /// Decrypt the box under `key`. Fails closed on any mismatch.
    pub fn decrypt(&self, key: &[u8; 32]) -> LoginResult<Vec<u8>> {
        if self.encryption_type != AES256_GCM_TYPE {
            return Err(LoginError::Decrypt);
        }

        let b64 = base64::engine::general_purpose::STANDARD;
        let nonce_bytes = b64.decode(&self.iv).map_err(|_| LoginError::Decrypt)?;
        let ciphertext = b64.decode(&self.data).map_err(|_| LoginError::Decrypt)?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(LoginError::Decrypt);
        }

        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| LoginError::Decrypt)?;
        cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|_| LoginError::Decrypt)
    }

    /// Decrypt a box that must contain exactly 32 bytes of key material.
    pub fn decrypt_key(&self, key: &[u8; 32]) -> LoginResult<[u8; 32]> {
        let plain = self.decrypt(key)?;
        let bytes: [u8; 32] = plain.as_slice().try_into().map_err(|_| LoginError::Decrypt)?;
        Ok(bytes)
    }
}

/// Generate a fresh random 256-bit key.
pub fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    OsRng.fill_bytes(&mut key);
    key
}

/// Generate `n` random bytes.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    OsRng.fill_bytes(&mut out);
    out
}
