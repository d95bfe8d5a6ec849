//! Cryptographic primitives for the local key backend
//!
//! AES-256-GCM with associated data, plus the standard base64 helpers used
//! to move ciphertext through text columns and JSON.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng, Payload},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::KmsError;

/// AES-256 key size in bytes (256 bits)
pub const AES_256_KEY_SIZE: usize = 32;

/// AES-GCM nonce size in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// A secure key wrapper that zeroizes memory on drop
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SecureKey {
    bytes: Vec<u8>,
}

impl SecureKey {
    /// Wrap raw key bytes; the length must be exactly 32
    pub fn new(bytes: Vec<u8>) -> Result<Self, KmsError> {
        if bytes.len() != AES_256_KEY_SIZE {
            return Err(KmsError::Credential(format!(
                "key must be exactly {} bytes, got {}",
                AES_256_KEY_SIZE,
                bytes.len()
            )));
        }
        Ok(Self { bytes })
    }

    /// Generate a new random AES-256 key
    pub fn generate() -> Self {
        let mut key = vec![0u8; AES_256_KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        Self { bytes: key }
    }

    /// Decode a key from standard base64
    pub fn from_base64(encoded: &str) -> Result<Self, KmsError> {
        let bytes = STANDARD
            .decode(encoded.trim())
            .map_err(|e| KmsError::Credential(format!("invalid base64 key: {}", e)))?;
        Self::new(bytes)
    }

    /// Get the key bytes (use with caution)
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecureKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SecureKey([REDACTED])")
    }
}

/// Nonce and ciphertext (with tag) produced by one seal operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    pub nonce: Vec<u8>,
    pub ciphertext: Vec<u8>,
}

impl EncryptedData {
    pub fn new(nonce: Vec<u8>, ciphertext: Vec<u8>) -> Self {
        Self { nonce, ciphertext }
    }

    /// Wire layout: nonce || ciphertext
    pub fn to_bytes(&self) -> Vec<u8> {
        [self.nonce.as_slice(), self.ciphertext.as_slice()].concat()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KmsError> {
        if bytes.len() < NONCE_SIZE + TAG_SIZE {
            return Err(KmsError::Crypto(format!(
                "ciphertext too short: {} bytes",
                bytes.len()
            )));
        }
        let (nonce, ciphertext) = bytes.split_at(NONCE_SIZE);
        Ok(Self::new(nonce.to_vec(), ciphertext.to_vec()))
    }
}

/// AES-256-GCM cipher wrapper
pub struct AesGcmCipher;

impl AesGcmCipher {
    /// Encrypt plaintext under `key`, binding `aad` into the tag
    pub fn encrypt(
        key: &SecureKey,
        plaintext: &[u8],
        aad: &[u8],
    ) -> Result<EncryptedData, KmsError> {
        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| KmsError::Crypto(format!("cipher init error: {}", e)))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, Payload { msg: plaintext, aad })
            .map_err(|e| KmsError::Crypto(format!("encryption error: {}", e)))?;

        Ok(EncryptedData::new(nonce_bytes.to_vec(), ciphertext))
    }

    /// Decrypt and authenticate; `aad` must match the value used to encrypt
    pub fn decrypt(
        key: &SecureKey,
        encrypted: &EncryptedData,
        aad: &[u8],
    ) -> Result<Vec<u8>, KmsError> {
        if encrypted.nonce.len() != NONCE_SIZE {
            return Err(KmsError::Crypto(format!(
                "invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                encrypted.nonce.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key.as_bytes())
            .map_err(|e| KmsError::Crypto(format!("cipher init error: {}", e)))?;
        let nonce = Nonce::from_slice(&encrypted.nonce);

        cipher
            .decrypt(nonce, Payload { msg: &encrypted.ciphertext, aad })
            .map_err(|_| KmsError::Crypto("authentication failed".into()))
    }
}

/// Standard (padded) base64, the storage and transport encoding
pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

pub fn decode_base64(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
