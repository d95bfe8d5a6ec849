use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::envelope::EnvelopeCipher;
use crate::error::{EnvelopeError, Result};
use crate::key_manager::{KeyClientRegistry, KeyPurpose};
use crate::storage::{EncryptedRecord, RecordStore};

/// A stored phone number recovered to plaintext, with its metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecryptedPhoneNumber {
    pub id: Uuid,
    pub phone_number: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Encrypts phone numbers before they are stored and decrypts them on read.
///
/// Encryption always precedes storage: if the key service fails, nothing is
/// written. Every fetch decrypts again; nothing is cached.
#[derive(Clone)]
pub struct RecordService {
    registry: Arc<KeyClientRegistry>,
    cipher: EnvelopeCipher,
    store: Arc<dyn RecordStore>,
}

impl RecordService {
    pub fn new(
        registry: Arc<KeyClientRegistry>,
        cipher: EnvelopeCipher,
        store: Arc<dyn RecordStore>,
    ) -> Self {
        Self { registry, cipher, store }
    }

    pub async fn submit(&self, phone_number: &str) -> Result<EncryptedRecord> {
        if phone_number.is_empty() {
            return Err(EnvelopeError::Validation("phone_number must not be empty".into()));
        }

        let handle = self.registry.resolve(KeyPurpose::PhoneEncryption)?;
        let encrypted_data = self.cipher.encrypt(handle, phone_number.as_bytes()).await?;
        let record = self.store.create(encrypted_data).await?;

        tracing::info!(id = %record.id, "stored encrypted phone number");
        Ok(record)
    }

    pub async fn fetch(&self, id: &Uuid) -> Result<DecryptedPhoneNumber> {
        let record = self
            .store
            .get_by_id(id)
            .await?
            .ok_or_else(|| EnvelopeError::NotFound(id.to_string()))?;

        let handle = self.registry.resolve(KeyPurpose::PhoneEncryption)?;
        let plaintext = self.cipher.decrypt(handle, &record.encrypted_data).await?;
        let phone_number = String::from_utf8(plaintext)
            .map_err(|_| EnvelopeError::Decryption("plaintext is not valid UTF-8".into()))?;

        tracing::debug!(id = %record.id, "decrypted phone number");
        Ok(DecryptedPhoneNumber {
            id: record.id,
            phone_number,
            created_at: record.created_at,
            updated_at: record.updated_at,
        })
    }
}
