//! Storage abstraction for encrypted records
//!
//! This module provides a trait-based storage interface that can be
//! implemented for various backends (in-memory, PostgreSQL, etc.).
//! Stores only ever see the encoded ciphertext, never plaintext.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

/// A persisted phone number in its encrypted form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptedRecord {
    /// Unique identifier, assigned on creation
    pub id: Uuid,
    /// Base64 ciphertext produced by the envelope cipher
    pub encrypted_data: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EncryptedRecord {
    /// New record with a fresh id and both timestamps set to now
    pub fn new(encrypted_data: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            encrypted_data,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Storage trait for encrypted records
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Persist a payload under a fresh id
    async fn create(&self, encrypted_data: String) -> Result<EncryptedRecord>;

    /// Exact-match lookup by id
    async fn get_by_id(&self, id: &Uuid) -> Result<Option<EncryptedRecord>>;
}

/// In-memory implementation of RecordStore
///
/// Suitable for development and testing.
/// Data is lost when the process terminates.
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<Uuid, EncryptedRecord>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create(&self, encrypted_data: String) -> Result<EncryptedRecord> {
        let record = EncryptedRecord::new(encrypted_data);
        self.records.write().insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_by_id(&self, id: &Uuid) -> Result<Option<EncryptedRecord>> {
        Ok(self.records.read().get(id).cloned())
    }
}
