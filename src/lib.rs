pub mod config;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod http;
pub mod key_manager;
pub mod kms;
pub mod service;
pub mod storage;

// PostgreSQL backend
pub mod postgres_storage;

pub use config::{Config, CredentialSource, DatabaseConfig, KeyConfig, KmsBackend, KmsConfig};
pub use crypto::{AesGcmCipher, EncryptedData, SecureKey};
pub use envelope::EnvelopeCipher;
pub use error::{EnvelopeError, KmsError, Result};
pub use key_manager::{KeyClientRegistry, KeyHandle, KeyPurpose};
pub use kms::{GcpKmsClient, KmsClient, LocalKmsClient};
pub use service::{DecryptedPhoneNumber, RecordService};
pub use storage::{EncryptedRecord, InMemoryRecordStore, RecordStore};

pub use postgres_storage::PostgresRecordStore;
