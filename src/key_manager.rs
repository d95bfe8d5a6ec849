use std::collections::HashMap;
use std::sync::Arc;

use crate::config::{CredentialSource, KeyConfig, KmsConfig};
use crate::error::{EnvelopeError, Result};
use crate::kms::{GcpKmsClient, KmsClient, LocalKmsClient};

/// Logical reasons the service encrypts data. Each purpose gets its own key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyPurpose {
    PhoneEncryption,
}

impl KeyPurpose {
    /// Every purpose the registry must serve
    pub const ALL: [KeyPurpose; 1] = [KeyPurpose::PhoneEncryption];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyPurpose::PhoneEncryption => "phone_encryption",
        }
    }

    /// Prefix of this purpose's environment variables
    pub fn env_prefix(&self) -> &'static str {
        match self {
            KeyPurpose::PhoneEncryption => "PHONE_ENCRYPTION",
        }
    }
}

impl std::fmt::Display for KeyPurpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A purpose bound to a remote key and the client authorized to use it
#[derive(Clone)]
pub struct KeyHandle {
    pub purpose: KeyPurpose,
    pub key_path: String,
    pub client: Arc<dyn KmsClient>,
}

impl KeyHandle {
    pub fn new(
        purpose: KeyPurpose,
        key_path: impl Into<String>,
        client: Arc<dyn KmsClient>,
    ) -> Self {
        Self {
            purpose,
            key_path: key_path.into(),
            client,
        }
    }
}

impl std::fmt::Debug for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyHandle")
            .field("purpose", &self.purpose)
            .field("key_path", &self.key_path)
            .field("backend", &self.client.backend())
            .finish()
    }
}

/// Key handles by purpose. Built once at startup, read-only afterwards.
#[derive(Debug, Default)]
pub struct KeyClientRegistry {
    handles: HashMap<KeyPurpose, KeyHandle>,
}

impl KeyClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load credentials, open a session and bind a key path for every purpose
    pub async fn connect(config: &KmsConfig) -> Result<Self> {
        let mut registry = Self::new();

        for purpose in KeyPurpose::ALL {
            let key_config = config.keys.get(&purpose).ok_or_else(|| {
                EnvelopeError::Config(format!("no key configured for {}", purpose))
            })?;
            let handle = Self::connect_handle(purpose, key_config, config).await?;
            registry.register(handle)?;
        }

        tracing::info!(purposes = registry.handles.len(), "key client registry ready");
        Ok(registry)
    }

    async fn connect_handle(
        purpose: KeyPurpose,
        key_config: &KeyConfig,
        config: &KmsConfig,
    ) -> Result<KeyHandle> {
        if key_config.key_path.trim().is_empty() {
            return Err(EnvelopeError::Config(format!("empty key path for {}", purpose)));
        }

        let client: Arc<dyn KmsClient> = match &key_config.credential {
            CredentialSource::ServiceAccountFile(path) => {
                let client =
                    GcpKmsClient::from_service_account_file(path, &config.endpoint, config.timeout)
                        .map_err(|e| EnvelopeError::Config(format!("{}: {}", purpose, e)))?;
                client
                    .connect()
                    .await
                    .map_err(|e| EnvelopeError::Connection(format!("{}: {}", purpose, e)))?;
                tracing::info!(
                    %purpose,
                    account = %client.client_email(),
                    "connected to Cloud KMS"
                );
                Arc::new(client)
            }
            CredentialSource::LocalKey(encoded) => {
                let client = LocalKmsClient::from_base64(encoded)
                    .map_err(|e| EnvelopeError::Config(format!("{}: {}", purpose, e)))?;
                tracing::warn!(%purpose, "using local key backend, not for production");
                Arc::new(client)
            }
        };

        Ok(KeyHandle::new(purpose, key_config.key_path.clone(), client))
    }

    /// Bind a handle. Registering the same purpose and key path again is a
    /// no-op; a different key path for a bound purpose is rejected.
    pub fn register(&mut self, handle: KeyHandle) -> Result<()> {
        if let Some(existing) = self.handles.get(&handle.purpose) {
            if existing.key_path == handle.key_path {
                return Ok(());
            }
            return Err(EnvelopeError::Config(format!(
                "{} is already bound to {}",
                handle.purpose, existing.key_path
            )));
        }

        tracing::debug!(
            purpose = %handle.purpose,
            key_path = %handle.key_path,
            "registered key handle"
        );
        self.handles.insert(handle.purpose, handle);
        Ok(())
    }

    pub fn resolve(&self, purpose: KeyPurpose) -> Result<&KeyHandle> {
        self.handles
            .get(&purpose)
            .ok_or_else(|| EnvelopeError::KeyNotFound(format!("no key client for {}", purpose)))
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
