use std::time::Duration;

use crate::config::DEFAULT_KMS_TIMEOUT;
use crate::crypto::{decode_base64, encode_base64};
use crate::error::{EnvelopeError, Result};
use crate::key_manager::KeyHandle;

/// Envelope encryption through a remote key: plaintext goes out, raw
/// ciphertext comes back and is stored as standard base64 text.
#[derive(Debug, Clone)]
pub struct EnvelopeCipher {
    timeout: Duration,
}

impl Default for EnvelopeCipher {
    fn default() -> Self {
        Self::new(DEFAULT_KMS_TIMEOUT)
    }
}

impl EnvelopeCipher {
    /// `timeout` bounds each remote call
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub async fn encrypt(&self, handle: &KeyHandle, plaintext: &[u8]) -> Result<String> {
        let call = handle.client.encrypt(&handle.key_path, plaintext);
        let ciphertext = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                EnvelopeError::Encryption(format!("key service timed out after {:?}", self.timeout))
            })?
            .map_err(|e| EnvelopeError::Encryption(e.to_string()))?;

        tracing::debug!(
            purpose = %handle.purpose,
            plaintext_len = plaintext.len(),
            ciphertext_len = ciphertext.len(),
            "encrypted payload"
        );
        Ok(encode_base64(&ciphertext))
    }

    pub async fn decrypt(&self, handle: &KeyHandle, encoded: &str) -> Result<Vec<u8>> {
        let ciphertext = decode_base64(encoded)?;

        let call = handle.client.decrypt(&handle.key_path, &ciphertext);
        let plaintext = tokio::time::timeout(self.timeout, call)
            .await
            .map_err(|_| {
                EnvelopeError::Decryption(format!("key service timed out after {:?}", self.timeout))
            })?
            .map_err(|e| EnvelopeError::Decryption(e.to_string()))?;

        tracing::debug!(
            purpose = %handle.purpose,
            ciphertext_len = ciphertext.len(),
            "decrypted payload"
        );
        Ok(plaintext)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::crypto::SecureKey;
    use crate::error::KmsError;
    use crate::key_manager::KeyPurpose;
    use crate::kms::{KmsClient, LocalKmsClient};

    const PHONE_KEY: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/phone";

    fn handle() -> KeyHandle {
        KeyHandle::new(
            KeyPurpose::PhoneEncryption,
            PHONE_KEY,
            Arc::new(LocalKmsClient::new(SecureKey::generate())),
        )
    }

    struct FailingKms;

    #[async_trait]
    impl KmsClient for FailingKms {
        fn backend(&self) -> &'static str {
            "failing"
        }

        async fn encrypt(&self, _: &str, _: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
            Err(KmsError::Remote {
                status: 403,
                message: "permission denied".into(),
            })
        }

        async fn decrypt(&self, _: &str, _: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
            Err(KmsError::Remote {
                status: 400,
                message: "key disabled".into(),
            })
        }
    }

    struct StalledKms;

    #[async_trait]
    impl KmsClient for StalledKms {
        fn backend(&self) -> &'static str {
            "stalled"
        }

        async fn encrypt(&self, _: &str, _: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }

        async fn decrypt(&self, _: &str, _: &[u8]) -> std::result::Result<Vec<u8>, KmsError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn round_trips_assorted_inputs() {
        let cipher = EnvelopeCipher::default();
        let handle = handle();
        let long = "9".repeat(64 * 1024);
        let inputs: [&[u8]; 5] = [
            b"",
            b"+15551234567",
            "+44 20 7946 0958 \u{260e}\u{fe0f} \u{4e2d}\u{6587}".as_bytes(),
            long.as_bytes(),
            &[0u8, 255, 1, 254, 0],
        ];

        for input in inputs {
            let encoded = cipher.encrypt(&handle, input).await.unwrap();
            assert!(decode_base64(&encoded).is_ok());
            let decoded = cipher.decrypt(&handle, &encoded).await.unwrap();
            assert_eq!(decoded, input);
        }
    }

    #[tokio::test]
    async fn same_plaintext_encrypts_differently() {
        let cipher = EnvelopeCipher::default();
        let handle = handle();
        let first = cipher.encrypt(&handle, b"+15551234567").await.unwrap();
        let second = cipher.encrypt(&handle, b"+15551234567").await.unwrap();
        assert_ne!(first, second);
    }

    #[tokio::test]
    async fn non_base64_input_is_a_decoding_failure() {
        let cipher = EnvelopeCipher::default();
        let err = cipher.decrypt(&handle(), "not*base64!").await.expect_err("bad input");
        assert!(matches!(err, EnvelopeError::Decoding(_)));
    }

    #[tokio::test]
    async fn tampered_ciphertext_is_a_decryption_failure() {
        let cipher = EnvelopeCipher::default();
        let handle = handle();
        let encoded = cipher.encrypt(&handle, b"+15551234567").await.unwrap();

        let mut raw = decode_base64(&encoded).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let err = cipher.decrypt(&handle, &encode_base64(&raw)).await.expect_err("tampered");
        assert!(matches!(err, EnvelopeError::Decryption(_)));
    }

    #[tokio::test]
    async fn remote_errors_are_surfaced() {
        let cipher = EnvelopeCipher::default();
        let handle = KeyHandle::new(KeyPurpose::PhoneEncryption, PHONE_KEY, Arc::new(FailingKms));

        let err = cipher.encrypt(&handle, b"x").await.expect_err("encrypt fails");
        assert!(
            matches!(err, EnvelopeError::Encryption(ref msg) if msg.contains("permission denied"))
        );

        let err = cipher.decrypt(&handle, "AAAA").await.expect_err("decrypt fails");
        assert!(matches!(err, EnvelopeError::Decryption(ref msg) if msg.contains("key disabled")));
    }

    #[tokio::test(start_paused = true)]
    async fn remote_calls_time_out() {
        let cipher = EnvelopeCipher::new(Duration::from_millis(50));
        let handle = KeyHandle::new(KeyPurpose::PhoneEncryption, PHONE_KEY, Arc::new(StalledKms));

        let err = cipher.encrypt(&handle, b"x").await.expect_err("times out");
        assert!(matches!(err, EnvelopeError::Encryption(ref msg) if msg.contains("timed out")));

        let err = cipher.decrypt(&handle, "AAAA").await.expect_err("times out");
        assert!(matches!(err, EnvelopeError::Decryption(ref msg) if msg.contains("timed out")));
    }
}
