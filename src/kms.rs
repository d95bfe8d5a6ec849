//! Key-management clients
//!
//! A [`KmsClient`] is the remote capability behind a key handle: it turns
//! plaintext into ciphertext (and back) under a key named by its resource
//! path. Key material never leaves the service.
//!
//! - [`GcpKmsClient`]: Google Cloud KMS REST API, authenticated with a
//!   service account key
//! - [`LocalKmsClient`]: a local AES-256-GCM key, for development and tests

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::crypto::{decode_base64, encode_base64, AesGcmCipher, EncryptedData, SecureKey};
use crate::error::KmsError;

/// OAuth scope granting Cloud KMS encrypt/decrypt
pub const KMS_SCOPE: &str = "https://www.googleapis.com/auth/cloudkms";

/// Default Cloud KMS REST endpoint
pub const DEFAULT_KMS_ENDPOINT: &str = "https://cloudkms.googleapis.com";

const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;
const MAX_TOKEN_LIFETIME_SECS: i64 = 86_400;

/// Encrypt/decrypt capability addressed by a key path
#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    async fn encrypt(&self, key_path: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError>;

    async fn decrypt(&self, key_path: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError>;
}

/// Local AES-256-GCM backend. The key path is bound as associated data, so
/// ciphertext produced for one key path does not open under another.
pub struct LocalKmsClient {
    key: SecureKey,
}

impl LocalKmsClient {
    pub fn new(key: SecureKey) -> Self {
        Self { key }
    }

    pub fn from_base64(encoded: &str) -> Result<Self, KmsError> {
        Ok(Self::new(SecureKey::from_base64(encoded)?))
    }
}

#[async_trait]
impl KmsClient for LocalKmsClient {
    fn backend(&self) -> &'static str {
        "local"
    }

    async fn encrypt(&self, key_path: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let sealed = AesGcmCipher::encrypt(&self.key, plaintext, key_path.as_bytes())?;
        Ok(sealed.to_bytes())
    }

    async fn decrypt(&self, key_path: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let sealed = EncryptedData::from_bytes(ciphertext)?;
        AesGcmCipher::decrypt(&self.key, &sealed, key_path.as_bytes())
    }
}

/// The fields of a service account key file this client needs
#[derive(Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    ASSERTION_LIFETIME_SECS
}

struct AccessToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    fn new(value: String, now: DateTime<Utc>, expires_in: i64) -> Self {
        let lifetime = expires_in.clamp(0, MAX_TOKEN_LIFETIME_SECS);
        Self {
            value,
            expires_at: now + chrono::Duration::seconds(lifetime),
        }
    }

    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS) > now
    }
}

#[derive(Serialize)]
struct EncryptRequest {
    plaintext: String,
}

#[derive(Deserialize)]
struct EncryptResponse {
    ciphertext: String,
}

#[derive(Serialize)]
struct DecryptRequest {
    ciphertext: String,
}

#[derive(Deserialize)]
struct DecryptResponse {
    // Omitted by the service when the plaintext is empty
    #[serde(default)]
    plaintext: String,
}

/// Google Cloud KMS over its REST API.
///
/// Authenticates with the OAuth2 JWT-bearer grant using a service account
/// key, and caches the access token until shortly before it expires.
pub struct GcpKmsClient {
    http: reqwest::Client,
    endpoint: String,
    client_email: String,
    token_uri: String,
    signing_key: EncodingKey,
    token: RwLock<Option<AccessToken>>,
}

impl GcpKmsClient {
    /// Build a client from a service account key file
    pub fn from_service_account_file(
        path: &Path,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, KmsError> {
        let json = std::fs::read_to_string(path).map_err(|e| {
            KmsError::Credential(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_service_account_json(&json, endpoint, timeout)
    }

    /// Build a client from service account key JSON
    pub fn from_service_account_json(
        json: &str,
        endpoint: &str,
        timeout: Duration,
    ) -> Result<Self, KmsError> {
        let account: ServiceAccountKey = serde_json::from_str(json)
            .map_err(|e| KmsError::Credential(format!("invalid service account key: {}", e)))?;
        let signing_key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| KmsError::Credential(format!("invalid private key: {}", e)))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| KmsError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client_email: account.client_email,
            token_uri: account.token_uri,
            signing_key,
            token: RwLock::new(None),
        })
    }

    pub fn client_email(&self) -> &str {
        &self.client_email
    }

    /// Establish a session by obtaining the first access token
    pub async fn connect(&self) -> Result<(), KmsError> {
        self.access_token().await.map(|_| ())
    }

    async fn access_token(&self) -> Result<String, KmsError> {
        let now = Utc::now();
        let cached = {
            let guard = self.token.read();
            guard
                .as_ref()
                .filter(|token| token.is_fresh(now))
                .map(|token| token.value.clone())
        };
        if let Some(value) = cached {
            return Ok(value);
        }

        let fresh = self.fetch_token(now).await?;
        let value = fresh.value.clone();
        *self.token.write() = Some(fresh);
        Ok(value)
    }

    async fn fetch_token(&self, now: DateTime<Utc>) -> Result<AccessToken, KmsError> {
        tracing::debug!(account = %self.client_email, "requesting KMS access token");

        let claims = AssertionClaims {
            iss: &self.client_email,
            scope: KMS_SCOPE,
            aud: &self.token_uri,
            iat: now.timestamp(),
            exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
        };
        let header = Header::new(Algorithm::RS256);
        let assertion = jsonwebtoken::encode(&header, &claims, &self.signing_key)
            .map_err(|e| KmsError::Auth(format!("failed to sign assertion: {}", e)))?;

        let response = self
            .http
            .post(&self.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KmsError::Auth(format!("token endpoint returned {}: {}", status, message)));
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| KmsError::Malformed(format!("token response: {}", e)))?;

        Ok(AccessToken::new(body.access_token, now, body.expires_in))
    }

    async fn call<Req, Resp>(
        &self,
        key_path: &str,
        verb: &str,
        request: &Req,
    ) -> Result<Resp, KmsError>
    where
        Req: Serialize + ?Sized,
        Resp: for<'de> Deserialize<'de>,
    {
        let token = self.access_token().await?;
        let url = format!("{}/v1/{}:{}", self.endpoint, key_path, verb);

        let response = self
            .http
            .post(&url)
            .bearer_auth(token)
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(KmsError::Remote {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json()
            .await
            .map_err(|e| KmsError::Malformed(format!("{} response: {}", verb, e)))
    }
}

#[async_trait]
impl KmsClient for GcpKmsClient {
    fn backend(&self) -> &'static str {
        "gcp"
    }

    async fn encrypt(&self, key_path: &str, plaintext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let request = EncryptRequest {
            plaintext: encode_base64(plaintext),
        };
        let response: EncryptResponse = self.call(key_path, "encrypt", &request).await?;
        decode_base64(&response.ciphertext)
            .map_err(|e| KmsError::Malformed(format!("ciphertext is not base64: {}", e)))
    }

    async fn decrypt(&self, key_path: &str, ciphertext: &[u8]) -> Result<Vec<u8>, KmsError> {
        let request = DecryptRequest {
            ciphertext: encode_base64(ciphertext),
        };
        let response: DecryptResponse = self.call(key_path, "decrypt", &request).await?;
        decode_base64(&response.plaintext)
            .map_err(|e| KmsError::Malformed(format!("plaintext is not base64: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY_PATH: &str = "projects/p/locations/global/keyRings/r/cryptoKeys/phone";

    #[tokio::test]
    async fn local_client_round_trips() {
        let client = LocalKmsClient::new(SecureKey::generate());
        let ciphertext = client.encrypt(KEY_PATH, b"+15551234567").await.unwrap();
        assert_ne!(ciphertext, b"+15551234567".to_vec());

        let plaintext = client.decrypt(KEY_PATH, &ciphertext).await.unwrap();
        assert_eq!(plaintext, b"+15551234567".to_vec());
    }

    #[tokio::test]
    async fn local_client_binds_key_path() {
        let client = LocalKmsClient::new(SecureKey::generate());
        let ciphertext = client.encrypt(KEY_PATH, b"secret").await.unwrap();

        let err = client
            .decrypt("projects/p/locations/global/keyRings/r/cryptoKeys/other", &ciphertext)
            .await
            .expect_err("key path mismatch must fail");
        assert!(matches!(err, KmsError::Crypto(_)));
    }

    #[tokio::test]
    async fn local_client_rejects_truncated_ciphertext() {
        let client = LocalKmsClient::new(SecureKey::generate());
        let err = client.decrypt(KEY_PATH, &[1, 2, 3]).await.expect_err("too short");
        assert!(matches!(err, KmsError::Crypto(_)));
    }

    #[test]
    fn service_account_json_must_parse() {
        let timeout = Duration::from_secs(1);
        let err = GcpKmsClient::from_service_account_json("{}", DEFAULT_KMS_ENDPOINT, timeout)
            .err()
            .expect("missing fields");
        assert!(matches!(err, KmsError::Credential(_)));
    }

    #[test]
    fn service_account_private_key_must_be_pem() {
        let json = r#"{"client_email":"svc@p.iam.gserviceaccount.com","private_key":"nope"}"#;
        let timeout = Duration::from_secs(1);
        let err = GcpKmsClient::from_service_account_json(json, DEFAULT_KMS_ENDPOINT, timeout)
            .err()
            .expect("bad key");
        assert!(matches!(err, KmsError::Credential(_)));
    }

    #[test]
    fn token_freshness_keeps_margin() {
        let now = Utc::now();
        let token = AccessToken {
            value: "t".into(),
            expires_at: now + chrono::Duration::seconds(TOKEN_REFRESH_MARGIN_SECS - 1),
        };
        assert!(!token.is_fresh(now));

        let token = AccessToken {
            value: "t".into(),
            expires_at: now + chrono::Duration::seconds(3600),
        };
        assert!(token.is_fresh(now));
    }

    #[test]
    fn token_lifetime_is_clamped() {
        let now = Utc::now();
        let token = AccessToken::new("t".into(), now, i64::MAX);
        assert_eq!(token.expires_at, now + chrono::Duration::seconds(MAX_TOKEN_LIFETIME_SECS));

        let token = AccessToken::new("t".into(), now, -5);
        assert_eq!(token.expires_at, now);
        assert!(!token.is_fresh(now));
    }
}
