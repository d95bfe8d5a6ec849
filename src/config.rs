//! Process configuration
//!
//! Settings come from the environment, optionally seeded from a `.env` file
//! by the binary. Parsing goes through [`Config::from_lookup`] so it can be
//! exercised without touching the process environment.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use sqlx::postgres::{PgConnectOptions, PgSslMode};

use crate::error::{EnvelopeError, Result};
use crate::key_manager::KeyPurpose;
use crate::kms::DEFAULT_KMS_ENDPOINT;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_DB_PORT: u16 = 5432;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_KMS_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub request_timeout: Duration,
    pub database: DatabaseConfig,
    pub kms: KmsConfig,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub source: DatabaseSource,
    pub max_connections: u32,
}

/// Where the Postgres connection comes from
#[derive(Clone)]
pub enum DatabaseSource {
    /// A full `postgres://` URL
    Url(String),
    /// Individual settings, connected with TLS disabled
    Parts {
        host: String,
        user: String,
        password: String,
        name: String,
        port: u16,
    },
}

impl std::fmt::Debug for DatabaseSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DatabaseSource::Url(_) => write!(f, "Url([REDACTED])"),
            DatabaseSource::Parts { host, user, name, port, .. } => f
                .debug_struct("Parts")
                .field("host", host)
                .field("user", user)
                .field("name", name)
                .field("port", port)
                .finish_non_exhaustive(),
        }
    }
}

impl DatabaseConfig {
    pub fn connect_options(&self) -> Result<PgConnectOptions> {
        match &self.source {
            DatabaseSource::Url(url) => PgConnectOptions::from_str(url)
                .map_err(|e| EnvelopeError::Config(format!("invalid DATABASE_URL: {}", e))),
            DatabaseSource::Parts { host, user, password, name, port } => Ok(PgConnectOptions::new()
                .host(host)
                .username(user)
                .password(password)
                .database(name)
                .port(*port)
                .ssl_mode(PgSslMode::Disable)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KmsBackend {
    Gcp,
    Local,
}

impl FromStr for KmsBackend {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "gcp" => Ok(KmsBackend::Gcp),
            "local" => Ok(KmsBackend::Local),
            other => Err(EnvelopeError::Config(format!(
                "KMS_BACKEND must be `gcp` or `local`, got `{}`",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct KmsConfig {
    pub backend: KmsBackend,
    pub endpoint: String,
    pub timeout: Duration,
    pub keys: HashMap<KeyPurpose, KeyConfig>,
}

/// Key path and credential for one purpose
#[derive(Debug, Clone)]
pub struct KeyConfig {
    pub key_path: String,
    pub credential: CredentialSource,
}

#[derive(Clone)]
pub enum CredentialSource {
    /// Service account key file (gcp backend)
    ServiceAccountFile(PathBuf),
    /// Base64 AES-256 key (local backend)
    LocalKey(String),
}

impl std::fmt::Debug for CredentialSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CredentialSource::ServiceAccountFile(path) => {
                f.debug_tuple("ServiceAccountFile").field(path).finish()
            }
            CredentialSource::LocalKey(_) => write!(f, "LocalKey([REDACTED])"),
        }
    }
}

impl Config {
    /// Read configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read configuration through `lookup`; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let require = |key: &str| {
            get(key).ok_or_else(|| EnvelopeError::Config(format!("{} is not set", key)))
        };

        let port = parse_or(get("PORT"), "PORT", DEFAULT_PORT)?;
        let request_timeout = Duration::from_secs(parse_nonzero(
            get("REQUEST_TIMEOUT_SECS"),
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        )?);

        let source = match get("DATABASE_URL") {
            Some(url) => DatabaseSource::Url(url),
            None => DatabaseSource::Parts {
                host: require("DB_HOST")?,
                user: require("DB_USER")?,
                password: get("DB_PASSWORD").unwrap_or_default(),
                name: require("DB_NAME")?,
                port: parse_or(get("DB_PORT"), "DB_PORT", DEFAULT_DB_PORT)?,
            },
        };
        let database = DatabaseConfig {
            source,
            max_connections: parse_nonzero(
                get("DB_MAX_CONNECTIONS"),
                "DB_MAX_CONNECTIONS",
                DEFAULT_MAX_CONNECTIONS,
            )?,
        };

        let backend = match get("KMS_BACKEND") {
            Some(value) => value.parse()?,
            None => KmsBackend::Gcp,
        };
        let endpoint = get("KMS_ENDPOINT").unwrap_or_else(|| DEFAULT_KMS_ENDPOINT.to_string());
        let timeout = Duration::from_secs(parse_nonzero(
            get("KMS_TIMEOUT_SECS"),
            "KMS_TIMEOUT_SECS",
            DEFAULT_KMS_TIMEOUT.as_secs(),
        )?);

        let mut keys = HashMap::new();
        for purpose in KeyPurpose::ALL {
            let prefix = purpose.env_prefix();
            let key_path = require(&format!("{}_KEY_PATH", prefix))?;
            let credential = match backend {
                KmsBackend::Gcp => CredentialSource::ServiceAccountFile(PathBuf::from(require(
                    &format!("{}_SERVICE_ACCOUNT_PATH", prefix),
                )?)),
                KmsBackend::Local => {
                    CredentialSource::LocalKey(require(&format!("{}_LOCAL_KEY_BASE64", prefix))?)
                }
            };
            keys.insert(purpose, KeyConfig { key_path, credential });
        }

        Ok(Self {
            port,
            request_timeout,
            database,
            kms: KmsConfig {
                backend,
                endpoint,
                timeout,
                keys,
            },
        })
    }
}

fn parse_or<T: FromStr>(value: Option<String>, key: &str, default: T) -> Result<T> {
    match value {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| EnvelopeError::Config(format!("{} has an invalid value `{}`", key, raw))),
        None => Ok(default),
    }
}

/// Like `parse_or`, but zero is refused: a zero timeout or pool size
/// would start a server that fails every request.
fn parse_nonzero<T>(value: Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr + Default + PartialEq,
{
    let parsed = parse_or(value, key, default)?;
    if parsed == T::default() {
        return Err(EnvelopeError::Config(format!("{} must be greater than zero", key)));
    }
    Ok(parsed)
}
