//! Error types for the phone vault

use thiserror::Error;

/// Result type alias for phone vault operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors that can occur while encrypting, storing or serving phone numbers
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Missing or malformed setting at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store or remote key service unreachable at startup
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed request input
    #[error("Validation error: {0}")]
    Validation(String),

    /// No record matches the identifier
    #[error("Record not found: {0}")]
    NotFound(String),

    /// No key handle registered for a purpose
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Remote encrypt call failed
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Remote decrypt call failed, or the plaintext is unusable
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Stored payload is not valid base64
    #[error("Decoding failed: {0}")]
    Decoding(String),

    /// Persistence layer error
    #[error("Storage error: {0}")]
    Storage(String),
}

impl From<base64::DecodeError> for EnvelopeError {
    fn from(err: base64::DecodeError) -> Self {
        EnvelopeError::Decoding(err.to_string())
    }
}


/// Errors reported by a key-management client
#[derive(Error, Debug)]
pub enum KmsError {
    /// Credential could not be read or parsed
    #[error("credential error: {0}")]
    Credential(String),

    /// Token exchange with the auth endpoint failed
    #[error("auth error: {0}")]
    Auth(String),

    /// Transport failure talking to the key service
    #[error("transport error: {0}")]
    Transport(String),

    /// Key service answered with a non-success status
    #[error("key service returned {status}: {message}")]
    Remote { status: u16, message: String },

    /// Local or remote cryptographic failure
    #[error("cryptographic error: {0}")]
    Crypto(String),

    /// Response could not be interpreted
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for KmsError {
    fn from(err: reqwest::Error) -> Self {
        KmsError::Transport(err.to_string())
    }
}
