use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CryptoError {
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Invalid signature format: {0}")]
    InvalidSignatureFormat(String),

    #[error("Signature verification failed: {0}")]
    SignatureVerificationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Environment names outside the manifest allow-list.
    #[error("environment variables not in allowed_envs: {}", .0.join(", "))]
    EnvNotAllowed(Vec<String>),
}

pub type CryptoResult<T> = Result<T, CryptoError>;
