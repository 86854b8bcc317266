//! Environment variable sealing for the TEE: x25519 key agreement + AES-256-GCM.
//!
//! Blob layout (hex encoded):
//!   ephemeral_public_key (32) || nonce (12) || ciphertext || tag (16)
//!
//! The AES key is the raw 32-byte x25519 shared secret. The ephemeral public key
//! is also the AEAD associated data, so a blob cannot be re-wrapped under a
//! different ephemeral key.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use x25519_dalek::{EphemeralSecret, PublicKey};
use zeroize::Zeroizing;

use crate::error::{CryptoError, CryptoResult};

pub const X25519_KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const TAG_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub key: String,
    pub value: String,
}

impl EnvVar {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self { key: key.into(), value: value.into() }
    }

    /// Build a list from any `(name, value)` iterator, e.g. a `BTreeMap`.
    pub fn from_pairs<I, K, V>(pairs: I) -> Vec<EnvVar>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        pairs.into_iter().map(|(k, v)| EnvVar::new(k, v)).collect()
    }
}

#[derive(Serialize, Deserialize)]
struct EnvPayload {
    env: Vec<EnvVar>,
}

/// Decode a server x25519 public key given as hex (optionally `0x`) or base64.
pub fn parse_x25519_public_key(encoded: &str) -> CryptoResult<[u8; X25519_KEY_LEN]> {
    let trimmed = encoded.trim();
    let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    let bytes = if stripped.len() == X25519_KEY_LEN * 2 && stripped.chars().all(|c| c.is_ascii_hexdigit()) {
        hex::decode(stripped).map_err(|e| CryptoError::InvalidKeyFormat(e.to_string()))?
    } else {
        base64::engine::general_purpose::STANDARD
            .decode(trimmed)
            .map_err(|e| CryptoError::InvalidKeyFormat(format!("not hex or base64: {}", e)))?
    };
    bytes.try_into().map_err(|b: Vec<u8>| {
        CryptoError::InvalidKeyFormat(format!(
            "x25519 public key must be {} bytes, got {}",
            X25519_KEY_LEN,
            b.len()
        ))
    })
}

/// Seal `envs` to the TEE holding the private half of `public_key`.
///
/// Every call draws a fresh ephemeral key pair and nonce, so sealing the same
/// variables twice never produces the same blob. An empty slice is valid and
/// yields a blob carrying zero variables.
pub fn encrypt_env_vars(envs: &[EnvVar], public_key: &str) -> CryptoResult<String> {
    let remote = PublicKey::from(parse_x25519_public_key(public_key)?);

    let ephemeral_secret = EphemeralSecret::random_from_rng(OsRng);
    let ephemeral_public = PublicKey::from(&ephemeral_secret);
    let shared = ephemeral_secret.diffie_hellman(&remote);
    if !shared.was_contributory() {
        return Err(CryptoError::InvalidKeyFormat(
            "server public key is a low-order point".to_string(),
        ));
    }

    let plaintext = Zeroizing::new(
        serde_json::to_vec(&EnvPayload { env: envs.to_vec() })
            .map_err(|e| CryptoError::SerializationError(e.to_string()))?,
    );

    let cipher = Aes256Gcm::new_from_slice(shared.as_bytes())
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;
    let mut nonce_bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce_bytes);
    let ciphertext = cipher
        .encrypt(
            Nonce::from_slice(&nonce_bytes),
            Payload { msg: plaintext.as_slice(), aad: ephemeral_public.as_bytes() },
        )
        .map_err(|e| CryptoError::EncryptionFailed(e.to_string()))?;

    let mut blob = Vec::with_capacity(X25519_KEY_LEN + NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(ephemeral_public.as_bytes());
    blob.extend_from_slice(&nonce_bytes);
    blob.extend_from_slice(&ciphertext);

    tracing::debug!(vars = envs.len(), blob_len = blob.len(), "sealed environment");
    Ok(hex::encode(blob))
}

/// TEE-side inverse of [`encrypt_env_vars`].
#[cfg(any(test, feature = "tee-decrypt"))]
pub fn decrypt_env_vars(blob_hex: &str, secret_key: &[u8; X25519_KEY_LEN]) -> CryptoResult<Vec<EnvVar>> {
    use x25519_dalek::StaticSecret;

    let blob = hex::decode(blob_hex.trim_start_matches("0x"))
        .map_err(|e| CryptoError::DecryptionFailed(format!("blob is not hex: {}", e)))?;
    if blob.len() < X25519_KEY_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed(format!(
            "blob too short: {} bytes",
            blob.len()
        )));
    }

    let (ephemeral, rest) = blob.split_at(X25519_KEY_LEN);
    let (nonce, ciphertext) = rest.split_at(NONCE_LEN);
    let mut ephemeral_bytes = [0u8; X25519_KEY_LEN];
    ephemeral_bytes.copy_from_slice(ephemeral);

    let secret = StaticSecret::from(*secret_key);
    let shared = secret.diffie_hellman(&PublicKey::from(ephemeral_bytes));
    let cipher = Aes256Gcm::new_from_slice(shared.as_bytes())
        .map_err(|e| CryptoError::DecryptionFailed(e.to_string()))?;
    let plaintext = Zeroizing::new(
        cipher
            .decrypt(Nonce::from_slice(nonce), Payload { msg: ciphertext, aad: ephemeral })
            .map_err(|_| CryptoError::DecryptionFailed("authentication tag mismatch".to_string()))?,
    );

    let payload: EnvPayload = serde_json::from_slice(&plaintext)
        .map_err(|e| CryptoError::SerializationError(e.to_string()))?;
    Ok(payload.env)
}
