//! Cryptography for the CVM provisioning workflow.
//!
//! - [`compose_hash`]: canonical JSON + SHA-256 over an app-compose manifest
//! - [`env_crypto`]: x25519 + AES-256-GCM sealing of environment variables
//! - [`env_policy`]: allow-list precondition for image versions >= 0.5.0
//! - [`kms_signature`]: authenticating a KMS-served encryption public key

pub mod compose_hash;
pub mod env_crypto;
pub mod env_policy;
pub mod error;
pub mod kms_signature;

pub use compose_hash::{canonical_json, compose_hash, compose_hash_of};
pub use env_crypto::{encrypt_env_vars, parse_x25519_public_key, EnvVar};
pub use env_policy::{check_allowed_envs, ImageVersion};
pub use error::{CryptoError, CryptoResult};
pub use kms_signature::{recover_kms_signer, verify_env_encrypt_public_key};

#[cfg(any(test, feature = "tee-decrypt"))]
pub use env_crypto::decrypt_env_vars;
