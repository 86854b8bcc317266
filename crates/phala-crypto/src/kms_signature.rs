//! Authentication of KMS-served env encryption public keys.
//!
//! The KMS signs `keccak256("dstack-env-encrypt-pubkey" ":" app_id pubkey)`
//! with its secp256k1 key. Recovering the signer lets callers compare it
//! against the KMS identity they trust before sealing secrets to the key.

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sha3::{Digest, Keccak256};

use crate::env_crypto::parse_x25519_public_key;
use crate::error::{CryptoError, CryptoResult};

pub const PUBKEY_SIGNATURE_PREFIX: &[u8] = b"dstack-env-encrypt-pubkey";
pub const RECOVERABLE_SIGNATURE_LEN: usize = 65;

fn decode_hex(label: &str, value: &str) -> CryptoResult<Vec<u8>> {
    let stripped = value.trim().trim_start_matches("0x");
    hex::decode(stripped)
        .map_err(|e| CryptoError::InvalidSignatureFormat(format!("{} is not hex: {}", label, e)))
}

/// Keccak-256 prehash the KMS signs for `(app_id, public_key)`.
pub fn pubkey_signature_message(app_id: &[u8], public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Keccak256::new();
    hasher.update(PUBKEY_SIGNATURE_PREFIX);
    hasher.update(b":");
    hasher.update(app_id);
    hasher.update(public_key);
    hasher.finalize().into()
}

/// Recover the compressed secp256k1 key that produced `signature` over
/// `prehash`. The signature is `r || s || v` with `v` in `{0, 1, 27, 28}`.
pub fn recover_kms_signer(prehash: &[u8; 32], signature: &[u8]) -> CryptoResult<String> {
    if signature.len() != RECOVERABLE_SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignatureFormat(format!(
            "expected {} bytes, got {}",
            RECOVERABLE_SIGNATURE_LEN,
            signature.len()
        )));
    }
    let sig = Signature::from_slice(&signature[..64])
        .map_err(|e| CryptoError::InvalidSignatureFormat(e.to_string()))?;
    let v = signature[64];
    let recovery_id = RecoveryId::from_byte(if v >= 27 { v - 27 } else { v })
        .filter(|id| id.to_byte() < 2)
        .ok_or_else(|| CryptoError::InvalidSignatureFormat(format!("bad recovery byte {}", v)))?;

    let key = VerifyingKey::recover_from_prehash(prehash, &sig, recovery_id)
        .map_err(|e| CryptoError::SignatureVerificationFailed(e.to_string()))?;
    Ok(format!("0x{}", hex::encode(key.to_encoded_point(true).as_bytes())))
}

/// Recover the KMS signer for an env encryption public key served for
/// `app_id`. The signature and app id are hex, with or without `0x`; the
/// public key is hex or base64, as the control plane serves it.
///
/// Returns the 0x-prefixed compressed signer key; callers decide whether it
/// is the KMS they expect.
pub fn verify_env_encrypt_public_key(public_key: &str, signature_hex: &str, app_id: &str) -> CryptoResult<String> {
    let public_key = parse_x25519_public_key(public_key)?;
    let signature = decode_hex("signature", signature_hex)?;
    let app_id = decode_hex("app id", app_id)?;
    let prehash = pubkey_signature_message(&app_id, &public_key);
    let signer = recover_kms_signer(&prehash, &signature)?;
    tracing::debug!(%signer, "recovered KMS signer for env encryption key");
    Ok(signer)
}
