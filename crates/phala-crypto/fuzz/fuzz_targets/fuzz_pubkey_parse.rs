//! Arbitrary strings through the x25519 public key decoder and sealer.

#![no_main]
use libfuzzer_sys::fuzz_target;
use phala_crypto::{encrypt_env_vars, parse_x25519_public_key};

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        if parse_x25519_public_key(text).is_ok() {
            let _ = encrypt_env_vars(&[], text);
        }
    }
});
