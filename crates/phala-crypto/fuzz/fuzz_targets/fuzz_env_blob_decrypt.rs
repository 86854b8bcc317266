//! Malformed sealed blobs must be rejected without panicking.

#![no_main]
use libfuzzer_sys::fuzz_target;
use phala_crypto::decrypt_env_vars;

fuzz_target!(|data: &[u8]| {
    let secret = [0x11u8; 32];
    let _ = decrypt_env_vars(&hex::encode(data), &secret);
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = decrypt_env_vars(text, &secret);
    }
});
