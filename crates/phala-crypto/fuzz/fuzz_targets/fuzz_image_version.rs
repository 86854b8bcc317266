#![no_main]
use libfuzzer_sys::fuzz_target;
use phala_crypto::ImageVersion;

fuzz_target!(|data: &[u8]| {
    if let Ok(name) = std::str::from_utf8(data) {
        if let Some(version) = ImageVersion::from_image_name(name) {
            let reparsed = ImageVersion::parse(&version.to_string());
            assert_eq!(reparsed, Some(version));
        }
    }
});
