#![no_main]

use libfuzzer_sys::fuzz_target;
use efris_core::envelope::parse_response;

const KEY: &[u8] = b"0123456789abcdef";

fuzz_target!(|data: &[u8]| {
    if let Ok(body) = std::str::from_utf8(data) {
        // Neither path may panic, with or without a key
        let _ = parse_response(body, None);
        if let Ok(parsed) = parse_response(body, Some(KEY)) {
            let success = parsed.is_success();
            assert_eq!(success, parsed.into_result().is_ok());
        }
    }
});
