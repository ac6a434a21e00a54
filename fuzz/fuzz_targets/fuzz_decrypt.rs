#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use efris_core::crypto;

#[derive(Arbitrary, Debug)]
struct Input {
    key: [u8; 16],
    content: String,
    plaintext: Vec<u8>,
    encrypted: bool,
    compressed: bool,
}

fuzz_target!(|input: Input| {
    // Arbitrary content must be rejected cleanly
    let _ = crypto::decrypt(
        &input.content,
        Some(input.key.as_slice()),
        input.encrypted,
        input.compressed,
    );

    // Anything we encrypt must come back unchanged
    if let Ok(ciphertext) = crypto::encrypt(&input.plaintext, &input.key) {
        let decrypted = crypto::decrypt(&ciphertext, Some(input.key.as_slice()), true, false);
        assert_eq!(decrypted.ok(), Some(input.plaintext));
    }
});
