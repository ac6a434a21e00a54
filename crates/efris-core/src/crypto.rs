//! Cryptographic primitives for the envelope protocol
//!
//! - AES in ECB mode with PKCS#7 padding for payload content. The remote
//!   protocol mandates ECB, so output is deterministic per key and plaintext.
//! - RSA PKCS#1 v1.5 with SHA-1 for request signatures.
//! - RSA PKCS#1 v1.5 decryption for unwrapping the negotiated session key.
//! - Optional gzip framing on response content.

use std::io::{Read, Write};

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::{Digest, Sha1};
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Accepted AES key lengths (AES-128, AES-192, AES-256)
pub const VALID_KEY_LENGTHS: [usize; 3] = [16, 24, 32];

/// Length the service uses for its short-key quirk
const SHORT_KEY_LENGTH: usize = 8;

/// Leading bytes of every gzip member
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Whether `len` is a usable AES key length
pub fn is_valid_key_length(len: usize) -> bool {
    VALID_KEY_LENGTHS.contains(&len)
}

/// Accept a symmetric key as hex text or as raw bytes.
///
/// Even-length all-hex input that decodes to 16, 24 or 32 bytes is
/// hex-decoded; anything else is returned unchanged.
pub fn normalize_symmetric_key(raw: &[u8]) -> Zeroizing<Vec<u8>> {
    if !raw.is_empty() && raw.len() % 2 == 0 && raw.iter().all(u8::is_ascii_hexdigit) {
        if let Ok(decoded) = hex::decode(raw) {
            let decoded = Zeroizing::new(decoded);
            if is_valid_key_length(decoded.len()) {
                return decoded;
            }
        }
    }
    Zeroizing::new(raw.to_vec())
}

/// Generate a random AES key of the given length
pub fn generate_symmetric_key(len: usize) -> Result<Zeroizing<Vec<u8>>> {
    if !is_valid_key_length(len) {
        return Err(Error::Encryption(format!("Invalid AES key length: {}", len)));
    }
    let mut key = Zeroizing::new(vec![0u8; len]);
    rand::rngs::OsRng.fill_bytes(&mut key);
    Ok(key)
}

/// AES block cipher sized to the key
enum EcbCipher {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl EcbCipher {
    fn new(key: &[u8]) -> Result<Self> {
        let cipher = match key.len() {
            16 => Aes128::new_from_slice(key).map(Self::Aes128),
            24 => Aes192::new_from_slice(key).map(Self::Aes192),
            32 => Aes256::new_from_slice(key).map(Self::Aes256),
            n => {
                return Err(Error::Encryption(format!(
                    "Invalid AES key length: {} (expected 16, 24 or 32)",
                    n
                )))
            }
        };
        cipher.map_err(|e| Error::Encryption(format!("Invalid key: {}", e)))
    }

    fn encrypt_in_place(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.encrypt_block(block),
                Self::Aes192(c) => c.encrypt_block(block),
                Self::Aes256(c) => c.encrypt_block(block),
            }
        }
    }

    fn decrypt_in_place(&self, data: &mut [u8]) {
        for chunk in data.chunks_exact_mut(BLOCK_SIZE) {
            let block = GenericArray::from_mut_slice(chunk);
            match self {
                Self::Aes128(c) => c.decrypt_block(block),
                Self::Aes192(c) => c.decrypt_block(block),
                Self::Aes256(c) => c.decrypt_block(block),
            }
        }
    }
}

fn pkcs7_pad(data: &[u8]) -> Vec<u8> {
    let pad = BLOCK_SIZE - data.len() % BLOCK_SIZE;
    let mut padded = Vec::with_capacity(data.len() + pad);
    padded.extend_from_slice(data);
    padded.resize(data.len() + pad, pad as u8);
    padded
}

fn pkcs7_unpad(mut data: Vec<u8>) -> Result<Vec<u8>> {
    let Some(&last) = data.last() else {
        return Err(Error::Encryption("Ciphertext is empty".to_string()));
    };
    let pad = last as usize;
    if pad == 0 || pad > BLOCK_SIZE || pad > data.len() {
        return Err(Error::Encryption(format!("Invalid padding length: {}", pad)));
    }
    let body_len = data.len() - pad;
    if data[body_len..].iter().any(|&b| b != last) {
        return Err(Error::Encryption("Invalid padding bytes".to_string()));
    }
    data.truncate(body_len);
    Ok(data)
}

/// Encrypt with AES-ECB/PKCS#7 and return Base64 ciphertext
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<String> {
    let key = normalize_symmetric_key(key);
    let cipher = EcbCipher::new(&key)?;

    let mut buffer = pkcs7_pad(plaintext);
    cipher.encrypt_in_place(&mut buffer);
    Ok(STANDARD.encode(buffer))
}

/// Decode response content.
///
/// Base64-decodes, then gunzips if `compressed`, then AES-decrypts if
/// `encrypted`. Decompression runs before decryption.
pub fn decrypt(
    ciphertext_b64: &str,
    key: Option<&[u8]>,
    encrypted: bool,
    compressed: bool,
) -> Result<Vec<u8>> {
    let mut data = STANDARD
        .decode(ciphertext_b64.trim())
        .map_err(|e| Error::Encryption(format!("Invalid Base64 content: {}", e)))?;

    if compressed {
        data = gunzip(&data)?;
    }

    if !encrypted {
        return Ok(data);
    }

    let key = key.ok_or_else(|| {
        Error::Encryption("Symmetric key required to decrypt content".to_string())
    })?;
    let key = normalize_symmetric_key(key);
    let cipher = EcbCipher::new(&key)?;

    if data.len() % BLOCK_SIZE != 0 {
        return Err(Error::Encryption(format!(
            "Ciphertext length {} is not a multiple of {}",
            data.len(),
            BLOCK_SIZE
        )));
    }

    cipher.decrypt_in_place(&mut data);
    pkcs7_unpad(data)
}

/// Decompress a gzip member, rejecting input without the gzip magic
pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    if !data.starts_with(&GZIP_MAGIC) {
        return Err(Error::Encryption(
            "Content flagged as compressed is not gzip data".to_string(),
        ));
    }
    let mut out = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| Error::Encryption(format!("Corrupt gzip content: {}", e)))?;
    Ok(out)
}

/// Compress into a single gzip member
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| Error::Encryption(format!("Compression failed: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| Error::Encryption(format!("Compression failed: {}", e)))
}

/// RSA PKCS#1 v1.5 / SHA-1 signature, Base64 encoded
pub fn sign(data: &[u8], private_key: &RsaPrivateKey) -> Result<String> {
    let digest = Sha1::digest(data);
    let signature = private_key
        .sign(Pkcs1v15Sign::new::<Sha1>(), &digest)
        .map_err(|e| Error::Encryption(format!("Signing failed: {}", e)))?;
    Ok(STANDARD.encode(signature))
}

/// Verify a Base64 signature produced by [`sign`]
pub fn verify(data: &[u8], signature_b64: &str, public_key: &RsaPublicKey) -> Result<()> {
    let signature = STANDARD
        .decode(signature_b64.trim())
        .map_err(|e| Error::Encryption(format!("Invalid Base64 signature: {}", e)))?;
    let digest = Sha1::digest(data);
    public_key
        .verify(Pkcs1v15Sign::new::<Sha1>(), &digest, &signature)
        .map_err(|_| Error::Encryption("Signature verification failed".to_string()))
}

/// Recover the session key the service wrapped with our public key.
///
/// The decrypted payload is usually Base64 text of the key. A decoded
/// 8-byte key is doubled to 16 bytes, since the service has been observed
/// to hand out short keys; other invalid lengths are cut to 16 bytes.
pub fn unwrap_symmetric_key(
    wrapped_b64: &str,
    private_key: &RsaPrivateKey,
) -> Result<Zeroizing<Vec<u8>>> {
    let wrapped = STANDARD
        .decode(wrapped_b64.trim())
        .map_err(|e| Error::Encryption(format!("Invalid Base64 key material: {}", e)))?;

    let decrypted = Zeroizing::new(
        private_key
            .decrypt(Pkcs1v15Encrypt, &wrapped)
            .map_err(|e| Error::Encryption(format!("Key unwrap failed: {}", e)))?,
    );

    let candidate = match STANDARD.decode(decrypted.as_slice()) {
        Ok(decoded) if !decoded.is_empty() => Zeroizing::new(decoded),
        _ => decrypted,
    };

    let key = shape_session_key(candidate);
    if !is_valid_key_length(key.len()) {
        return Err(Error::Encryption(format!(
            "Unwrapped key has invalid length: {}",
            key.len()
        )));
    }
    Ok(key)
}

/// Apply the service's key-length rules to unwrapped key material
fn shape_session_key(mut candidate: Zeroizing<Vec<u8>>) -> Zeroizing<Vec<u8>> {
    match candidate.len() {
        SHORT_KEY_LENGTH => {
            let mut doubled = Zeroizing::new(candidate.repeat(2));
            doubled.truncate(16);
            doubled
        }
        n if is_valid_key_length(n) => candidate,
        _ => {
            candidate.truncate(16);
            candidate
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::OnceLock;

    const HEX_KEY: &str = "00112233445566778899aabbccddeeff";

    fn test_rsa_key() -> &'static RsaPrivateKey {
        static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
        KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
    }

    fn wrap(material: &[u8]) -> String {
        let public = RsaPublicKey::from(test_rsa_key());
        let wrapped = public
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, material)
            .unwrap();
        STANDARD.encode(wrapped)
    }

    #[test]
    fn test_encrypt_decrypt_hex_key() {
        let ciphertext = encrypt(br#"{"a":1}"#, HEX_KEY.as_bytes()).unwrap();
        let plaintext = decrypt(&ciphertext, Some(HEX_KEY.as_bytes()), true, false).unwrap();
        assert_eq!(plaintext, br#"{"a":1}"#);
    }

    #[test]
    fn test_hex_and_raw_key_are_equivalent() {
        let raw = hex::decode(HEX_KEY).unwrap();
        let via_hex = encrypt(b"payload", HEX_KEY.as_bytes()).unwrap();
        let via_raw = encrypt(b"payload", &raw).unwrap();
        assert_eq!(via_hex, via_raw);
    }

    #[test]
    fn test_ecb_is_deterministic_and_block_aligned() {
        let key = [7u8; 24];
        let a = encrypt(b"0123456789abcdef", &key).unwrap();
        let b = encrypt(b"0123456789abcdef", &key).unwrap();
        assert_eq!(a, b);
        // A full block of input gains a full block of padding
        assert_eq!(STANDARD.decode(a).unwrap().len(), 32);
    }

    #[test]
    fn test_encrypt_rejects_bad_key_length() {
        // 33 hex digits: odd length, so used raw, and 33 bytes is not an AES size
        let result = encrypt(b"x", b"00112233445566778899aabbccddeeff0");
        assert!(matches!(result, Err(Error::Encryption(_))));
        assert!(matches!(encrypt(b"x", &[1u8; 15]), Err(Error::Encryption(_))));
    }

    #[test]
    fn test_corrupted_last_byte_fails() {
        let ciphertext = encrypt(br#"{"a":1}"#, HEX_KEY.as_bytes()).unwrap();
        let mut raw = STANDARD.decode(ciphertext).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0x01;
        let corrupted = STANDARD.encode(raw);

        let result = decrypt(&corrupted, Some(HEX_KEY.as_bytes()), true, false);
        assert!(matches!(result, Err(Error::Encryption(_))));
    }

    #[test]
    fn test_decrypt_requires_key_when_encrypted() {
        let ciphertext = encrypt(b"secret", &[1u8; 16]).unwrap();
        assert!(matches!(
            decrypt(&ciphertext, None, true, false),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_unaligned_ciphertext() {
        let odd = STANDARD.encode([0u8; 17]);
        assert!(matches!(
            decrypt(&odd, Some(&[1u8; 16]), true, false),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_padding_rules() {
        assert_eq!(pkcs7_unpad(vec![1, 2, 3, 1]).unwrap(), vec![1, 2, 3]);
        assert!(pkcs7_unpad(vec![1, 2, 3, 0]).is_err());
        assert!(pkcs7_unpad(vec![17; 32]).is_err());
        assert!(pkcs7_unpad(vec![1, 2, 3, 3]).is_err());
        assert!(pkcs7_unpad(Vec::new()).is_err());
        assert_eq!(pkcs7_pad(&[]).len(), BLOCK_SIZE);
    }

    #[test]
    fn test_compressed_plain_content() {
        let packed = STANDARD.encode(gzip(b"hello").unwrap());
        assert_eq!(decrypt(&packed, None, false, true).unwrap(), b"hello");
    }

    #[test]
    fn test_compressed_then_encrypted_content() {
        // The service gzips the Base64-decoded ciphertext
        let key = [9u8; 32];
        let ciphertext = STANDARD.decode(encrypt(b"body", &key).unwrap()).unwrap();
        let framed = STANDARD.encode(gzip(&ciphertext).unwrap());
        assert_eq!(decrypt(&framed, Some(&key), true, true).unwrap(), b"body");
    }

    #[test]
    fn test_compressed_flag_without_gzip_fails() {
        let not_gzip = STANDARD.encode(b"plain text");
        assert!(matches!(
            decrypt(&not_gzip, None, false, true),
            Err(Error::Encryption(_))
        ));

        let mut truncated = gzip(b"some longer body of text").unwrap();
        truncated.truncate(12);
        assert!(gunzip(&truncated).is_err());
    }

    #[test]
    fn test_normalize_symmetric_key() {
        let raw = hex::decode(HEX_KEY).unwrap();
        assert_eq!(*normalize_symmetric_key(HEX_KEY.as_bytes()), raw);
        // Valid hex but 8 bytes decoded: kept as text
        assert_eq!(
            *normalize_symmetric_key(b"0011223344556677"),
            b"0011223344556677".to_vec()
        );
        assert_eq!(*normalize_symmetric_key(b"not hex at all!!"), b"not hex at all!!".to_vec());
    }

    #[test]
    fn test_sign_and_verify() {
        let key = test_rsa_key();
        let signature = sign(b"content", key).unwrap();
        let public = RsaPublicKey::from(key);
        assert!(verify(b"content", &signature, &public).is_ok());
        assert!(verify(b"other", &signature, &public).is_err());
    }

    #[test]
    fn test_unwrap_base64_key() {
        let aes_key = [0x42u8; 16];
        let wrapped = wrap(STANDARD.encode(aes_key).as_bytes());
        let key = unwrap_symmetric_key(&wrapped, test_rsa_key()).unwrap();
        assert_eq!(*key, aes_key.to_vec());
    }

    #[test]
    fn test_unwrap_short_key_is_doubled() {
        let short = *b"k8bytes!";
        let wrapped = wrap(STANDARD.encode(short).as_bytes());
        let key = unwrap_symmetric_key(&wrapped, test_rsa_key()).unwrap();
        assert_eq!(key.len(), 16);
        assert_eq!(&key[..8], &short);
        assert_eq!(&key[8..], &short);
    }

    #[test]
    fn test_unwrap_oversized_key_is_truncated() {
        let long = [0x11u8; 40];
        let wrapped = wrap(STANDARD.encode(long).as_bytes());
        let key = unwrap_symmetric_key(&wrapped, test_rsa_key()).unwrap();
        assert_eq!(*key, vec![0x11u8; 16]);
    }

    #[test]
    fn test_unwrap_too_short_key_fails() {
        let wrapped = wrap(STANDARD.encode([1u8; 5]).as_bytes());
        assert!(matches!(
            unwrap_symmetric_key(&wrapped, test_rsa_key()),
            Err(Error::Encryption(_))
        ));
    }

    #[test]
    fn test_unwrap_garbage_fails() {
        assert!(unwrap_symmetric_key("%%%", test_rsa_key()).is_err());
        assert!(unwrap_symmetric_key(&STANDARD.encode([0u8; 128]), test_rsa_key()).is_err());
    }
}
