//! PKCS#12 key extraction
//!
//! The `p12` crate parses the container structure but only decrypts the
//! legacy PKCS#12 PBE schemes and only verifies SHA-1 MACs. Containers
//! written by current OpenSSL use PBES2 (PBKDF2 + AES-CBC) and a SHA-256
//! MAC, so integrity checking and bag decryption are done here:
//!
//! - MAC: HMAC over SHA-1, SHA-224, SHA-256, SHA-384 or SHA-512 with the
//!   PKCS#12 key derivation (RFC 7292, appendix B)
//! - PBES2 content and shrouded key bags: via `pkcs5`
//! - Legacy 3DES / RC2 schemes: via `p12`
//!
//! Nothing in here panics on container bytes; every failure is an
//! [`Error::Authentication`].

use hmac::digest::core_api::BlockSizeUser;
use hmac::digest::Digest;
use hmac::{Mac, SimpleHmac};
use p12::{AlgorithmIdentifier, ContentInfo, SafeBag, SafeBagKind, PFX};
use pkcs8::der::{AnyRef, Decode};
use pkcs8::pkcs5::pbes2;
use sha1::Sha1;
use sha2::{Sha224, Sha256, Sha384, Sha512};
use tracing::debug;
use zeroize::Zeroizing;

use efris_core::{Error, Result};

const OID_SHA224: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 4];
const OID_SHA256: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 1];
const OID_SHA384: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 2];
const OID_SHA512: &[u64] = &[2, 16, 840, 1, 101, 3, 4, 2, 3];
const OID_PBES2: &[u64] = &[1, 2, 840, 113_549, 1, 5, 13];
const OID_KEY_BAG: &[u64] = &[1, 2, 840, 113_549, 1, 12, 10, 1, 1];

/// Diversifier selecting MAC key material in the PKCS#12 KDF
const MAC_KEY_ID: u8 = 3;

fn auth_failure(msg: impl Into<String>) -> Error {
    Error::Authentication(msg.into())
}

/// Parse `data` as a PFX, or `None` when it is not one
pub fn parse(data: &[u8]) -> Option<PFX> {
    PFX::parse(data).ok()
}

/// First private key in the container, as PKCS#8 DER
pub fn private_key(pfx: &PFX, password: &str) -> Result<Zeroizing<Vec<u8>>> {
    let auth_safe = match &pfx.auth_safe {
        ContentInfo::Data(data) => data,
        _ => return Err(auth_failure("Unsupported PKCS#12 integrity mode")),
    };

    let bmp = bmp_password(password);
    verify_mac(pfx, auth_safe, &bmp)?;

    let contents = yasna::parse_der(auth_safe, |r| r.collect_sequence_of(ContentInfo::parse))
        .map_err(|e| auth_failure(format!("Malformed key container: {}", e)))?;

    for content in &contents {
        let plain = match content {
            ContentInfo::Data(data) => Zeroizing::new(data.clone()),
            ContentInfo::EncryptedData(encrypted) => {
                let info = &encrypted.encrypted_content_info;
                decrypt(
                    &info.content_encryption_algorithm,
                    &info.encrypted_content,
                    password,
                    &bmp,
                )?
            }
            ContentInfo::OtherContext(_) => continue,
        };

        let bags = yasna::parse_der(&plain, |r| r.collect_sequence_of(SafeBag::parse))
            .map_err(|e| auth_failure(format!("Malformed key container: {}", e)))?;
        for bag in &bags {
            if let Some(key) = key_from_bag(bag, password, &bmp)? {
                return Ok(key);
            }
        }
    }

    Err(auth_failure("Key container holds no private key"))
}

fn key_from_bag(bag: &SafeBag, password: &str, bmp: &[u8]) -> Result<Option<Zeroizing<Vec<u8>>>> {
    match &bag.bag {
        SafeBagKind::Pkcs8ShroudedKeyBag(shrouded) => decrypt(
            &shrouded.encryption_algorithm,
            &shrouded.encrypted_data,
            password,
            bmp,
        )
        .map(Some),
        SafeBagKind::OtherBagKind(other) if other.bag_id.components().as_slice() == OID_KEY_BAG => {
            Ok(Some(Zeroizing::new(other.bag_value.clone())))
        }
        _ => Ok(None),
    }
}

/// Decrypt with either PBES2 (raw password bytes) or a legacy PKCS#12
/// scheme (BMP password)
fn decrypt(
    algorithm: &AlgorithmIdentifier,
    ciphertext: &[u8],
    password: &str,
    bmp: &[u8],
) -> Result<Zeroizing<Vec<u8>>> {
    match algorithm {
        AlgorithmIdentifier::OtherAlg(other) => {
            if other.algorithm_type.components().as_slice() != OID_PBES2 {
                return Err(auth_failure(format!(
                    "Unsupported key container cipher {}",
                    other.algorithm_type
                )));
            }
            let params = other
                .params
                .as_deref()
                .ok_or_else(|| auth_failure("PBES2 parameters missing"))?;
            let params = AnyRef::from_der(params)
                .and_then(pbes2::Parameters::try_from)
                .map_err(|e| auth_failure(format!("Invalid PBES2 parameters: {}", e)))?;
            params
                .decrypt(password.as_bytes(), ciphertext)
                .map(Zeroizing::new)
                .map_err(|_| auth_failure("Cannot decrypt key container"))
        }
        AlgorithmIdentifier::Sha1 => Err(auth_failure("Key container names a digest as cipher")),
        legacy => legacy
            .decrypt_pbe(ciphertext, bmp)
            .map(Zeroizing::new)
            .ok_or_else(|| auth_failure("Cannot decrypt key container")),
    }
}

fn verify_mac(pfx: &PFX, auth_safe: &[u8], bmp: &[u8]) -> Result<()> {
    let Some(mac_data) = &pfx.mac_data else {
        debug!("Key container carries no MAC");
        return Ok(());
    };

    let salt = &mac_data.salt;
    let iterations = mac_data.iterations;
    let expected = &mac_data.mac.digest;

    let valid = match &mac_data.mac.digest_algorithm {
        AlgorithmIdentifier::Sha1 => hmac_matches::<Sha1>(bmp, salt, iterations, auth_safe, expected),
        AlgorithmIdentifier::OtherAlg(other) => {
            let oid = other.algorithm_type.components().as_slice();
            if oid == OID_SHA256 {
                hmac_matches::<Sha256>(bmp, salt, iterations, auth_safe, expected)
            } else if oid == OID_SHA512 {
                hmac_matches::<Sha512>(bmp, salt, iterations, auth_safe, expected)
            } else if oid == OID_SHA384 {
                hmac_matches::<Sha384>(bmp, salt, iterations, auth_safe, expected)
            } else if oid == OID_SHA224 {
                hmac_matches::<Sha224>(bmp, salt, iterations, auth_safe, expected)
            } else {
                return Err(auth_failure(format!(
                    "Unsupported key container MAC {}",
                    other.algorithm_type
                )));
            }
        }
        _ => return Err(auth_failure("Unsupported key container MAC")),
    }?;

    if valid {
        Ok(())
    } else {
        Err(auth_failure("Wrong password for key container"))
    }
}

fn hmac_matches<D>(
    bmp: &[u8],
    salt: &[u8],
    iterations: u32,
    data: &[u8],
    expected: &[u8],
) -> Result<bool>
where
    D: Digest + BlockSizeUser,
{
    let key = derive_mac_key::<D>(bmp, salt, iterations);
    let mut mac = <SimpleHmac<D> as Mac>::new_from_slice(&key)
        .map_err(|_| auth_failure("Invalid MAC key length"))?;
    mac.update(data);
    Ok(mac.verify_slice(expected).is_ok())
}

/// PKCS#12 KDF for the MAC key.
///
/// The MAC key is exactly one digest long, so a single round of the
/// derivation suffices and the `I` block update is never needed.
fn derive_mac_key<D>(bmp: &[u8], salt: &[u8], iterations: u32) -> Zeroizing<Vec<u8>>
where
    D: Digest + BlockSizeUser,
{
    let v = D::block_size();
    let mut input = Zeroizing::new(vec![MAC_KEY_ID; v]);
    input.extend_from_slice(&stretch(salt, v));
    input.extend_from_slice(&stretch(bmp, v));

    let mut a = Zeroizing::new(D::digest(input.as_slice()).to_vec());
    for _ in 1..iterations.max(1) {
        let next = D::digest(a.as_slice());
        a.copy_from_slice(&next);
    }
    a
}

/// Repeat `data` to the next multiple of `v` bytes (empty stays empty)
fn stretch(data: &[u8], v: usize) -> Zeroizing<Vec<u8>> {
    let len = v * ((data.len() + v - 1) / v);
    Zeroizing::new(data.iter().copied().cycle().take(len).collect())
}

/// Password as a null-terminated big-endian UTF-16 string
fn bmp_password(password: &str) -> Zeroizing<Vec<u8>> {
    let mut bytes = Zeroizing::new(Vec::with_capacity(password.len() * 2 + 2));
    for unit in password.encode_utf16() {
        bytes.extend_from_slice(&unit.to_be_bytes());
    }
    bytes.extend_from_slice(&[0, 0]);
    bytes
}
