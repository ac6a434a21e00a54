//! Identity key store
//!
//! Holds the long-lived RSA private key that signs every request and
//! unwraps negotiated session keys. The key is read from its container on
//! first use and kept for the lifetime of the store.
//!
//! # Container formats
//!
//! - PKCS#12 (`.pfx` / `.p12`), as issued for the service, opened with the
//!   extraction password. Both legacy (3DES / RC2, SHA-1 MAC) and current
//!   OpenSSL (PBES2 AES, SHA-2 MAC) containers are read
//! - PEM `ENCRYPTED PRIVATE KEY` (PKCS#8, password protected)
//! - PEM `PRIVATE KEY` (PKCS#8) and `RSA PRIVATE KEY` (PKCS#1)
//! - Bare DER in either PKCS#8 or PKCS#1 encoding

use std::path::{Path, PathBuf};
use std::sync::Arc;

use pkcs8::DecodePrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use tokio::sync::OnceCell;
use tracing::{debug, info};
use zeroize::Zeroizing;

use efris_core::{crypto, Error, Result};

use crate::pkcs12;

enum KeySource {
    File {
        path: PathBuf,
        password: Zeroizing<String>,
    },
    Memory,
}

/// Lazily loaded identity key
pub struct IdentityKeyStore {
    source: KeySource,
    key: OnceCell<Arc<RsaPrivateKey>>,
}

impl std::fmt::Debug for IdentityKeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("IdentityKeyStore");
        if let KeySource::File { path, .. } = &self.source {
            s.field("path", path);
        }
        s.field("loaded", &self.is_loaded()).finish()
    }
}

impl IdentityKeyStore {
    /// Store backed by a container file, read on first use
    pub fn new(path: impl Into<PathBuf>, password: impl Into<String>) -> Self {
        Self {
            source: KeySource::File {
                path: path.into(),
                password: Zeroizing::new(password.into()),
            },
            key: OnceCell::new(),
        }
    }

    /// Store holding an already decoded key
    pub fn from_key(key: RsaPrivateKey) -> Self {
        Self {
            source: KeySource::Memory,
            key: OnceCell::from(Arc::new(key)),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.key.initialized()
    }

    /// The private key, reading the container on the first call.
    ///
    /// Concurrent first callers share one extraction. A failed load leaves
    /// the store empty, so the next call reads the container again.
    pub async fn load(&self) -> Result<Arc<RsaPrivateKey>> {
        let key = self
            .key
            .get_or_try_init(|| async {
                let KeySource::File { path, password } = &self.source else {
                    return Err(Error::Authentication("No identity key configured".to_string()));
                };

                let path = path.clone();
                let password = password.clone();
                let key = tokio::task::spawn_blocking(move || read_identity(&path, &password))
                    .await
                    .map_err(|e| Error::Authentication(format!("Key loading task failed: {}", e)))??;

                info!("Identity key loaded");
                Ok(Arc::new(key))
            })
            .await?;
        Ok(Arc::clone(key))
    }

    /// Sign `data` with the identity key
    pub async fn sign(&self, data: &[u8]) -> Result<String> {
        let key = self.load().await?;
        crypto::sign(data, &key)
    }

    pub async fn public_key(&self) -> Result<RsaPublicKey> {
        let key = self.load().await?;
        Ok(RsaPublicKey::from(key.as_ref()))
    }
}

/// Read and decode a key container from disk
pub fn read_identity(path: &Path, password: &str) -> Result<RsaPrivateKey> {
    let data = std::fs::read(path).map_err(|e| {
        Error::Authentication(format!("Cannot read key container {}: {}", path.display(), e))
    })?;
    debug!(path = %path.display(), bytes = data.len(), "Read key container");
    parse_identity(&data, password)
}

/// Decode a key container held in memory
pub fn parse_identity(data: &[u8], password: &str) -> Result<RsaPrivateKey> {
    match std::str::from_utf8(data) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN") => parse_pem(text.trim(), password),
        _ => parse_der(data, password),
    }
}

fn parse_pem(text: &str, password: &str) -> Result<RsaPrivateKey> {
    if text.contains("BEGIN ENCRYPTED PRIVATE KEY") {
        RsaPrivateKey::from_pkcs8_encrypted_pem(text, password.as_bytes())
            .map_err(|e| Error::Authentication(format!("Cannot decrypt private key: {}", e)))
    } else if text.contains("BEGIN RSA PRIVATE KEY") {
        RsaPrivateKey::from_pkcs1_pem(text)
            .map_err(|e| Error::Authentication(format!("Invalid PKCS#1 private key: {}", e)))
    } else if text.contains("BEGIN PRIVATE KEY") {
        RsaPrivateKey::from_pkcs8_pem(text)
            .map_err(|e| Error::Authentication(format!("Invalid PKCS#8 private key: {}", e)))
    } else {
        Err(Error::Authentication(
            "PEM container holds no private key".to_string(),
        ))
    }
}

fn parse_der(data: &[u8], password: &str) -> Result<RsaPrivateKey> {
    if let Some(pfx) = pkcs12::parse(data) {
        let der = pkcs12::private_key(&pfx, password)?;
        return RsaPrivateKey::from_pkcs8_der(&der)
            .map_err(|e| Error::Authentication(format!("Invalid private key in container: {}", e)));
    }
    RsaPrivateKey::from_pkcs8_der(data)
        .or_else(|_| RsaPrivateKey::from_pkcs1_der(data))
        .map_err(|_| Error::Authentication("Unrecognized key container format".to_string()))
}
