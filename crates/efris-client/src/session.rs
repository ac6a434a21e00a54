//! Session key manager
//!
//! The service hands out a short-lived AES key (T104), wrapped with the
//! caller's public key. This module negotiates it, caches it until its TTL
//! runs out, and makes concurrent callers share one negotiation.
//!
//! # States
//!
//! - **Absent**: nothing cached, or the key was forgotten
//! - **Valid**: a key and the instant it was fetched; it stops being served
//!   once `now - fetched_at >= ttl`

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};
use zeroize::Zeroizing;

use efris_core::envelope::parse_response;
use efris_core::{crypto, EnvelopeCodec, Error, Result, KEY_EXCHANGE_TIMEOUT_SECS, SESSION_KEY_TTL_SECS};

use crate::identity::IdentityKeyStore;
use crate::transport::Transport;

/// Interface code of the key exchange
pub const KEY_EXCHANGE_CODE: &str = "T104";

/// Field carrying the wrapped key; the service misspells it
const WRAPPED_KEY_FIELDS: [&str; 2] = ["passowrdDes", "passwordDes"];

/// A negotiated symmetric key
#[derive(Clone)]
pub struct SessionKey {
    key: Zeroizing<Vec<u8>>,
    fetched_at: DateTime<Utc>,
}

impl SessionKey {
    pub fn new(key: Zeroizing<Vec<u8>>, fetched_at: DateTime<Utc>) -> Self {
        Self { key, fetched_at }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.key
    }

    /// Hex form, as the key is usually kept in configuration
    pub fn to_hex(&self) -> Zeroizing<String> {
        Zeroizing::new(hex::encode(self.key.as_slice()))
    }

    pub fn fetched_at(&self) -> DateTime<Utc> {
        self.fetched_at
    }

    fn is_fresh(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        // A clock that stepped backwards counts as no time elapsed
        let elapsed = (now - self.fetched_at).to_std().unwrap_or(Duration::ZERO);
        elapsed < ttl
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("len", &self.key.len())
            .field("fetched_at", &self.fetched_at)
            .finish()
    }
}

#[derive(Default)]
struct NegotiationLog {
    last_error: Option<Error>,
}

/// Negotiates and caches the session key
pub struct SessionKeyManager {
    transport: Arc<dyn Transport>,
    identity: Arc<IdentityKeyStore>,
    codec: EnvelopeCodec,
    url: String,
    timeout: Duration,
    ttl: Duration,
    state: Mutex<Option<SessionKey>>,
    /// Bumped each time a negotiation finishes, successfully or not
    generation: AtomicU64,
    negotiation: tokio::sync::Mutex<NegotiationLog>,
}

impl SessionKeyManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<IdentityKeyStore>,
        codec: EnvelopeCodec,
        url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            identity,
            codec,
            url: url.into(),
            timeout: Duration::from_secs(KEY_EXCHANGE_TIMEOUT_SECS),
            ttl: Duration::from_secs(SESSION_KEY_TTL_SECS),
            state: Mutex::new(None),
            generation: AtomicU64::new(0),
            negotiation: tokio::sync::Mutex::new(NegotiationLog::default()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// The session key, negotiating a new one when none is fresh or `force`
    /// is set.
    ///
    /// Callers arriving while a negotiation is in flight wait for it and
    /// receive its key or a copy of its error instead of starting another.
    pub async fn fetch(&self, force: bool) -> Result<SessionKey> {
        // Read before the cache check: a negotiation finishing in between
        // is then either visible in the cache or in the generation
        let observed = self.generation.load(Ordering::SeqCst);
        if !force {
            if let Some(key) = self.current() {
                return Ok(key);
            }
        }

        let mut log = self.negotiation.lock().await;

        if self.generation.load(Ordering::SeqCst) != observed {
            if let Some(err) = &log.last_error {
                debug!("Sharing result of concurrent negotiation (failed)");
                return Err(err.clone());
            }
            if let Some(key) = self.current() {
                debug!("Sharing result of concurrent negotiation");
                return Ok(key);
            }
        }

        let result = self.negotiate().await;
        match &result {
            Ok(key) => {
                *self.lock_state() = Some(key.clone());
                log.last_error = None;
            }
            Err(err) => log.last_error = Some(err.clone()),
        }
        self.generation.fetch_add(1, Ordering::SeqCst);
        result
    }

    /// Drop the cached key
    pub fn forget(&self) {
        *self.lock_state() = None;
        debug!("Session key forgotten");
    }

    pub fn is_valid(&self) -> bool {
        self.current().is_some()
    }

    /// When the cached key stops being served, if there is one
    pub fn valid_until(&self) -> Option<DateTime<Utc>> {
        let fetched_at = self.lock_state().as_ref()?.fetched_at;
        let ttl = chrono::Duration::from_std(self.ttl).ok()?;
        fetched_at.checked_add_signed(ttl)
    }

    fn current(&self) -> Option<SessionKey> {
        let now = self.codec.time().now_utc();
        self.lock_state()
            .as_ref()
            .filter(|key| key.is_fresh(now, self.ttl))
            .cloned()
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<SessionKey>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn negotiate(&self) -> Result<SessionKey> {
        info!("Negotiating session key");
        let signer = self.identity.load().await?;

        // Step 1: empty, signed, unencrypted request
        let envelope = self
            .codec
            .build_signed_plain(&Value::Null, KEY_EXCHANGE_CODE, Some(signer.as_ref()))?;
        let body = serde_json::to_string(&envelope)
            .map_err(|e| Error::Encryption(format!("Cannot encode key exchange request: {}", e)))?;

        // Step 2: round trip
        let response = self.transport.post_json(&self.url, body, self.timeout).await?;
        if !response.is_ok() {
            return Err(Error::api(response.status, response.body));
        }

        // Step 3: status and content
        let parsed = parse_response(&response.body, None)?.into_result()?;
        let wrapped = parsed
            .content
            .as_json()
            .and_then(|content| {
                WRAPPED_KEY_FIELDS
                    .iter()
                    .find_map(|field| content.get(*field).and_then(Value::as_str))
            })
            .ok_or_else(|| {
                Error::Encryption("Key exchange response carries no key material".to_string())
            })?;

        // Step 4: unwrap with the identity key
        let key = crypto::unwrap_symmetric_key(wrapped, &signer)?;
        let fetched_at = self.codec.time().now_utc();

        info!(key_len = key.len(), "Session key negotiated");
        Ok(SessionKey::new(key, fetched_at))
    }
}
