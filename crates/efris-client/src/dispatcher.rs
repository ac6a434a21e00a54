//! Request dispatch
//!
//! One generic `call` turns an operation key and a JSON payload into a
//! signed (and optionally encrypted) envelope, posts it, and decodes the
//! reply. The remote status block is handed back untouched.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::debug;

use efris_core::envelope::parse_response;
use efris_core::error::STATUS_CLIENT_ERROR;
use efris_core::{registry, EnvelopeCodec, Error, ParsedEnvelope, Result, REQUEST_TIMEOUT_SECS};

use crate::identity::IdentityKeyStore;
use crate::session::SessionKeyManager;
use crate::transport::Transport;

/// Per-call encryption flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallOptions {
    /// Send the payload AES-encrypted
    pub encrypt: bool,
    /// Decrypt binary-framed response content
    pub decrypt: bool,
}

impl CallOptions {
    pub const PLAIN: Self = Self {
        encrypt: false,
        decrypt: false,
    };

    pub const ENCRYPTED: Self = Self {
        encrypt: true,
        decrypt: true,
    };

    /// Flags the registry records for an operation
    pub fn for_interface(interface: &registry::Interface) -> Self {
        if interface.encrypted {
            Self::ENCRYPTED
        } else {
            Self::PLAIN
        }
    }

    fn needs_session_key(self) -> bool {
        self.encrypt || self.decrypt
    }
}

/// Sends envelopes to the service
pub struct Dispatcher {
    transport: Arc<dyn Transport>,
    identity: Arc<IdentityKeyStore>,
    session: Arc<SessionKeyManager>,
    codec: EnvelopeCodec,
    url: String,
    timeout: Duration,
}

impl Dispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        identity: Arc<IdentityKeyStore>,
        session: Arc<SessionKeyManager>,
        codec: EnvelopeCodec,
        url: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            identity,
            session,
            codec,
            url: url.into(),
            timeout: Duration::from_secs(REQUEST_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<SessionKeyManager> {
        &self.session
    }

    pub fn codec(&self) -> &EnvelopeCodec {
        &self.codec
    }

    /// Call an operation with the encryption flags from the registry
    pub async fn call_registered(&self, operation_key: &str, payload: &Value) -> Result<ParsedEnvelope> {
        let interface = resolve(operation_key)?;
        self.call(operation_key, payload, CallOptions::for_interface(interface))
            .await
    }

    /// Call an operation.
    ///
    /// Fails before any network traffic when the key is unknown or the
    /// session key cannot be obtained. A non-success remote status is not an
    /// error here; see [`ParsedEnvelope::into_result`].
    pub async fn call(
        &self,
        operation_key: &str,
        payload: &Value,
        options: CallOptions,
    ) -> Result<ParsedEnvelope> {
        let interface = resolve(operation_key)?;

        let session_key = if options.needs_session_key() {
            let key = self.session.fetch(false).await.map_err(|e| match e {
                Error::Encryption(_) | Error::Authentication(_) => e,
                other => Error::Encryption(format!("Session key unavailable: {}", other)),
            })?;
            Some(key)
        } else {
            None
        };

        let signer = self.identity.load().await?;

        let envelope = match &session_key {
            Some(key) if options.encrypt => {
                self.codec
                    .build_signed_encrypted(payload, key.bytes(), interface.code, &signer)?
            }
            _ => self
                .codec
                .build_signed_plain(payload, interface.code, Some(signer.as_ref()))?,
        };

        let body = serde_json::to_string(&envelope)
            .map_err(|e| Error::Encryption(format!("Cannot encode request: {}", e)))?;
        debug!(
            interface = interface.code,
            exchange_id = %envelope.global_info.data_exchange_id,
            encrypted = options.encrypt,
            "Dispatching request"
        );

        let response = self.transport.post_json(&self.url, body, self.timeout).await?;
        if !response.is_ok() {
            debug!(interface = interface.code, status = response.status, "HTTP failure");
            return Err(Error::api(response.status, response.body));
        }

        let decrypt_key = session_key
            .as_ref()
            .filter(|_| options.decrypt)
            .map(|key| key.bytes());
        let parsed = parse_response(&response.body, decrypt_key)?;

        debug!(
            interface = interface.code,
            return_code = %parsed.return_state.return_code,
            "Response decoded"
        );
        Ok(parsed)
    }
}

pub(crate) fn resolve(operation_key: &str) -> Result<&'static registry::Interface> {
    registry::lookup(operation_key).ok_or_else(|| {
        Error::api(
            STATUS_CLIENT_ERROR,
            format!("Unknown operation: {}", operation_key),
        )
    })
}
