//! High-level client
//!
//! Wires configuration, transport, identity key, session key manager and
//! dispatcher together, and exposes one method per commonly used
//! operation. Payload-bearing methods validate against the schema
//! descriptors before anything is signed or sent.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde_json::{json, Value};
use tracing::info;

use efris_core::{registry, schema, Clock, Content, ParsedEnvelope, Result, SystemClock, TimeSource};

use crate::config::ClientConfig;
use crate::dispatcher::{resolve, CallOptions, Dispatcher};
use crate::identity::IdentityKeyStore;
use crate::session::{SessionKey, SessionKeyManager};
use crate::time_sync::{self, SyncReport, TimeSyncPolicy};
use crate::transport::{HttpTransport, Transport};

/// Client for the EFRIS web service
pub struct EfrisClient {
    config: ClientConfig,
    identity: Arc<IdentityKeyStore>,
    dispatcher: Dispatcher,
    sync_policy: TimeSyncPolicy,
}

impl EfrisClient {
    /// Client over HTTPS using the wall clock.
    ///
    /// The identity key is read lazily, on the first call that signs.
    pub fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;
        let identity = IdentityKeyStore::new(&config.key_path, config.key_password.as_str());
        Ok(Self::from_parts(
            config,
            Arc::new(HttpTransport::new()?),
            identity,
            Arc::new(SystemClock),
        ))
    }

    /// Client over caller-supplied parts; the configuration is not validated
    pub fn from_parts(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
        identity: IdentityKeyStore,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let identity = Arc::new(identity);
        let codec = efris_core::EnvelopeCodec::new(config.caller(), TimeSource::new(clock));
        let url = config.base_url();

        let session = Arc::new(
            SessionKeyManager::new(
                Arc::clone(&transport),
                Arc::clone(&identity),
                codec.clone(),
                url,
            )
            .with_timeout(config.key_exchange_timeout())
            .with_ttl(config.session_key_ttl()),
        );
        let dispatcher = Dispatcher::new(transport, Arc::clone(&identity), session, codec, url)
            .with_timeout(config.request_timeout());

        info!(environment = ?config.environment, tin = %config.tin, "EFRIS client ready");
        Self {
            sync_policy: TimeSyncPolicy::from_config(&config),
            config,
            identity,
            dispatcher,
        }
    }

    pub fn with_sync_policy(mut self, policy: TimeSyncPolicy) -> Self {
        self.sync_policy = policy;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn identity(&self) -> &IdentityKeyStore {
        &self.identity
    }

    pub fn session(&self) -> &SessionKeyManager {
        self.dispatcher.session()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Raw call; the remote status is left for the caller to interpret
    pub async fn call(
        &self,
        operation_key: &str,
        payload: &Value,
        options: CallOptions,
    ) -> Result<ParsedEnvelope> {
        self.dispatcher.call(operation_key, payload, options).await
    }

    /// Server time, `DD/MM/YYYY hh:mm:ss`
    pub async fn server_time(&self) -> Result<String> {
        time_sync::server_time(&self.dispatcher).await
    }

    pub async fn ensure_time_synchronized(&self) -> Result<SyncReport> {
        time_sync::ensure_time_synchronized(&self.dispatcher, &self.sync_policy).await
    }

    /// T102
    pub async fn client_init(&self) -> Result<Value> {
        self.request(registry::CLIENT_INIT, &json!({ "otherInfo": "" }))
            .await
    }

    /// T103
    pub async fn sign_in(&self) -> Result<Value> {
        self.request(registry::SIGN_IN, &Value::Null).await
    }

    /// T104, served from the cache unless `force` is set
    pub async fn symmetric_key(&self, force: bool) -> Result<SessionKey> {
        self.session().fetch(force).await
    }

    /// T109
    pub async fn upload_invoice(&self, invoice: &Value) -> Result<Value> {
        self.request(registry::BILLING_UPLOAD, invoice).await
    }

    /// T106
    pub async fn query_invoices(&self, query: &Value) -> Result<Value> {
        self.request(registry::INVOICE_QUERY, query).await
    }

    /// T119
    pub async fn query_taxpayer(&self, tin: &str, nin_brn: Option<&str>) -> Result<Value> {
        let mut query = json!({ "tin": tin });
        if let Some(nin_brn) = nin_brn {
            query["ninBrn"] = json!(nin_brn);
        }
        self.request(registry::QUERY_TAXPAYER, &query).await
    }

    /// T121
    pub async fn exchange_rate(&self, currency: &str, issue_date: Option<&str>) -> Result<Value> {
        let mut query = json!({ "currency": currency });
        if let Some(issue_date) = issue_date {
            query["issueDate"] = json!(issue_date);
        }
        self.request(registry::EXCHANGE_RATE, &query).await
    }

    /// T127
    pub async fn query_goods(&self, query: &Value) -> Result<Value> {
        self.request(registry::GOODS_INQUIRY, query).await
    }

    /// T130, one entry per product
    pub async fn upload_goods(&self, goods: &Value) -> Result<Value> {
        self.request(registry::GOODS_UPLOAD, goods).await
    }

    /// T131
    pub async fn maintain_stock(&self, stock: &Value) -> Result<Value> {
        self.request(registry::STOCK_MAINTAIN, stock).await
    }

    /// Validate, send with the registry's flags, and insist on success
    async fn request(&self, operation_key: &str, payload: &Value) -> Result<Value> {
        let code = resolve(operation_key)?.code;
        let payload = schema::validate(code, payload)?;

        let parsed = self
            .dispatcher
            .call_registered(operation_key, &payload)
            .await?
            .into_result()?;

        let content = match parsed.content {
            Content::Json(value) => value,
            Content::Text(text) => Value::String(text),
            Content::Binary(bytes) => Value::String(STANDARD.encode(bytes)),
            Content::Empty => Value::Null,
        };
        schema::check_response(code, &content);
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{response_body, test_key, FakeTransport, ManualClock};
    use crate::transport::TransportResponse;
    use efris_core::Error;
    use std::path::PathBuf;

    fn config() -> ClientConfig {
        ClientConfig {
            key_path: PathBuf::from("/nonexistent/key.pfx"),
            key_password: "secret".to_string(),
            tin: "1000000000".to_string(),
            device_no: "TCS0001".to_string(),
            ..ClientConfig::default()
        }
    }

    fn client(transport: Arc<FakeTransport>) -> EfrisClient {
        EfrisClient::from_parts(
            config(),
            transport,
            IdentityKeyStore::from_key(test_key().clone()),
            ManualClock::new(),
        )
    }

    #[test]
    fn test_new_validates_config() {
        let result = EfrisClient::new(ClientConfig::default());
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_invalid_payload_is_not_sent() {
        let transport = FakeTransport::service();
        let client = client(transport.clone());

        let err = client.query_taxpayer("", None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_query_taxpayer() {
        let transport = FakeTransport::service();
        let client = client(transport.clone());

        let content = client.query_taxpayer("1000000000", Some("80020000000001")).await.unwrap();
        assert_eq!(content, json!({ "ok": true }));
        assert_eq!(transport.interface_codes(), vec!["T104", "T119"]);
    }

    #[tokio::test]
    async fn test_binary_content_is_returned_as_base64() {
        let raw = [0x50u8, 0x4b, 0x03, 0x04, 0xff, 0xd8];
        let transport = FakeTransport::new(move |_| {
            TransportResponse::ok(response_body("00", &STANDARD.encode(raw), "0", "1"))
        });
        let content = client(transport).sign_in().await.unwrap();
        assert_eq!(content, Value::String(STANDARD.encode(raw)));
    }

    #[tokio::test]
    async fn test_remote_failure_is_raised() {
        let transport = FakeTransport::new(|_| {
            TransportResponse::ok(response_body("2124", &STANDARD.encode("{}"), "0", "1"))
        });
        let err = client(transport).sign_in().await.unwrap_err();
        assert_eq!(err, Error::remote("2124", "SUCCESS"));
    }

    #[tokio::test]
    async fn test_symmetric_key_uses_cache() {
        let transport = FakeTransport::service();
        let client = client(transport.clone());

        client.symmetric_key(false).await.unwrap();
        client.symmetric_key(false).await.unwrap();
        assert_eq!(transport.calls(), 1);

        client.symmetric_key(true).await.unwrap();
        assert_eq!(transport.calls(), 2);
    }
}
