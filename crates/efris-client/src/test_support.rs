//! Fakes shared by the unit tests in this crate

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use efris_core::{CallerIdentity, Clock, EnvelopeCodec, Result, TimeSource};

use crate::transport::{Transport, TransportResponse};

pub fn test_key() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

pub const SESSION_KEY: [u8; 16] = *b"0123456789abcdef";

/// Clock that only moves when told to
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
        )))
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.0.lock().unwrap();
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

pub fn codec(clock: Arc<ManualClock>) -> EnvelopeCodec {
    EnvelopeCodec::new(
        CallerIdentity {
            tin: "1000000000".to_string(),
            device_no: "TCS0001".to_string(),
            ..CallerIdentity::default()
        },
        TimeSource::new(clock),
    )
}

/// Envelope JSON as the service would send it
pub fn response_body(return_code: &str, content: &str, code_type: &str, encrypt_code: &str) -> String {
    json!({
        "data": {
            "content": content,
            "signature": "",
            "dataDescription": { "codeType": code_type, "encryptCode": encrypt_code, "zipCode": "0" }
        },
        "globalInfo": {},
        "returnStateInfo": { "returnCode": return_code, "returnMessage": "SUCCESS" }
    })
    .to_string()
}

/// T104 response wrapping `key` for the test identity
pub fn key_exchange_body(key: &[u8]) -> String {
    let public = RsaPublicKey::from(test_key());
    let wrapped = public
        .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, STANDARD.encode(key).as_bytes())
        .unwrap();
    let content = json!({ "passowrdDes": STANDARD.encode(wrapped), "sign": "" });
    response_body("00", &STANDARD.encode(content.to_string()), "0", "1")
}

type Responder = Box<dyn Fn(&Value) -> TransportResponse + Send + Sync>;

/// Transport answering from a closure and recording every request
pub struct FakeTransport {
    responder: Responder,
    delay: Duration,
    calls: AtomicUsize,
    requests: Mutex<Vec<Value>>,
}

impl FakeTransport {
    pub fn new(responder: impl Fn(&Value) -> TransportResponse + Send + Sync + 'static) -> Arc<Self> {
        Self::with_delay(Duration::ZERO, responder)
    }

    pub fn with_delay(
        delay: Duration,
        responder: impl Fn(&Value) -> TransportResponse + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            responder: Box::new(responder),
            delay,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    /// Answers T104 with [`SESSION_KEY`] and anything else with `{"ok": true}`
    pub fn service() -> Arc<Self> {
        Self::new(|request| {
            if request["globalInfo"]["interfaceCode"] == "T104" {
                TransportResponse::ok(key_exchange_body(&SESSION_KEY))
            } else {
                let content = STANDARD.encode(r#"{"ok":true}"#);
                TransportResponse::ok(response_body("00", &content, "0", "1"))
            }
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().unwrap().clone()
    }

    pub fn interface_codes(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r["globalInfo"]["interfaceCode"].as_str().unwrap_or_default().to_string())
            .collect()
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn post_json(&self, _url: &str, body: String, _timeout: Duration) -> Result<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let request: Value = serde_json::from_str(&body).unwrap();
        self.requests.lock().unwrap().push(request.clone());
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok((self.responder)(&request))
    }
}
