//! In-process stand-in for the EFRIS service
//!
//! [`FakeEfris`] implements the client's `Transport` and answers the way the
//! real service does: it checks request signatures against the registered
//! public key, hands out a wrapped session key on T104, decrypts encrypted
//! payloads and replies encrypted. Faults can be injected per test.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{DateTime, TimeZone, Utc};
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use serde_json::{json, Value};

use efris_client::{ClientConfig, EfrisClient, IdentityKeyStore, Transport, TransportResponse};
use efris_core::{crypto, registry, time, Clock, Result};

/// Identity key shared by every test in a binary
pub fn test_identity() -> &'static RsaPrivateKey {
    static KEY: OnceLock<RsaPrivateKey> = OnceLock::new();
    KEY.get_or_init(|| RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap())
}

/// Route test logs through the test writer
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("efris=debug")),
        )
        .try_init();
}

/// Clock that only moves when told to
pub struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    /// Starts at 2024-03-01 07:00:00 UTC (10:00 in service time)
    pub fn new() -> Arc<Self> {
        Arc::new(Self(Mutex::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 7, 0, 0).unwrap(),
        )))
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.0.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// A request the fake accepted, after decryption
#[derive(Debug, Clone)]
pub struct Received {
    pub interface_code: String,
    pub encrypted: bool,
    pub signature_valid: bool,
    pub payload: Value,
}

/// Fake EFRIS service
pub struct FakeEfris {
    client_key: RsaPublicKey,
    clock: Arc<ManualClock>,
    session_key: Mutex<Vec<u8>>,
    clock_skew: Mutex<chrono::Duration>,
    compress_replies: Mutex<bool>,
    key_exchange_delay: Duration,
    faults: Mutex<VecDeque<TransportResponse>>,
    negotiations: AtomicUsize,
    received: Mutex<Vec<Received>>,
}

impl FakeEfris {
    pub fn new(clock: Arc<ManualClock>) -> Arc<Self> {
        Self::build(clock, Duration::ZERO)
    }

    /// Fake whose key exchange takes `delay`, to widen race windows
    pub fn slow_key_exchange(clock: Arc<ManualClock>, delay: Duration) -> Arc<Self> {
        Self::build(clock, delay)
    }

    fn build(clock: Arc<ManualClock>, key_exchange_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            client_key: RsaPublicKey::from(test_identity()),
            clock,
            session_key: Mutex::new(b"fake-efris-key-1".to_vec()),
            clock_skew: Mutex::new(chrono::Duration::zero()),
            compress_replies: Mutex::new(false),
            key_exchange_delay,
            faults: Mutex::new(VecDeque::new()),
            negotiations: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
        })
    }

    /// Key handed out on the next T104
    pub fn set_session_key(&self, key: &[u8]) {
        *self.session_key.lock().unwrap() = key.to_vec();
    }

    /// Offset of the server clock from the client clock
    pub fn set_clock_skew(&self, skew: chrono::Duration) {
        *self.clock_skew.lock().unwrap() = skew;
    }

    /// Gzip encrypted reply content and flag it
    pub fn set_compress_replies(&self, on: bool) {
        *self.compress_replies.lock().unwrap() = on;
    }

    /// Answer the next request with `response` instead of handling it
    pub fn push_fault(&self, response: TransportResponse) {
        self.faults.lock().unwrap().push_back(response);
    }

    pub fn negotiations(&self) -> usize {
        self.negotiations.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Received> {
        self.received.lock().unwrap().clone()
    }

    /// Interface codes of every handled request, in order
    pub fn interface_codes(&self) -> Vec<String> {
        self.received()
            .into_iter()
            .map(|r| r.interface_code)
            .collect()
    }

    fn handle(&self, request: &Value) -> TransportResponse {
        let code = request["globalInfo"]["interfaceCode"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let content = request["data"]["content"].as_str().unwrap_or_default();
        let signature = request["data"]["signature"].as_str().unwrap_or_default();
        let encrypted = request["data"]["dataDescription"]["encryptCode"] == "2";

        let signature_valid = content.is_empty()
            || crypto::verify(content.as_bytes(), signature, &self.client_key).is_ok();

        let handed_out = self.session_key.lock().unwrap().clone();
        // Short keys are used doubled, as the client does
        let key = if handed_out.len() == 8 {
            handed_out.repeat(2)
        } else {
            handed_out.clone()
        };
        let payload = if content.is_empty() {
            Value::Null
        } else if encrypted {
            match crypto::decrypt(content, Some(key.as_slice()), true, false) {
                Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or(Value::Null),
                Err(_) => return reply_status("23", "Decryption failed"),
            }
        } else {
            STANDARD
                .decode(content)
                .ok()
                .and_then(|bytes| serde_json::from_slice(&bytes).ok())
                .unwrap_or(Value::Null)
        };

        self.received.lock().unwrap().push(Received {
            interface_code: code.clone(),
            encrypted,
            signature_valid,
            payload: payload.clone(),
        });

        if !signature_valid {
            return reply_status("05", "Signature verification failed");
        }

        match code.as_str() {
            "T101" => {
                let server_now = self.clock.now() + *self.clock_skew.lock().unwrap();
                let current = time::to_service_time(server_now)
                    .format(time::RESPONSE_FORMAT)
                    .to_string();
                reply_plain(&json!({ "currentTime": current }))
            }
            "T104" => {
                self.negotiations.fetch_add(1, Ordering::SeqCst);
                let wrapped = self
                    .client_key
                    .encrypt(
                        &mut rand::thread_rng(),
                        Pkcs1v15Encrypt,
                        STANDARD.encode(&handed_out).as_bytes(),
                    )
                    .unwrap();
                reply_plain(&json!({ "passowrdDes": STANDARD.encode(wrapped), "sign": "" }))
            }
            _ if registry::by_code(&code).map_or(false, |i| i.encrypted) => {
                let body = business_reply(&code, &payload);
                let ciphertext = crypto::encrypt(body.to_string().as_bytes(), &key).unwrap();
                if *self.compress_replies.lock().unwrap() {
                    let raw = STANDARD.decode(ciphertext).unwrap();
                    let packed = STANDARD.encode(crypto::gzip(&raw).unwrap());
                    envelope(&packed, "1", "2", "1", "00", "SUCCESS")
                } else {
                    envelope(&ciphertext, "1", "2", "0", "00", "SUCCESS")
                }
            }
            _ => reply_plain(&business_reply(&code, &payload)),
        }
    }
}

#[async_trait]
impl Transport for FakeEfris {
    async fn post_json(&self, _url: &str, body: String, _timeout: Duration) -> Result<TransportResponse> {
        if let Some(fault) = self.faults.lock().unwrap().pop_front() {
            return Ok(fault);
        }

        let request: Value = serde_json::from_str(&body).unwrap();
        if request["globalInfo"]["interfaceCode"] == "T104" && !self.key_exchange_delay.is_zero() {
            tokio::time::sleep(self.key_exchange_delay).await;
        }
        Ok(self.handle(&request))
    }
}

/// Canned business content per interface
fn business_reply(code: &str, payload: &Value) -> Value {
    match code {
        "T119" => json!({
            "taxpayer": {
                "tin": payload["tin"],
                "legalName": "ACME UGANDA LIMITED",
                "taxpayerStatus": "101"
            }
        }),
        "T121" => json!({ "currency": payload["currency"], "rate": "3750.25" }),
        "T109" => json!({
            "basicInformation": { "invoiceNo": "320012345678", "antifakeCode": "80712345" },
            "sellerDetails": payload["sellerDetails"],
            "summary": payload["summary"]
        }),
        _ => json!({}),
    }
}

fn envelope(
    content: &str,
    code_type: &str,
    encrypt_code: &str,
    zip_code: &str,
    return_code: &str,
    message: &str,
) -> TransportResponse {
    TransportResponse::ok(
        json!({
            "data": {
                "content": content,
                "signature": "",
                "dataDescription": {
                    "codeType": code_type,
                    "encryptCode": encrypt_code,
                    "zipCode": zip_code
                }
            },
            "globalInfo": { "responseCode": "TA" },
            "returnStateInfo": { "returnCode": return_code, "returnMessage": message }
        })
        .to_string(),
    )
}

fn reply_plain(content: &Value) -> TransportResponse {
    envelope(&STANDARD.encode(content.to_string()), "0", "1", "0", "00", "SUCCESS")
}

fn reply_status(return_code: &str, message: &str) -> TransportResponse {
    envelope("", "0", "1", "0", return_code, message)
}

/// Configuration matching the fake's expectations
pub fn test_config() -> ClientConfig {
    ClientConfig {
        key_password: "secret".to_string(),
        tin: "1000000000".to_string(),
        device_no: "TCS0001".to_string(),
        brn: "80020000000001".to_string(),
        ..ClientConfig::default()
    }
}

/// Client wired to `fake`, sharing its clock
pub fn client_for(fake: &Arc<FakeEfris>, clock: &Arc<ManualClock>) -> EfrisClient {
    EfrisClient::from_parts(
        test_config(),
        Arc::clone(fake) as Arc<dyn Transport>,
        IdentityKeyStore::from_key(test_identity().clone()),
        Arc::clone(clock) as Arc<dyn Clock>,
    )
}
