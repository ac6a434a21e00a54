//! End-to-end session key tests against the fake service
//!
//! These tests cover negotiation, caching, expiry and coalescing of the
//! symmetric session key.

use std::sync::Arc;
use std::time::Duration;

use efris_client::{CallOptions, TransportResponse};
use efris_core::Error;
use efris_tests::{client_for, init_tracing, FakeEfris, ManualClock};
use serde_json::json;

#[tokio::test]
async fn test_negotiation_unwraps_server_key() {
    init_tracing();
    let clock = ManualClock::new();
    let fake = FakeEfris::new(clock.clone());
    let client = client_for(&fake, &clock);

    let key = client.symmetric_key(false).await.unwrap();
    assert_eq!(key.bytes(), b"fake-efris-key-1");
    assert_eq!(fake.negotiations(), 1);

    // The key exchange request carries no content and no signature
    let exchange = &fake.received()[0];
    assert_eq!(exchange.interface_code, "T104");
    assert!(exchange.payload.is_null());
}

#[tokio::test]
async fn test_short_server_key_is_doubled() {
    let clock = ManualClock::new();
    let fake = FakeEfris::new(clock.clone());
    fake.set_session_key(b"8bytekey");
    let client = client_for(&fake, &clock);

    let key = client.symmetric_key(false).await.unwrap();
    assert_eq!(key.bytes(), b"8bytekey8bytekey");

    // The doubled key is the one both sides use for AES-128
    let content = client.query_taxpayer("1000000000", None).await.unwrap();
    assert_eq!(content["taxpayer"]["legalName"], "ACME UGANDA LIMITED");
}

#[tokio::test]
async fn test_ttl_expiry_renegotiates() {
    let clock = ManualClock::new();
    let fake = FakeEfris::new(clock.clone());
    let client = client_for(&fake, &clock);
    let ttl = chrono::Duration::hours(23);

    // ==========================================
    // STEP 1: First use negotiates
    // ==========================================
    let first = client.symmetric_key(false).await.unwrap();
    assert_eq!(
        client.session().valid_until(),
        Some(first.fetched_at() + ttl)
    );

    // ==========================================
    // STEP 2: One second before expiry, cache is served
    // ==========================================
    clock.advance(ttl - chrono::Duration::seconds(1));
    assert!(client.session().is_valid());
    client.symmetric_key(false).await.unwrap();
    assert_eq!(fake.negotiations(), 1);

    // ==========================================
    // STEP 3: One second after expiry, a new key is fetched
    // ==========================================
    clock.advance(chrono::Duration::seconds(2));
    assert!(!client.session().is_valid());
    let second = client.symmetric_key(false).await.unwrap();
    assert_eq!(fake.negotiations(), 2);
    assert!(second.fetched_at() > first.fetched_at());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_one_negotiation() {
    let clock = ManualClock::new();
    let fake = FakeEfris::slow_key_exchange(clock.clone(), Duration::from_millis(150));
    let client = Arc::new(client_for(&fake, &clock));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let client = Arc::clone(&client);
            tokio::spawn(async move {
                client
                    .call(
                        "query_taxpayer_by_tin",
                        &json!({ "tin": format!("100000000{}", i) }),
                        CallOptions::ENCRYPTED,
                    )
                    .await
            })
        })
        .collect();

    for handle in handles {
        let parsed = handle.await.unwrap().unwrap();
        assert!(parsed.is_success());
    }

    assert_eq!(fake.negotiations(), 1);
    let codes = fake.interface_codes();
    assert_eq!(codes.iter().filter(|c| *c == "T104").count(), 1);
    assert_eq!(codes.iter().filter(|c| *c == "T119").count(), 8);
}

#[tokio::test]
async fn test_negotiation_failure_surfaces_and_recovers() {
    let clock = ManualClock::new();
    let fake = FakeEfris::new(clock.clone());
    let client = client_for(&fake, &clock);

    fake.push_fault(TransportResponse {
        status: 503,
        body: "Service Unavailable".to_string(),
    });
    let err = client.symmetric_key(false).await.unwrap_err();
    assert_eq!(err, Error::api(503, "Service Unavailable"));
    assert!(!client.session().is_valid());

    // Failure is not cached
    client.symmetric_key(false).await.unwrap();
    assert_eq!(fake.negotiations(), 1);
}

#[tokio::test]
async fn test_forced_refresh_after_key_rotation() {
    let clock = ManualClock::new();
    let fake = FakeEfris::new(clock.clone());
    let client = client_for(&fake, &clock);

    client.query_taxpayer("1000000000", None).await.unwrap();

    // Server rotates its key; the cached one no longer decrypts
    fake.set_session_key(b"rotated-key-0002");
    let err = client.query_taxpayer("1000000000", None).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Api { return_code: Some(ref code), .. } if code == "23"
    ));

    // Caller forces a refresh and retries
    client.symmetric_key(true).await.unwrap();
    let content = client.query_taxpayer("1000000000", None).await.unwrap();
    assert_eq!(content["taxpayer"]["tin"], "1000000000");
    assert_eq!(fake.negotiations(), 2);
}
