//! HTTP transport
//!
//! The dispatcher and session key manager only need "POST this JSON, give
//! me the status and body". [`HttpTransport`] does that over reqwest; tests
//! plug in an in-process fake.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::Client;
use tracing::debug;

use efris_core::{Error, Result};

/// Raw HTTP outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportResponse {
    pub status: u16,
    pub body: String,
}

impl TransportResponse {
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Sends a JSON body to the service
#[async_trait]
pub trait Transport: Send + Sync {
    /// POST `body` as `application/json`, bounded by `timeout`.
    ///
    /// Only failures that produced no HTTP response are errors; any status
    /// code comes back in the [`TransportResponse`].
    async fn post_json(&self, url: &str, body: String, timeout: Duration)
        -> Result<TransportResponse>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::transport(format!("Cannot build HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Wrap an already configured reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn post_json(
        &self,
        url: &str,
        body: String,
        timeout: Duration,
    ) -> Result<TransportResponse> {
        debug!(url, bytes = body.len(), "POST");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .timeout(timeout)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::transport(format!("Request to {} timed out", url))
                } else if e.is_connect() {
                    Error::transport(format!("Cannot connect to {}: {}", url, e))
                } else {
                    Error::transport(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| Error::transport(format!("Failed to read response body: {}", e)))?;

        debug!(status, bytes = body.len(), "Response received");
        Ok(TransportResponse { status, body })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one request with `status` and `body`, returning the raw request
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/efristcs/ws/tcsapp/getInformation", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut raw = Vec::new();
            let mut buf = [0u8; 4096];
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                raw.extend_from_slice(&buf[..n]);
                let text = String::from_utf8_lossy(&raw).to_string();
                if let Some(end) = text.find("\r\n\r\n") {
                    let length = text
                        .lines()
                        .find_map(|line| {
                            line.to_ascii_lowercase()
                                .strip_prefix("content-length:")
                                .map(|v| v.trim().parse::<usize>().unwrap())
                        })
                        .unwrap_or(0);
                    if raw.len() >= end + 4 + length {
                        break;
                    }
                }
            }

            let response = format!(
                "HTTP/1.1 {}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                status,
                body.len(),
                body
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
            String::from_utf8_lossy(&raw).to_string()
        });

        (url, handle)
    }

    fn transport() -> HttpTransport {
        HttpTransport::with_client(Client::builder().no_proxy().build().unwrap())
    }

    #[test]
    fn test_response_status() {
        assert!(HttpTransport::new().is_ok());
        assert!(TransportResponse::ok("{}").is_ok());
        assert!(!TransportResponse {
            status: 500,
            body: String::new()
        }
        .is_ok());
    }

    #[tokio::test]
    async fn test_post_json_returns_status_and_body() {
        let (url, server) = serve_once("200 OK", r#"{"returnStateInfo":{"returnCode":"00"}}"#).await;
        let transport = transport();

        let response = transport
            .post_json(&url, r#"{"data":{}}"#.to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response, TransportResponse::ok(r#"{"returnStateInfo":{"returnCode":"00"}}"#));

        let request = server.await.unwrap();
        assert!(request.starts_with("POST /efristcs/ws/tcsapp/getInformation"));
        assert!(request.to_ascii_lowercase().contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"data":{}}"#));
    }

    #[tokio::test]
    async fn test_error_status_is_not_an_error() {
        let (url, _server) = serve_once("503 Service Unavailable", "down").await;
        let transport = transport();

        let response = transport
            .post_json(&url, "{}".to_string(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(response.status, 503);
        assert_eq!(response.body, "down");
    }

    #[tokio::test]
    async fn test_connection_refused_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let err = transport()
            .post_json(&url, "{}".to_string(), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_transport());
    }
}
