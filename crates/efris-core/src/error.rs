//! Error types for the EFRIS client

use std::fmt;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// HTTP-like status used for failures that never reached the network
pub const STATUS_TRANSPORT: u16 = 0;

/// Status used for caller mistakes such as an unknown operation key
pub const STATUS_CLIENT_ERROR: u16 = 400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("Authentication error: {0}")]
    Authentication(String),

    #[error("Encryption error: {0}")]
    Encryption(String),

    #[error("API error (status {status}{}): {message}", return_code_suffix(.return_code))]
    Api {
        status: u16,
        return_code: Option<String>,
        message: String,
    },

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(String),
}

fn return_code_suffix(code: &Option<String>) -> String {
    match code {
        Some(code) => format!(", return code {}", code),
        None => String::new(),
    }
}

impl Error {
    /// API failure with an HTTP-like status and no remote return code
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            return_code: None,
            message: message.into(),
        }
    }

    /// Failure reported by the remote service in its status block
    pub fn remote(return_code: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            status: 200,
            return_code: Some(return_code.into()),
            message: message.into(),
        }
    }

    /// Transport-level failure (no HTTP status available)
    pub fn transport(message: impl Into<String>) -> Self {
        Self::api(STATUS_TRANSPORT, message)
    }

    /// True for the client-error class (bad operation key and similar)
    pub fn is_client_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if (400..500).contains(status))
    }

    /// True when the request never produced an HTTP response
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Api { status: STATUS_TRANSPORT, .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::api(200, format!("Malformed JSON: {}", e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Config(e.to_string())
    }
}

/// A single rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    /// Dotted path to the field, e.g. `goodsDetails[2].qty`
    pub path: String,
    pub reason: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Field-level validation failure for one interface payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub interface_code: String,
    pub errors: Vec<FieldError>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} payload rejected", self.interface_code)?;
        for (i, err) in self.errors.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, err)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}
