//! EFRIS Core - Envelope protocol, cryptographic primitives, and interface registry
//!
//! This crate holds the I/O-free half of the client for the URA EFRIS
//! e-invoicing web service: timestamps in the service timezone, the
//! AES/RSA primitives the protocol mandates, request envelope construction,
//! response decoding, and the static operation and schema tables.

pub mod crypto;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod schema;
pub mod time;

pub use envelope::{
    CallerIdentity, Content, DataDescription, Envelope, EnvelopeCodec, GlobalInfo,
    ParsedEnvelope, ReturnStateInfo,
};
pub use error::{Error, FieldError, Result, ValidationError};
pub use registry::Interface;
pub use schema::{FieldKind, FieldSpec, Schema};
pub use time::{Clock, SystemClock, TimeSource};

/// Default lifetime of a negotiated session key (23 hours)
pub const SESSION_KEY_TTL_SECS: u64 = 23 * 3600;

/// Default clock drift tolerated by the service, in minutes
pub const TIME_SYNC_TOLERANCE_MINUTES: u32 = 10;

/// Default timeout for general calls, in seconds
pub const REQUEST_TIMEOUT_SECS: u64 = 60;

/// Default timeout for session key negotiation, in seconds
pub const KEY_EXCHANGE_TIMEOUT_SECS: u64 = 30;
