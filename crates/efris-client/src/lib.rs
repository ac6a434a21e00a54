//! EFRIS Client - Async client for the URA EFRIS web service
//!
//! This crate provides:
//! - Configuration with file and environment loading
//! - An HTTP transport behind a trait seam
//! - Identity key loading from PKCS#12 and PEM containers
//! - Session key negotiation, caching and expiry
//! - Request dispatch and a clock synchronisation check
//! - A convenience client with per-operation methods

pub mod client;
pub mod config;
pub mod dispatcher;
pub mod identity;
mod pkcs12;
pub mod session;
pub mod time_sync;
pub mod transport;

#[cfg(test)]
mod test_support;

pub use client::EfrisClient;
pub use config::{ClientConfig, Environment};
pub use dispatcher::{CallOptions, Dispatcher};
pub use identity::IdentityKeyStore;
pub use session::{SessionKey, SessionKeyManager};
pub use time_sync::{Backoff, SyncReport, TimeSyncPolicy};
pub use transport::{HttpTransport, Transport, TransportResponse};

pub use efris_core::{Error, Result};
