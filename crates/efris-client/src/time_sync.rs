//! Clock synchronisation check
//!
//! The service rejects requests whose timestamp drifts too far from its own
//! clock. Before a session starts the client asks for the server time (T101)
//! and compares it with the local request timestamp, retrying a bounded
//! number of times.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use efris_core::{registry, time, Error, Result, TIME_SYNC_TOLERANCE_MINUTES};

use crate::config::ClientConfig;
use crate::dispatcher::{CallOptions, Dispatcher};

/// Delay between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// Doubling delay starting at `initial`, capped at `max`
    Exponential { initial: Duration, max: Duration },
}

impl Backoff {
    /// Delay after the failed attempt numbered `attempt` (starting at 1)
    pub fn delay(&self, attempt: u32) -> Duration {
        match *self {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { initial, max } => {
                let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
                initial.saturating_mul(factor).min(max)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSyncPolicy {
    /// Total attempts, at least one is always made
    pub attempts: u32,
    pub tolerance_minutes: u32,
    pub backoff: Backoff,
}

impl Default for TimeSyncPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            tolerance_minutes: TIME_SYNC_TOLERANCE_MINUTES,
            backoff: Backoff::Fixed(Duration::from_secs(2)),
        }
    }
}

impl TimeSyncPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            attempts: config.time_sync_attempts,
            tolerance_minutes: config.time_sync_tolerance_minutes,
            backoff: Backoff::Fixed(Duration::from_secs(config.time_sync_delay_secs)),
        }
    }
}

/// Outcome of a successful check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Local timestamp, request format
    pub local: String,
    /// Server timestamp, response format
    pub remote: String,
    /// `remote - local` in seconds
    pub drift_seconds: Option<i64>,
    /// Attempts used
    pub attempts: u32,
}

/// Server time as sent by the service (`DD/MM/YYYY hh:mm:ss`)
pub async fn server_time(dispatcher: &Dispatcher) -> Result<String> {
    let parsed = dispatcher
        .call(registry::SERVER_TIME, &Value::Null, CallOptions::PLAIN)
        .await?
        .into_result()?;

    parsed
        .content
        .as_json()
        .and_then(|content| content.get("currentTime"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| Error::api(200, "Server time response carries no currentTime"))
}

/// Check the local clock against the server, retrying per `policy`.
///
/// Call errors are returned at once; only drift is retried.
pub async fn ensure_time_synchronized(
    dispatcher: &Dispatcher,
    policy: &TimeSyncPolicy,
) -> Result<SyncReport> {
    let attempts = policy.attempts.max(1);
    let mut last_drift = None;

    for attempt in 1..=attempts {
        let remote = server_time(dispatcher).await?;
        let local = dispatcher.codec().time().now_request_format();
        let drift_seconds = time::drift_seconds(&local, &remote);

        if time::is_synchronized(&local, &remote, policy.tolerance_minutes) {
            debug!(attempt, ?drift_seconds, "Clock synchronized with server");
            return Ok(SyncReport {
                local,
                remote,
                drift_seconds,
                attempts: attempt,
            });
        }

        warn!(attempt, %local, %remote, ?drift_seconds, "Clock drift exceeds tolerance");
        last_drift = Some((local, remote, drift_seconds));

        if attempt < attempts {
            tokio::time::sleep(policy.backoff.delay(attempt)).await;
        }
    }

    let detail = match last_drift {
        Some((_, _, Some(drift))) => format!("clock drift of {}s", drift),
        Some((local, remote, None)) => {
            format!("unparsable timestamps (local {}, server {})", local, remote)
        }
        None => "no server time".to_string(),
    };
    Err(Error::api(
        200,
        format!(
            "Time not synchronized after {} attempts: {} exceeds {} minute tolerance",
            attempts, detail, policy.tolerance_minutes
        ),
    ))
}
