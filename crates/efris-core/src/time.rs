//! Timestamps in the service's civil timezone
//!
//! The service runs on East Africa Time (UTC+03:00, no daylight saving).
//! Requests carry `YYYY-MM-DD hh:mm:ss`, responses use `DD/MM/YYYY hh:mm:ss`.

use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};

/// Offset of the service timezone from UTC, in seconds
pub const SERVICE_UTC_OFFSET_SECS: i32 = 3 * 3600;

/// Request timestamp pattern
pub const REQUEST_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Response timestamp pattern
pub const RESPONSE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";

/// Compact date pattern used in reference numbers
pub const COMPACT_DATE_FORMAT: &str = "%Y%m%d";

/// Source of the current instant
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Formats the present moment in the service timezone
#[derive(Clone)]
pub struct TimeSource {
    clock: Arc<dyn Clock>,
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource").finish_non_exhaustive()
    }
}

impl TimeSource {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Current instant in UTC, straight from the clock
    pub fn now_utc(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current civil time in the service timezone
    pub fn now_local(&self) -> NaiveDateTime {
        to_service_time(self.clock.now())
    }

    /// `YYYY-MM-DD hh:mm:ss`
    pub fn now_request_format(&self) -> String {
        self.now_local().format(REQUEST_FORMAT).to_string()
    }

    /// `DD/MM/YYYY hh:mm:ss`
    pub fn now_response_format(&self) -> String {
        self.now_local().format(RESPONSE_FORMAT).to_string()
    }

    /// `YYYYMMDD`
    pub fn now_compact_date(&self) -> String {
        self.now_local().format(COMPACT_DATE_FORMAT).to_string()
    }
}

/// Convert a UTC instant to service civil time
pub fn to_service_time(instant: DateTime<Utc>) -> NaiveDateTime {
    (instant + Duration::seconds(i64::from(SERVICE_UTC_OFFSET_SECS))).naive_utc()
}

/// Parse a timestamp in either wire pattern.
///
/// A pattern only matches when formatting the parsed value reproduces the
/// input exactly, so `2024-1-1 10:00:00` is rejected.
pub fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    [REQUEST_FORMAT, RESPONSE_FORMAT].iter().find_map(|fmt| {
        NaiveDateTime::parse_from_str(value, fmt)
            .ok()
            .filter(|parsed| parsed.format(fmt).to_string() == value)
    })
}

/// Whether two service-timezone timestamps are within `tolerance_minutes`.
///
/// Unparsable input yields `false`.
pub fn is_synchronized(local: &str, remote: &str, tolerance_minutes: u32) -> bool {
    let (Some(local), Some(remote)) = (parse_timestamp(local), parse_timestamp(remote)) else {
        return false;
    };
    let drift = (local - remote).num_seconds().unsigned_abs();
    drift <= u64::from(tolerance_minutes) * 60
}

/// Signed drift `remote - local` in seconds, if both parse
pub fn drift_seconds(local: &str, remote: &str) -> Option<i64> {
    let local = parse_timestamp(local)?;
    let remote = parse_timestamp(remote)?;
    Some((remote - local).num_seconds())
}
