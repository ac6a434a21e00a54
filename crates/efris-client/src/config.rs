//! Client configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use efris_core::{
    CallerIdentity, Error, Result, KEY_EXCHANGE_TIMEOUT_SECS, REQUEST_TIMEOUT_SECS,
    SESSION_KEY_TTL_SECS, TIME_SYNC_TOLERANCE_MINUTES,
};

/// Sandbox endpoint
pub const SANDBOX_URL: &str = "https://efristest.ura.go.ug/efrisws/ws/taapp/getInformation";

/// Production endpoint
pub const PRODUCTION_URL: &str = "https://efrisws.ura.go.ug/ws/taapp/getInformation";

/// Which deployment of the service to talk to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Sandbox,
    Production,
}

impl Environment {
    pub fn base_url(self) -> &'static str {
        match self {
            Environment::Sandbox => SANDBOX_URL,
            Environment::Production => PRODUCTION_URL,
        }
    }

    /// Parse `sandbox`/`test` or `production`/`prod`/`live`
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "sandbox" | "test" => Some(Environment::Sandbox),
            "production" | "prod" | "live" => Some(Environment::Production),
            _ => None,
        }
    }
}

/// Client configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Target deployment
    pub environment: Environment,

    /// Path to the identity key container (.pfx/.p12 or PEM)
    pub key_path: PathBuf,

    /// Password protecting the identity key container
    pub key_password: String,

    /// Taxpayer identification number
    pub tin: String,

    /// Registered device number
    pub device_no: String,

    /// Business registration number
    pub brn: String,

    pub taxpayer_id: String,

    /// Operator name echoed in the request extension block
    pub operator_name: String,

    /// Timeout for general calls (seconds)
    pub request_timeout_secs: u64,

    /// Timeout for session key negotiation (seconds)
    pub key_exchange_timeout_secs: u64,

    /// Lifetime of a negotiated session key (seconds)
    pub session_key_ttl_secs: u64,

    /// Clock drift accepted by the time check (minutes)
    pub time_sync_tolerance_minutes: u32,

    /// Attempts made by the time check before giving up
    pub time_sync_attempts: u32,

    /// Delay between time check attempts (seconds)
    pub time_sync_delay_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            environment: Environment::Sandbox,
            key_path: PathBuf::new(),
            key_password: String::new(),
            tin: String::new(),
            device_no: String::new(),
            brn: String::new(),
            taxpayer_id: "1".to_string(),
            operator_name: "administrator".to_string(),
            request_timeout_secs: REQUEST_TIMEOUT_SECS,
            key_exchange_timeout_secs: KEY_EXCHANGE_TIMEOUT_SECS,
            session_key_ttl_secs: SESSION_KEY_TTL_SECS,
            time_sync_tolerance_minutes: TIME_SYNC_TOLERANCE_MINUTES,
            time_sync_attempts: 3,
            time_sync_delay_secs: 2,
        }
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("environment", &self.environment)
            .field("key_path", &self.key_path)
            .field("key_password", &"<redacted>")
            .field("tin", &self.tin)
            .field("device_no", &self.device_no)
            .field("brn", &self.brn)
            .field("taxpayer_id", &self.taxpayer_id)
            .field("operator_name", &self.operator_name)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("key_exchange_timeout_secs", &self.key_exchange_timeout_secs)
            .field("session_key_ttl_secs", &self.session_key_ttl_secs)
            .finish_non_exhaustive()
    }
}

impl ClientConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Invalid configuration file: {}", e)))
    }

    /// Save configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Cannot serialize configuration: {}", e)))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Defaults overridden by `EFRIS_*` environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `EFRIS_*` name
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(value) = lookup("EFRIS_ENV") {
            config.environment = Environment::parse(&value)
                .ok_or_else(|| Error::Config(format!("Unknown EFRIS_ENV: {}", value)))?;
        }
        if let Some(value) = lookup("EFRIS_KEY_PATH") {
            config.key_path = PathBuf::from(value);
        }

        let strings: [(&str, &mut String); 6] = [
            ("EFRIS_KEY_PASSWORD", &mut config.key_password),
            ("EFRIS_TIN", &mut config.tin),
            ("EFRIS_DEVICE_NO", &mut config.device_no),
            ("EFRIS_BRN", &mut config.brn),
            ("EFRIS_TAXPAYER_ID", &mut config.taxpayer_id),
            ("EFRIS_OPERATOR_NAME", &mut config.operator_name),
        ];
        for (name, field) in strings {
            if let Some(value) = lookup(name) {
                *field = value;
            }
        }

        if let Some(value) = lookup("EFRIS_TIMEOUT") {
            config.request_timeout_secs = parse_number("EFRIS_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("EFRIS_KEY_EXCHANGE_TIMEOUT") {
            config.key_exchange_timeout_secs = parse_number("EFRIS_KEY_EXCHANGE_TIMEOUT", &value)?;
        }
        if let Some(value) = lookup("EFRIS_SESSION_KEY_TTL") {
            config.session_key_ttl_secs = parse_number("EFRIS_SESSION_KEY_TTL", &value)?;
        }
        if let Some(value) = lookup("EFRIS_TIME_TOLERANCE") {
            config.time_sync_tolerance_minutes = parse_number("EFRIS_TIME_TOLERANCE", &value)?;
        }

        Ok(config)
    }

    /// Reject configurations that cannot make a signed call
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("tin", self.tin.as_str()),
            ("device_no", self.device_no.as_str()),
            ("key_password", self.key_password.as_str()),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("{} must be set", name)));
            }
        }
        if self.key_path.as_os_str().is_empty() {
            return Err(Error::Config("key_path must be set".to_string()));
        }
        if self.request_timeout_secs == 0 || self.key_exchange_timeout_secs == 0 {
            return Err(Error::Config("Timeouts must be non-zero".to_string()));
        }
        if self.session_key_ttl_secs == 0 {
            return Err(Error::Config("session_key_ttl_secs must be non-zero".to_string()));
        }
        if self.time_sync_attempts == 0 {
            return Err(Error::Config("time_sync_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn base_url(&self) -> &'static str {
        self.environment.base_url()
    }

    pub fn caller(&self) -> CallerIdentity {
        CallerIdentity {
            tin: self.tin.clone(),
            device_no: self.device_no.clone(),
            brn: self.brn.clone(),
            taxpayer_id: self.taxpayer_id.clone(),
            operator_name: self.operator_name.clone(),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn key_exchange_timeout(&self) -> Duration {
        Duration::from_secs(self.key_exchange_timeout_secs)
    }

    pub fn session_key_ttl(&self) -> Duration {
        Duration::from_secs(self.session_key_ttl_secs)
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{} is not a valid number: {}", name, value)))
}
