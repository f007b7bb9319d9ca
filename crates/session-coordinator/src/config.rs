//! Session coordinator configuration.
//!
//! Configuration is loaded from environment variables. The backend API token
//! is redacted in Debug output.

use common::config::{ConfigError, ObservabilityConfig};
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;

/// Default base delay for reconnect backoff in milliseconds.
pub const DEFAULT_RECONNECT_BASE_DELAY_MS: u64 = 1000;

/// Default maximum number of reconnect attempts.
pub const DEFAULT_RECONNECT_MAX_ATTEMPTS: u32 = 5;

/// Default transport handshake timeout in milliseconds.
pub const DEFAULT_HANDSHAKE_TIMEOUT_MS: u64 = 10_000;

/// Default bound on backend calls and offer/answer creation in milliseconds.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default number of recording upload retries.
pub const DEFAULT_UPLOAD_MAX_RETRIES: u32 = 3;

/// Session coordinator configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket signaling endpoint base URL (e.g., "wss://signal.example.com").
    pub signaling_url: String,

    /// Backend REST base URL (e.g., "https://api.example.com/v1").
    pub backend_url: String,

    /// Bearer token for the backend.
    /// Protected by `SecretString` to prevent accidental logging.
    pub api_token: SecretString,

    /// Base delay for reconnect backoff.
    pub reconnect_base_delay: Duration,

    /// Maximum reconnect attempts before the channel gives up.
    pub reconnect_max_attempts: u32,

    /// Transport handshake timeout.
    pub handshake_timeout: Duration,

    /// Bound on every backend call and offer/answer creation.
    pub request_timeout: Duration,

    /// Recording upload retries after the first attempt.
    pub upload_max_retries: u32,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("signaling_url", &self.signaling_url)
            .field("backend_url", &self.backend_url)
            .field("api_token", &"[REDACTED]")
            .field("reconnect_base_delay", &self.reconnect_base_delay)
            .field("reconnect_max_attempts", &self.reconnect_max_attempts)
            .field("handshake_timeout", &self.handshake_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("upload_max_retries", &self.upload_max_retries)
            .field("observability", &self.observability)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let signaling_url = required(vars, "SC_SIGNALING_URL")?;
        if !(signaling_url.starts_with("ws://") || signaling_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(
                "SC_SIGNALING_URL must use ws:// or wss://".to_string(),
            ));
        }

        let backend_url = required(vars, "SC_BACKEND_URL")?
            .trim_end_matches('/')
            .to_string();

        let api_token = SecretString::from(required(vars, "SC_API_TOKEN")?);

        let reconnect_base_delay = Duration::from_millis(parse_or(
            vars,
            "SC_RECONNECT_BASE_DELAY_MS",
            DEFAULT_RECONNECT_BASE_DELAY_MS,
        )?);

        let reconnect_max_attempts = parse_or(
            vars,
            "SC_RECONNECT_MAX_ATTEMPTS",
            DEFAULT_RECONNECT_MAX_ATTEMPTS,
        )?;
        if reconnect_max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "SC_RECONNECT_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }

        let handshake_timeout = Duration::from_millis(parse_or(
            vars,
            "SC_HANDSHAKE_TIMEOUT_MS",
            DEFAULT_HANDSHAKE_TIMEOUT_MS,
        )?);

        let request_timeout = Duration::from_millis(parse_or(
            vars,
            "SC_REQUEST_TIMEOUT_MS",
            DEFAULT_REQUEST_TIMEOUT_MS,
        )?);

        let upload_max_retries =
            parse_or(vars, "SC_UPLOAD_MAX_RETRIES", DEFAULT_UPLOAD_MAX_RETRIES)?;

        let observability = ObservabilityConfig::from_vars(vars)?;

        Ok(Config {
            signaling_url,
            backend_url,
            api_token,
            reconnect_base_delay,
            reconnect_max_attempts,
            handshake_timeout,
            request_timeout,
            upload_max_retries,
            observability,
        })
    }
}

fn required(vars: &HashMap<String, String>, key: &str) -> Result<String, ConfigError> {
    vars.get(key)
        .filter(|v| !v.is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key} is not a valid number: {raw}"))),
        None => Ok(default),
    }
}
