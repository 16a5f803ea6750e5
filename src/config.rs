// Client configuration for the managed backend.

use crate::backend::ClientError;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{info, warn};

pub const URL_VAR: &str = "STAYHUB_URL";
pub const ANON_KEY_VAR: &str = "STAYHUB_ANON_KEY";
pub const TIMEOUT_VAR: &str = "STAYHUB_TIMEOUT_MS";
pub const REALTIME_BUFFER_VAR: &str = "STAYHUB_REALTIME_BUFFER";

#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout_ms: u64,
    // Capacity of the real-time message channel
    pub realtime_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:54321".to_string(),
            api_key: String::new(),
            timeout_ms: 10_000,
            realtime_buffer: 256,
        }
    }
}

impl ClientConfig {
    // Read the configuration from the environment, falling back to defaults
    // for everything except the API key.
    pub fn from_env() -> Result<Self, ClientError> {
        let defaults = Self::default();
        let config = Self {
            base_url: var(URL_VAR).unwrap_or_else(|| {
                info!("{URL_VAR} not set, using default: {}", defaults.base_url);
                defaults.base_url.clone()
            }),
            api_key: var(ANON_KEY_VAR).ok_or_else(|| {
                ClientError::ConfigError(format!("{ANON_KEY_VAR} must be set"))
            })?,
            timeout_ms: try_load(TIMEOUT_VAR, defaults.timeout_ms)?,
            realtime_buffer: try_load(REALTIME_BUFFER_VAR, defaults.realtime_buffer)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ClientError> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ClientError::ConfigError(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.api_key.trim().is_empty() {
            return Err(ClientError::ConfigError("api_key is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(ClientError::ConfigError("timeout_ms must be positive".to_string()));
        }
        if self.realtime_buffer == 0 {
            return Err(ClientError::ConfigError(
                "realtime_buffer must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.base_url.trim_end_matches('/'))
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn try_load<T>(key: &str, default: T) -> Result<T, ClientError>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match var(key) {
        None => {
            info!("{key} not set, using default: {default}");
            Ok(default)
        }
        Some(raw) => raw.trim().parse().map_err(|e| {
            warn!("Invalid {key} value: {e}");
            ClientError::ConfigError(format!("invalid {key}: {e}"))
        }),
    }
}
