/// Configuration management
use crate::error::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 500;

/// Messaging session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Page size for message history requests
    pub history_limit: usize,

    /// Upper bound for any single backend request
    pub request_timeout: Duration,

    /// Length of the sidebar preview, in chars
    pub preview_chars: usize,

    /// Longest message body accepted by the composer, in chars
    pub max_body_chars: usize,

    /// Capacity of the UI event broadcast channel
    pub event_capacity: usize,

    /// Default tracing filter when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            history_limit: DEFAULT_HISTORY_LIMIT,
            request_timeout: Duration::from_secs(10),
            preview_chars: 80,
            max_body_chars: 5000,
            event_capacity: 256,
            log_filter: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Defaults with `HIRECHAT_*` environment overrides applied
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as `from_env` but reads values through `lookup`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = lookup("HIRECHAT_HISTORY_LIMIT") {
            config.history_limit = parse_number("HIRECHAT_HISTORY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("HIRECHAT_REQUEST_TIMEOUT_MS") {
            let ms: u64 = parse_number("HIRECHAT_REQUEST_TIMEOUT_MS", &v)?;
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup("HIRECHAT_PREVIEW_CHARS") {
            config.preview_chars = parse_number("HIRECHAT_PREVIEW_CHARS", &v)?;
        }
        if let Some(v) = lookup("HIRECHAT_MAX_BODY_CHARS") {
            config.max_body_chars = parse_number("HIRECHAT_MAX_BODY_CHARS", &v)?;
        }
        if let Some(v) = lookup("HIRECHAT_LOG") {
            config.log_filter = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Clamp and sanity-check values
    pub fn validate(&mut self) -> Result<()> {
        self.history_limit = self.history_limit.clamp(1, MAX_HISTORY_LIMIT);

        if self.request_timeout.is_zero() {
            return Err(SyncError::Config(
                "request timeout must be greater than zero".to_string(),
            ));
        }
        if self.max_body_chars == 0 {
            return Err(SyncError::Config(
                "max body length must be greater than zero".to_string(),
            ));
        }
        if self.event_capacity == 0 {
            self.event_capacity = 1;
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse::<T>()
        .map_err(|_| SyncError::Config(format!("{} must be a valid number, got {:?}", key, value)))
}
