use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::serial::TransportTiming;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Connection tuning. Line settings (9600-8-N-1) are not configurable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub response_timeout_ms: u64,
    pub max_attempts: u32,
    pub settle_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub shutdown_grace_ms: u64,
    pub event_capacity: usize,
    /// Ask for boot count and run time during the handshake.
    pub query_boot_info: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        let timing = TransportTiming::default();
        Self {
            response_timeout_ms: timing.response_timeout_ms,
            max_attempts: timing.max_attempts,
            settle_timeout_ms: timing.settle_timeout_ms,
            idle_timeout_ms: timing.idle_timeout_ms,
            poll_interval_ms: 1000,
            shutdown_grace_ms: 500,
            event_capacity: 64,
            query_boot_info: false,
        }
    }
}

impl ConnectionConfig {
    /// Load a JSON config file; missing keys keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".to_string()));
        }
        if self.response_timeout_ms == 0
            || self.settle_timeout_ms == 0
            || self.idle_timeout_ms == 0
        {
            return Err(ConfigError::Invalid("timeouts must be non-zero".to_string()));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid("poll_interval_ms must be non-zero".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be non-zero".to_string()));
        }
        Ok(())
    }

    pub fn timing(&self) -> TransportTiming {
        TransportTiming {
            response_timeout_ms: self.response_timeout_ms,
            max_attempts: self.max_attempts,
            settle_timeout_ms: self.settle_timeout_ms,
            idle_timeout_ms: self.idle_timeout_ms,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol() {
        let config = ConnectionConfig::default();
        assert_eq!(config.response_timeout_ms, 1000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.shutdown_grace(), Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = ConnectionConfig::from_json(r#"{ "poll_interval_ms": 250, "query_boot_info": true }"#).unwrap();
        assert_eq!(config.poll_interval_ms, 250);
        assert!(config.query_boot_info);
        assert_eq!(config.max_attempts, 3);
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = ConnectionConfig::from_json(r#"{ "max_attempts": 0 }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(matches!(ConnectionConfig::from_json("not json"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_rejects_zero_waits() {
        for key in ["response_timeout_ms", "settle_timeout_ms", "idle_timeout_ms"] {
            let json = format!(r#"{{ "{}": 0 }}"#, key);
            assert!(
                matches!(ConnectionConfig::from_json(&json), Err(ConfigError::Invalid(_))),
                "{} = 0 accepted",
                key
            );
        }
    }
}
