//! Client configuration.
//!
//! Stored as TOML. Every key is optional:
//!
//! ```toml
//! start_timeout_ms = 15000
//! stop_timeout_ms = 5000
//! delivery = "both"        # "both" | "registered" | "legacy"
//! mirror_messages = false
//! log_level = "info"
//!
//! [reconnect]
//! enabled = true
//! max_attempts = 5          # 0 retries forever
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! multiplier = 2.0
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hubrelay_protocol::constants::{START_TIMEOUT, STOP_TIMEOUT};

use crate::error::ConfigError;
use crate::events::DeliveryMode;
use crate::logging::LogLevel;
use crate::types::ReconnectConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// How long a start may take before it counts as failed. `0` uses the
    /// default.
    pub start_timeout_ms: u64,

    /// Upper bound on waiting for a stop to complete. `0` uses the default.
    pub stop_timeout_ms: u64,

    pub delivery: DeliveryMode,

    /// Also push each inbound server call, as a JSON line, onto the pull
    /// queue read by `get_message`.
    pub mirror_messages: bool,

    /// Read back through [`log_level`](Self::log_level) by the host and
    /// passed to [`logging::init`](crate::logging::init). The manager does
    /// not apply it.
    pub log_level: String,

    pub reconnect: ReconnectSection,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            start_timeout_ms: START_TIMEOUT.as_millis() as u64,
            stop_timeout_ms: STOP_TIMEOUT.as_millis() as u64,
            delivery: DeliveryMode::default(),
            mirror_messages: false,
            log_level: LogLevel::default().as_str().to_string(),
            reconnect: ReconnectSection::default(),
        }
    }
}

/// The `[reconnect]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSection {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        let defaults = ReconnectConfig::default();
        Self {
            enabled: defaults.enabled,
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
            multiplier: defaults.backoff_factor,
        }
    }
}

impl From<&ReconnectSection> for ReconnectConfig {
    fn from(section: &ReconnectSection) -> Self {
        Self {
            enabled: section.enabled,
            max_attempts: section.max_attempts,
            initial_delay: Duration::from_millis(section.initial_delay_ms),
            max_delay: Duration::from_millis(section.max_delay_ms),
            backoff_factor: section.multiplier,
        }
    }
}

impl ClientConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Reads a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        tracing::debug!(path = %path.display(), "configuration saved");
        Ok(())
    }

    pub fn reconnect_config(&self) -> ReconnectConfig {
        ReconnectConfig::from(&self.reconnect)
    }

    pub fn start_timeout(&self) -> Duration {
        non_zero_ms(self.start_timeout_ms).unwrap_or(START_TIMEOUT)
    }

    pub fn stop_timeout(&self) -> Duration {
        non_zero_ms(self.stop_timeout_ms).unwrap_or(STOP_TIMEOUT)
    }

    /// Parsed log level. Unknown names fall back to `info`.
    pub fn log_level(&self) -> LogLevel {
        LogLevel::parse(&self.log_level)
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.start_timeout(), Duration::from_secs(15));
        assert_eq!(config.stop_timeout(), Duration::from_secs(5));
        assert_eq!(config.reconnect_config(), ReconnectConfig::default());
        assert_eq!(config.log_level(), LogLevel::Info);
    }

    #[test]
    fn log_level_names_parse_leniently() {
        let config = ClientConfig::from_toml_str(r#"log_level = "Warning""#).unwrap();
        assert_eq!(config.log_level(), LogLevel::Warning);
        let config = ClientConfig::from_toml_str(r#"log_level = "chatty""#).unwrap();
        assert_eq!(config.log_level(), LogLevel::Info);
    }

    #[test]
    fn partial_reconnect_table() {
        let config = ClientConfig::from_toml_str(
            r#"
            delivery = "registered"

            [reconnect]
            enabled = true
            max_attempts = 0
            "#,
        )
        .unwrap();

        assert_eq!(config.delivery, DeliveryMode::Registered);
        let policy = config.reconnect_config();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, 0);
        assert_eq!(policy.initial_delay, Duration::from_millis(1000));
        assert_eq!(policy.max_delay, Duration::from_millis(30_000));
    }

    #[test]
    fn zero_timeouts_use_defaults() {
        let config =
            ClientConfig::from_toml_str("start_timeout_ms = 0\nstop_timeout_ms = 250").unwrap();
        assert_eq!(config.start_timeout(), START_TIMEOUT);
        assert_eq!(config.stop_timeout(), Duration::from_millis(250));
    }

    #[test]
    fn unknown_delivery_is_rejected() {
        let err = ClientConfig::from_toml_str(r#"delivery = "sometimes""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig::load(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("client.toml");

        let mut config = ClientConfig {
            mirror_messages: true,
            log_level: "debug".into(),
            ..Default::default()
        };
        config.reconnect.enabled = true;
        config.reconnect.multiplier = 1.5;
        config.save(&path).unwrap();

        let loaded = ClientConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.log_level(), LogLevel::Debug);
    }
}
