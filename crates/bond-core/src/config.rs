//! Configuration types for the bond system
//!
//! This module defines all configuration structures used throughout the crate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::traits::connector::Transport;

/// API version this build understands
pub const DEFAULT_API_VERSION: &str = "4.2";

/// Main bond configuration
#[derive(Clone, Serialize, Deserialize)]
pub struct BondConfig {
    /// API root of the management server (e.g. `https://m.example.com/api`)
    pub server: String,

    /// Account used for the live stream and for write-back
    pub user: String,

    /// Password for `user` (never logged)
    pub password: String,

    /// Requested live transport
    #[serde(default)]
    pub transport: Transport,

    /// Expected server API version
    #[serde(default = "default_api_version")]
    pub api_version: String,

    /// Timestamp of the last fully processed event from a previous run
    #[serde(default)]
    pub last_processed_event: Option<DateTime<Utc>>,

    /// Dispatch pool settings
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Result polling settings
    #[serde(default)]
    pub results: ResultsConfig,

    /// Capacity of the notification channel handed to the application
    #[serde(default = "default_notification_capacity")]
    pub notification_channel_capacity: usize,

    /// Plugins built by the daemon from a [`crate::PluginCatalog`]
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl BondConfig {
    /// Create a configuration with defaults for everything but the credentials
    pub fn new(
        server: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            user: user.into(),
            password: password.into(),
            transport: Transport::default(),
            api_version: default_api_version(),
            last_processed_event: None,
            dispatch: DispatchConfig::default(),
            results: ResultsConfig::default(),
            notification_channel_capacity: default_notification_capacity(),
            plugins: Vec::new(),
        }
    }

    /// Set the checkpoint to resume from
    pub fn with_last_processed_event(mut self, ts: Option<DateTime<Utc>>) -> Self {
        self.last_processed_event = ts;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.server.trim().is_empty() {
            return Err(crate::Error::config("Server address cannot be empty"));
        }
        if self.user.trim().is_empty() {
            return Err(crate::Error::config("User cannot be empty"));
        }
        if self.password.is_empty() {
            return Err(crate::Error::config("Password cannot be empty"));
        }
        if self.api_version.trim().is_empty() {
            return Err(crate::Error::config("API version cannot be empty"));
        }
        if self.notification_channel_capacity == 0 {
            return Err(crate::Error::config(
                "Notification channel capacity must be > 0",
            ));
        }

        self.dispatch.validate()?;
        self.results.validate()?;

        for plugin in &self.plugins {
            plugin.validate()?;
        }

        Ok(())
    }

    /// Whether `reported` matches the configured API version
    pub fn accepts_api_version(&self, reported: &str) -> bool {
        self.api_version
            .trim()
            .eq_ignore_ascii_case(reported.trim())
    }
}

impl fmt::Debug for BondConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BondConfig")
            .field("server", &self.server)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("transport", &self.transport)
            .field("api_version", &self.api_version)
            .field("last_processed_event", &self.last_processed_event)
            .field("dispatch", &self.dispatch)
            .field("results", &self.results)
            .field(
                "notification_channel_capacity",
                &self.notification_channel_capacity,
            )
            .field("plugins", &self.plugins)
            .finish()
    }
}

/// Dispatch pool settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Number of plugin tasks that may run at once
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Upper bound on the shutdown wait, in seconds
    #[serde(default = "default_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,

    /// Capacity of the dispatch report channel
    #[serde(default = "default_report_capacity")]
    pub report_channel_capacity: usize,
}

impl DispatchConfig {
    /// Shutdown wait as a [`Duration`]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.workers == 0 {
            return Err(crate::Error::config("Dispatch workers must be > 0"));
        }
        if self.report_channel_capacity == 0 {
            return Err(crate::Error::config(
                "Dispatch report channel capacity must be > 0",
            ));
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            shutdown_timeout_secs: default_shutdown_timeout_secs(),
            report_channel_capacity: default_report_capacity(),
        }
    }
}

/// Result polling settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultsConfig {
    /// Period between two polls of a results source, in seconds
    #[serde(default = "default_poll_period_secs")]
    pub poll_period_secs: u64,
}

impl ResultsConfig {
    /// Poll period as a [`Duration`]
    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_secs)
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.poll_period_secs == 0 {
            return Err(crate::Error::config("Results poll period must be > 0"));
        }
        Ok(())
    }
}

impl Default for ResultsConfig {
    fn default() -> Self {
        Self {
            poll_period_secs: default_poll_period_secs(),
        }
    }
}

/// A plugin to build from a registered factory
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginConfig {
    /// Factory name in the catalog
    pub factory: String,

    /// Factory-specific configuration
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginConfig {
    /// Create a plugin entry with no extra configuration
    pub fn named(factory: impl Into<String>) -> Self {
        Self {
            factory: factory.into(),
            config: serde_json::Value::Null,
        }
    }

    fn validate(&self) -> Result<(), crate::Error> {
        if self.factory.trim().is_empty() {
            return Err(crate::Error::config("Plugin factory cannot be empty"));
        }
        Ok(())
    }
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

fn default_notification_capacity() -> usize {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_shutdown_timeout_secs() -> u64 {
    300
}

fn default_report_capacity() -> usize {
    1000
}

fn default_poll_period_secs() -> u64 {
    600
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BondConfig {
        BondConfig::new("https://m.example.com", "bond", "secret")
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.dispatch.workers, 1);
        assert_eq!(config.dispatch.shutdown_timeout(), Duration::from_secs(300));
        assert_eq!(config.results.poll_period(), Duration::from_secs(600));
        assert_eq!(config.transport, Transport::Sse);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_credentials() {
        let mut config = config();
        config.user = "  ".into();
        assert!(config.validate().is_err());

        let mut config = self::config();
        config.password.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = config();
        config.dispatch.workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_version_match_is_lenient() {
        let mut config = config();
        config.api_version = "4.2 ".into();
        assert!(config.accepts_api_version("4.2"));
        assert!(!config.accepts_api_version("3.10"));
    }

    #[test]
    fn test_debug_redacts_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("secret"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: BondConfig = serde_json::from_str(
            r#"{"server":"http://m","user":"u","password":"p","transport":"websocket"}"#,
        )
        .unwrap();
        assert_eq!(config.transport, Transport::WebSocket);
        assert_eq!(config.dispatch.workers, 1);
        assert_eq!(config.notification_channel_capacity, 1000);
        assert!(config.plugins.is_empty());
    }
}
