// ABOUTME: Transport configuration loaded from the [transport] TOML section.
// ABOUTME: Selects the backend, the base URL, the open timeout and the reconnect policy.

use crate::backoff::ReconnectPolicy;
use crate::connector::ConnectorConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Backend name: "websocket" or "mock"
    #[serde(rename = "type", default = "default_transport_type")]
    pub transport_type: String,
    /// Base channel URL; session parameters are appended per connect
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_open_timeout_secs")]
    pub open_timeout_secs: u64,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
}

fn default_transport_type() -> String {
    "websocket".to_string()
}

fn default_url() -> String {
    "ws://localhost:8000/ws/chat/".to_string()
}

fn default_open_timeout_secs() -> u64 {
    10
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            transport_type: default_transport_type(),
            url: default_url(),
            open_timeout_secs: default_open_timeout_secs(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl TransportConfig {
    /// Parse a standalone transport table
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse transport config TOML")
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            open_timeout: Duration::from_secs(self.open_timeout_secs),
            reconnect: self.reconnect.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_from_empty_table() {
        let config = TransportConfig::parse("").unwrap();
        assert_eq!(config, TransportConfig::default());
        assert_eq!(config.connector_config().open_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_parse_full_table() {
        let config = TransportConfig::parse(
            r#"
type = "mock"
url = "wss://tutor.example/ws/chat/"
open_timeout_secs = 3

[reconnect]
max_attempts = 0
"#,
        )
        .unwrap();
        assert_eq!(config.transport_type, "mock");
        assert_eq!(config.open_timeout_secs, 3);
        assert!(!config.reconnect.is_enabled());
        // Unspecified reconnect fields keep their defaults
        assert_eq!(config.reconnect.multiplier, 2);
    }
}
