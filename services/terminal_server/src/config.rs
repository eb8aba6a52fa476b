use anyhow::{Context, Result};
use bridge_protocol::{DEFAULT_COMMAND_PORT, DEFAULT_STREAM_PORT};
use serde::Deserialize;
use std::path::Path;

/// Runtime parameters for the terminal side. No persisted state beyond this.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub command_port: u16,
    pub stream_port: u16,
    /// How often the host scheduler is expected to call `tick()`.
    pub poll_interval_ms: u64,
    /// Bound on the per-exchange read of an accepted command connection.
    pub read_timeout_ms: u64,
    /// Push replies onto the streaming channel instead of answering the
    /// command connection.
    pub stream_only: bool,
    pub debug: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            command_port: DEFAULT_COMMAND_PORT,
            stream_port: DEFAULT_STREAM_PORT,
            poll_interval_ms: 25,
            read_timeout_ms: 50,
            stream_only: false,
            debug: false,
        }
    }
}

impl ServerConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn command_addr(&self) -> String {
        format!("{}:{}", self.host, self.command_port)
    }

    pub fn stream_addr(&self) -> String {
        format!("{}:{}", self.host, self.stream_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_fixed_ports() {
        let config = ServerConfig::default();
        assert_eq!(config.command_addr(), "127.0.0.1:15556");
        assert_eq!(config.stream_addr(), "127.0.0.1:15557");
        assert!(!config.stream_only);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config: ServerConfig = toml::from_str("command_port = 25556\nstream_only = true").unwrap();
        assert_eq!(config.command_port, 25556);
        assert!(config.stream_only);
        assert_eq!(config.stream_port, DEFAULT_STREAM_PORT);
    }
}
