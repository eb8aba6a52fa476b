use anyhow::{Context, Result};
use bridge_protocol::{DEFAULT_FANOUT_PORT, DEFAULT_STREAM_PORT};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    pub host: String,
    /// Inbound listener the terminal's streaming channel connects to.
    pub stream_port: u16,
    /// Publish/subscribe fan-out transport.
    pub fanout_port: u16,
    /// Raw byte-socket broadcaster.
    pub raw_fanout_port: u16,
    pub fanout_enabled: bool,
    /// Bound on every blocking point of the poll cycle; the stop signal is
    /// observed at least this often.
    pub poll_timeout_ms: u64,
    /// Serve Prometheus metrics from the binary.
    pub prometheus_metrics: bool,
    pub debug: bool,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            stream_port: DEFAULT_STREAM_PORT,
            fanout_port: DEFAULT_FANOUT_PORT,
            raw_fanout_port: DEFAULT_FANOUT_PORT + 1,
            fanout_enabled: true,
            poll_timeout_ms: 100,
            prometheus_metrics: false,
            debug: false,
        }
    }
}

impl ReceiverConfig {
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("failed to parse config {}", path.display()))
    }

    pub fn stream_addr(&self) -> String {
        format!("{}:{}", self.host, self.stream_port)
    }

    pub fn fanout_addr(&self) -> String {
        format!("{}:{}", self.host, self.fanout_port)
    }

    pub fn raw_fanout_addr(&self) -> String {
        format!("{}:{}", self.host, self.raw_fanout_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_the_fixed_port_pair() {
        let config = ReceiverConfig::default();
        assert_eq!(config.stream_addr(), "127.0.0.1:15557");
        assert_eq!(config.fanout_addr(), "127.0.0.1:15558");
        assert!(config.fanout_enabled);
    }
}
