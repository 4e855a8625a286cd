use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Top-level agent configuration, loaded from YAML.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Log level filter (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Human-readable name for this agent instance, attached to logs.
    #[serde(default)]
    pub device_name: String,

    /// Control-plane polling configuration.
    #[serde(default)]
    pub control: ControlConfig,

    /// Session aggregation configuration.
    #[serde(default)]
    pub aggregation: AggregationConfig,

    /// Summary sink configuration.
    #[serde(default)]
    pub sink: SinkConfig,

    /// Observation ingestion configuration.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Health and metrics server configuration.
    #[serde(default)]
    pub health: HealthConfig,
}

/// Control-plane polling settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    /// Status endpoint URL. Empty disables remote control; the local
    /// control surface stays available.
    #[serde(default)]
    pub endpoint: String,

    /// Extra headers sent with each poll.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Poll interval.
    #[serde(default = "default_poll_interval", with = "humantime_serde")]
    pub poll_interval: Duration,

    /// Per-request timeout.
    #[serde(default = "default_control_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Session aggregation settings.
#[derive(Debug, Clone, Deserialize)]
pub struct AggregationConfig {
    /// Periodic flush interval.
    #[serde(default = "default_flush_interval", with = "humantime_serde")]
    pub flush_interval: Duration,
}

/// Summary sink settings.
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    /// Exporter kind: "http" or "log".
    #[serde(default = "default_exporter")]
    pub exporter: String,

    /// Destination URL for the http exporter.
    #[serde(default)]
    pub address: String,

    /// Extra headers sent with each summary.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Per-summary send timeout.
    #[serde(default = "default_sink_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

/// Observation ingestion settings.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Bounded queue size between the ingest surface and the buffer.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

/// Health and metrics server settings.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Whether to run the health server.
    #[serde(default = "default_health_enabled")]
    pub enabled: bool,

    /// Bind address. A bare ":port" binds all interfaces.
    #[serde(default = "default_health_addr")]
    pub addr: String,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_control_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_flush_interval() -> Duration {
    Duration::from_secs(30)
}

fn default_exporter() -> String {
    "http".to_string()
}

fn default_sink_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_queue_size() -> usize {
    1024
}

fn default_health_enabled() -> bool {
    true
}

fn default_health_addr() -> String {
    ":9090".to_string()
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            headers: HashMap::new(),
            poll_interval: default_poll_interval(),
            timeout: default_control_timeout(),
        }
    }
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            flush_interval: default_flush_interval(),
        }
    }
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            exporter: default_exporter(),
            address: String::new(),
            headers: HashMap::new(),
            timeout: default_sink_timeout(),
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            queue_size: default_queue_size(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: default_health_enabled(),
            addr: default_health_addr(),
        }
    }
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;

        let config: Config =
            serde_yaml::from_str(&contents).context("failed to parse config file")?;

        config.validate()?;

        Ok(config)
    }

    /// Validates configuration values.
    pub fn validate(&self) -> Result<()> {
        if self.aggregation.flush_interval.is_zero() {
            bail!("aggregation.flush_interval must be positive");
        }

        if self.control.poll_interval.is_zero() {
            bail!("control.poll_interval must be positive");
        }

        if self.control.timeout.is_zero() {
            bail!("control.timeout must be positive");
        }

        if self.sink.timeout.is_zero() {
            bail!("sink.timeout must be positive");
        }

        if self.ingest.queue_size == 0 {
            bail!("ingest.queue_size must be positive");
        }

        match self.sink.exporter.as_str() {
            "http" => {
                if self.sink.address.is_empty() {
                    bail!("sink.address is required when sink.exporter is \"http\"");
                }
            }
            "log" => {}
            other => bail!("unknown sink.exporter: {other} (expected \"http\" or \"log\")"),
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Config {
        serde_yaml::from_str(yaml).expect("config should parse")
    }

    #[test]
    fn test_defaults() {
        let config = parse("sink:\n  exporter: log\n");

        assert_eq!(config.log_level, "info");
        assert_eq!(config.control.poll_interval, Duration::from_secs(5));
        assert_eq!(config.control.timeout, Duration::from_secs(5));
        assert_eq!(config.aggregation.flush_interval, Duration::from_secs(30));
        assert_eq!(config.sink.timeout, Duration::from_secs(10));
        assert_eq!(config.ingest.queue_size, 1024);
        assert!(config.health.enabled);
        assert_eq!(config.health.addr, ":9090");

        config.validate().expect("defaults should validate");
    }

    #[test]
    fn test_full_config_parses() {
        let config = parse(
            r#"
log_level: debug
device_name: lobby-agent
control:
  endpoint: http://controller:8080/api/status
  poll_interval: 10s
  timeout: 2s
  headers:
    authorization: Bearer token
aggregation:
  flush_interval: 1m
sink:
  exporter: http
  address: http://collector:9000/summaries
  timeout: 3s
ingest:
  queue_size: 256
health:
  enabled: false
  addr: ":9999"
"#,
        );

        assert_eq!(config.device_name, "lobby-agent");
        assert_eq!(config.control.poll_interval, Duration::from_secs(10));
        assert_eq!(config.aggregation.flush_interval, Duration::from_secs(60));
        assert_eq!(config.sink.address, "http://collector:9000/summaries");
        assert_eq!(config.ingest.queue_size, 256);
        assert!(!config.health.enabled);

        config.validate().expect("config should validate");
    }

    #[test]
    fn test_http_exporter_requires_address() {
        let config = parse("sink:\n  exporter: http\n");

        let err = config.validate().expect_err("missing address should fail");
        assert!(err.to_string().contains("sink.address is required"));
    }

    #[test]
    fn test_unknown_exporter_rejected() {
        let config = parse("sink:\n  exporter: kafka\n");

        let err = config.validate().expect_err("unknown exporter should fail");
        assert!(err.to_string().contains("unknown sink.exporter"));
    }

    #[test]
    fn test_zero_flush_interval_rejected() {
        let config = parse("sink:\n  exporter: log\naggregation:\n  flush_interval: 0s\n");

        let err = config.validate().expect_err("zero interval should fail");
        assert!(err.to_string().contains("flush_interval must be positive"));
    }
}
