use std::collections::HashMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::SinkConfig;
use crate::session::reduce::SessionSummary;

/// HTTP sink delivering one JSON-encoded summary per POST request.
///
/// Every request is bounded by the configured timeout; a timed-out or
/// failed delivery surfaces as an error for the caller to log and skip.
pub struct HttpSink {
    http: reqwest::Client,
    address: String,
    headers: HashMap<String, String>,
}

impl HttpSink {
    /// Creates a new HTTP sink from configuration.
    pub fn new(cfg: &SinkConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(10)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            address: cfg.address.clone(),
            headers: cfg.headers.clone(),
        })
    }

    /// Returns the sink name for logging.
    pub fn name(&self) -> &str {
        "http"
    }

    /// POST the summary as JSON. Non-2xx statuses are errors.
    pub async fn send(&self, summary: &SessionSummary) -> Result<()> {
        let mut request = self.http.post(&self.address).json(summary);

        for (k, v) in &self.headers {
            request = request.header(k.as_str(), v.as_str());
        }

        let resp = request.send().await.context("sending session summary")?;

        let status = resp.status();
        // Drain body for connection reuse.
        let _ = resp.bytes().await;

        if !status.is_success() {
            bail!("summary delivery unexpected status: {status}");
        }

        debug!(device_id = %summary.device_id, "delivered session summary");

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_wire_format() {
        let summary = SessionSummary {
            device_id: "aa:bb".to_string(),
            duration_total: 10.0,
            ap_switch_count: 2,
            observation_count: 3,
            signal_mean: -50.0,
            signal_std_dev: 10.0,
            missing_signal_count: 1,
            hour_of_day: 14,
            day_of_week: 2,
            minute_of_day: 870,
        };

        let json: serde_json::Value =
            serde_json::to_value(&summary).expect("summary should serialize");

        assert_eq!(json["device_id"], "aa:bb");
        assert_eq!(json["duration_total"], 10.0);
        assert_eq!(json["ap_switch_count"], 2);
        assert_eq!(json["observation_count"], 3);
        assert_eq!(json["signal_mean"], -50.0);
        assert_eq!(json["signal_std_dev"], 10.0);
        assert_eq!(json["missing_signal_count"], 1);
        assert_eq!(json["hour_of_day"], 14);
        assert_eq!(json["day_of_week"], 2);
        assert_eq!(json["minute_of_day"], 870);
    }

    #[test]
    fn test_new_applies_default_timeout() {
        let cfg = SinkConfig {
            address: "http://localhost:8686/capture".to_string(),
            timeout: Duration::ZERO,
            ..Default::default()
        };

        let sink = HttpSink::new(&cfg).expect("sink should build");
        assert_eq!(sink.name(), "http");
        assert_eq!(sink.address, "http://localhost:8686/capture");
    }
}
