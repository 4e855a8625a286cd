use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ControlConfig;
use crate::export::health::HealthMetrics;
use crate::latch::EdgeLatch;
use crate::session::controller::{CaptureController, CaptureState};

/// Capture state desired by the control plane.
#[derive(Debug, Clone, Default)]
pub struct DesiredState {
    pub active: bool,
    pub updated_at: Option<String>,
}

/// Source of the desired capture state.
pub trait ControlSource: Send + Sync {
    fn fetch_desired(&self) -> impl std::future::Future<Output = Result<DesiredState>> + Send;
}

/// HTTP control-plane client.
pub struct Client {
    http: reqwest::Client,
    endpoint: String,
    headers: std::collections::HashMap<String, String>,
}

impl Client {
    /// Creates a new control-plane client from config.
    pub fn new(cfg: &ControlConfig) -> Result<Self> {
        let timeout = if cfg.timeout.is_zero() {
            Duration::from_secs(5)
        } else {
            cfg.timeout
        };

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build control HTTP client")?;

        Ok(Self {
            http,
            endpoint: cfg.endpoint.clone(),
            headers: cfg.headers.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
struct StatusApiResponse {
    #[serde(default)]
    capture_active: bool,
    #[serde(default)]
    updated_at: Option<String>,
}

impl ControlSource for Client {
    async fn fetch_desired(&self) -> Result<DesiredState> {
        let mut req = self.http.post(&self.endpoint).json(&serde_json::json!({}));
        for (key, value) in &self.headers {
            req = req.header(key, value);
        }

        let resp = req
            .send()
            .await
            .context("control status request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            bail!("control endpoint returned {status}: {body}");
        }

        let parsed: StatusApiResponse = resp
            .json()
            .await
            .context("failed to decode control status response")?;

        Ok(DesiredState {
            active: parsed.capture_active,
            updated_at: parsed.updated_at,
        })
    }
}

/// Polls the control source and applies desired-state edges to the
/// capture controller.
///
/// Only changes in the desired state trigger transitions. The first
/// successful poll seeds the baseline and reconciles it against the
/// controller; after that the last known desired value advances only on
/// successful polls, so a failure can never mask an edge.
pub struct Reconciler<S: ControlSource> {
    source: S,
    controller: Arc<CaptureController>,
    last_known_desired: Option<bool>,
    poll_failure: EdgeLatch,
    health: Option<Arc<HealthMetrics>>,
}

impl<S: ControlSource> Reconciler<S> {
    /// Creates a reconciler with no known baseline.
    pub fn new(
        source: S,
        controller: Arc<CaptureController>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            source,
            controller,
            last_known_desired: None,
            poll_failure: EdgeLatch::new(),
            health,
        }
    }

    /// Poll loop. Runs until cancelled.
    pub async fn run(mut self, poll_interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = ticker.tick() => self.poll_once().await,
            }
        }
    }

    /// One poll/compare/apply pass.
    pub async fn poll_once(&mut self) {
        let desired = match self.source.fetch_desired().await {
            Ok(desired) => {
                if let Some(health) = &self.health {
                    health.control_polls.with_label_values(&["success"]).inc();
                }

                if self.poll_failure.cleared() {
                    info!("control status polling recovered");
                }

                desired.active
            }
            Err(e) => {
                if let Some(health) = &self.health {
                    health.control_polls.with_label_values(&["error"]).inc();
                }

                // Failed cycles leave the baseline untouched.
                if self.poll_failure.entered() {
                    warn!(error = %e, "control status poll failed, suppressing repeats until recovery");
                } else {
                    debug!(error = %e, "control status poll failed");
                }

                return;
            }
        };

        match self.last_known_desired {
            None => {
                self.last_known_desired = Some(desired);

                let active = self.controller.state().await == CaptureState::Active;
                if desired != active {
                    info!(desired, "seeding capture state from control plane");
                    self.apply(desired).await;
                }
            }
            Some(prev) if prev != desired => {
                self.last_known_desired = Some(desired);
                info!(desired, "control plane requested capture state change");
                self.apply(desired).await;
            }
            Some(_) => {}
        }
    }

    async fn apply(&self, desired: bool) {
        if desired {
            self.controller.start().await;
        } else {
            self.controller.stop().await;
        }
    }
}
