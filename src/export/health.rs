use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use prometheus::{
    Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts, Registry, TextEncoder,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::session::buffer::ObservationBuffer;
use crate::session::controller::CaptureController;
use crate::session::Observation;

/// Prometheus metrics for agent health and observability.
///
/// All metrics use the "sessionoor" namespace. The HTTP server also
/// hosts the local capture-control surface and an observation ingest
/// route standing in for the capture layer.
pub struct HealthMetrics {
    registry: Registry,
    addr: String,
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    /// Total observations received on the ingest path.
    pub observations_received: Counter,
    /// Total observations rejected by the ingest filter.
    pub observations_filtered: Counter,
    /// Total observations accepted into the buffer.
    pub observations_buffered: Counter,
    /// Observations currently buffered across all devices.
    pub buffered_observations: Gauge,
    /// Whether capture is active (1=yes, 0=no).
    pub capture_active: Gauge,
    /// Total flush cycles, periodic and forced.
    pub flush_cycles: Counter,
    /// Total session summaries delivered to the sink.
    pub summaries_sent: Counter,
    /// Total session summaries that failed delivery.
    pub summaries_failed: Counter,
    /// Control plane polls by status.
    pub control_polls: CounterVec,
    /// Flush cycle duration including sends.
    pub flush_duration: Histogram,
}

impl HealthMetrics {
    /// Creates a new health metrics instance with all metrics registered.
    pub fn new(addr: &str) -> Result<Self> {
        let registry = Registry::new();

        let observations_received = Counter::with_opts(
            Opts::new(
                "observations_received_total",
                "Total observations received on the ingest path.",
            )
            .namespace("sessionoor"),
        )?;
        let observations_filtered = Counter::with_opts(
            Opts::new(
                "observations_filtered_total",
                "Total observations rejected by the ingest filter.",
            )
            .namespace("sessionoor"),
        )?;
        let observations_buffered = Counter::with_opts(
            Opts::new(
                "observations_buffered_total",
                "Total observations accepted into the buffer.",
            )
            .namespace("sessionoor"),
        )?;
        let buffered_observations = Gauge::with_opts(
            Opts::new(
                "buffered_observations",
                "Observations currently buffered across all devices.",
            )
            .namespace("sessionoor"),
        )?;
        let capture_active = Gauge::with_opts(
            Opts::new("capture_active", "Whether capture is active (1=yes, 0=no).")
                .namespace("sessionoor"),
        )?;
        let flush_cycles = Counter::with_opts(
            Opts::new(
                "flush_cycles_total",
                "Total flush cycles, periodic and forced.",
            )
            .namespace("sessionoor"),
        )?;
        let summaries_sent = Counter::with_opts(
            Opts::new(
                "summaries_sent_total",
                "Total session summaries delivered to the sink.",
            )
            .namespace("sessionoor"),
        )?;
        let summaries_failed = Counter::with_opts(
            Opts::new(
                "summaries_failed_total",
                "Total session summaries that failed delivery.",
            )
            .namespace("sessionoor"),
        )?;
        let control_polls = CounterVec::new(
            Opts::new("control_polls_total", "Control plane polls by status.")
                .namespace("sessionoor"),
            &["status"],
        )?;
        let flush_duration = Histogram::with_opts(
            HistogramOpts::new(
                "flush_duration_seconds",
                "Flush cycle duration including sends.",
            )
            .namespace("sessionoor")
            .buckets(vec![0.001, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0]),
        )?;

        registry.register(Box::new(observations_received.clone()))?;
        registry.register(Box::new(observations_filtered.clone()))?;
        registry.register(Box::new(observations_buffered.clone()))?;
        registry.register(Box::new(buffered_observations.clone()))?;
        registry.register(Box::new(capture_active.clone()))?;
        registry.register(Box::new(flush_cycles.clone()))?;
        registry.register(Box::new(summaries_sent.clone()))?;
        registry.register(Box::new(summaries_failed.clone()))?;
        registry.register(Box::new(control_polls.clone()))?;
        registry.register(Box::new(flush_duration.clone()))?;

        Ok(Self {
            registry,
            addr: addr.to_string(),
            shutdown: parking_lot::Mutex::new(None),
            observations_received,
            observations_filtered,
            observations_buffered,
            buffered_observations,
            capture_active,
            flush_cycles,
            summaries_sent,
            summaries_failed,
            control_polls,
            flush_duration,
        })
    }

    /// Starts the HTTP server serving /metrics, /healthz, the local
    /// control surface, and the observation ingest route.
    pub async fn start(
        &self,
        controller: Arc<CaptureController>,
        buffer: Arc<ObservationBuffer>,
        ingest: mpsc::Sender<Observation>,
    ) -> Result<()> {
        let addr = if self.addr.is_empty() {
            ":9090"
        } else {
            &self.addr
        };

        // Parse address, handling ":port" shorthand.
        let bind_addr = if addr.starts_with(':') {
            format!("0.0.0.0{addr}")
        } else {
            addr.to_string()
        };

        let app_state = Arc::new(AppState {
            registry: self.registry.clone(),
            controller,
            buffer,
            ingest,
        });

        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .route("/control/start", post(control_start_handler))
            .route("/control/stop", post(control_stop_handler))
            .route("/control/cancel", post(control_cancel_handler))
            .route("/control/status", get(control_status_handler))
            .route("/observations", post(observations_handler))
            .with_state(app_state);

        let listener = TcpListener::bind(&bind_addr)
            .await
            .with_context(|| format!("listening on {bind_addr}"))?;

        let local_addr = listener.local_addr().context("getting local address")?;

        let cancel = CancellationToken::new();
        *self.shutdown.lock() = Some(cancel.clone());

        tokio::spawn(async move {
            tracing::info!(addr = %local_addr, "health server started");

            let result = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "health server error");
            }
        });

        Ok(())
    }

    /// Gracefully shuts down the health server.
    pub async fn stop(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }

        Ok(())
    }
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
    controller: Arc<CaptureController>,
    buffer: Arc<ObservationBuffer>,
    ingest: mpsc::Sender<Observation>,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}

/// POST /control/start - Local override: begin capturing.
async fn control_start_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.start().await;
    (StatusCode::OK, "started")
}

/// POST /control/stop - Local override: stop and flush pending data.
async fn control_stop_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.stop().await;
    (StatusCode::OK, "stopped")
}

/// POST /control/cancel - Local override: stop and discard pending data.
async fn control_cancel_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.controller.cancel().await;
    (StatusCode::OK, "cancelled")
}

/// Capture state snapshot returned by /control/status.
#[derive(serde::Serialize)]
struct StatusResponse {
    state: &'static str,
    buffered_observations: usize,
    buffered_devices: usize,
}

/// GET /control/status - Current capture state and buffer occupancy.
async fn control_status_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let resp = StatusResponse {
        state: state.controller.state().await.as_str(),
        buffered_observations: state.buffer.observation_count(),
        buffered_devices: state.buffer.device_count(),
    };

    (StatusCode::OK, Json(resp))
}

/// POST /observations - Enqueue one observation for ingest.
async fn observations_handler(
    State(state): State<Arc<AppState>>,
    Json(obs): Json<Observation>,
) -> StatusCode {
    match state.ingest.try_send(obs) {
        Ok(()) => StatusCode::ACCEPTED,
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}
