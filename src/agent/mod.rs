use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::control::{Client, Reconciler};
use crate::export::health::HealthMetrics;
use crate::ingest;
use crate::session::buffer::ObservationBuffer;
use crate::session::controller::{CaptureController, CaptureState};
use crate::session::flush::Flusher;
use crate::session::Observation;
use crate::sink::{HttpSink, LogSink, Sink};

/// Agent orchestrates all components: ingest, buffer, flusher, capture
/// controller, control reconciler, and health server.
pub struct Agent {
    cfg: Config,
    health: Arc<HealthMetrics>,
    buffer: Arc<ObservationBuffer>,
    controller: Option<Arc<CaptureController>>,
    ingest_tx: Option<mpsc::Sender<Observation>>,
    cancel: CancellationToken,
}

impl Agent {
    /// Creates a new Agent, initializing health metrics.
    pub fn new(cfg: Config) -> Result<Self> {
        let health =
            Arc::new(HealthMetrics::new(&cfg.health.addr).context("creating health metrics")?);

        Ok(Self {
            cfg,
            health,
            buffer: Arc::new(ObservationBuffer::new()),
            controller: None,
            ingest_tx: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Start all components.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Build the summary sink.
        let sink = match self.cfg.sink.exporter.as_str() {
            "http" => {
                info!(address = %self.cfg.sink.address, "using http summary sink");
                Sink::Http(HttpSink::new(&self.cfg.sink).context("creating http sink")?)
            }
            _ => {
                info!("using log summary sink");
                Sink::Log(LogSink)
            }
        };

        // 2. Flusher with the periodic drain loop.
        let flusher = Arc::new(Flusher::new(
            Arc::clone(&self.buffer),
            sink,
            Some(Arc::clone(&self.health)),
        ));
        flusher.spawn_periodic(self.cfg.aggregation.flush_interval, self.cancel.child_token());
        info!(
            interval = ?self.cfg.aggregation.flush_interval,
            "periodic flush started",
        );

        // 3. Capture controller, starting idle until told otherwise.
        let controller = Arc::new(CaptureController::new(
            Arc::clone(&self.buffer),
            flusher,
            Some(Arc::clone(&self.health)),
        ));
        self.controller = Some(Arc::clone(&controller));

        // 4. Ingest channel feeding the buffer.
        let (ingest_tx, ingest_rx) = mpsc::channel(self.cfg.ingest.queue_size);
        self.ingest_tx = Some(ingest_tx.clone());
        self.spawn_ingest(ingest_rx);

        // 5. Health server, exposing metrics and the local control surface.
        if self.cfg.health.enabled {
            self.health
                .start(
                    Arc::clone(&controller),
                    Arc::clone(&self.buffer),
                    ingest_tx,
                )
                .await
                .context("starting health server")?;
        }

        // 6. Control-plane reconciler.
        if self.cfg.control.endpoint.is_empty() {
            warn!("no control endpoint configured, local control surface only");
        } else {
            let client = Client::new(&self.cfg.control).context("creating control client")?;
            let reconciler =
                Reconciler::new(client, controller, Some(Arc::clone(&self.health)));

            let poll_interval = self.cfg.control.poll_interval;
            let cancel = self.cancel.child_token();
            tokio::spawn(reconciler.run(poll_interval, cancel));

            info!(
                endpoint = %self.cfg.control.endpoint,
                interval = ?poll_interval,
                "control reconciler started",
            );
        }

        info!(device = %self.cfg.device_name, "agent fully started");

        Ok(())
    }

    /// Stop all components, flushing any remaining observations.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        if let Some(controller) = &self.controller {
            if controller.state().await == CaptureState::Active {
                controller.stop().await;
            }
        }

        self.health.stop().await?;

        Ok(())
    }

    /// Sender for pushing observations into the agent.
    pub fn observation_sender(&self) -> Option<mpsc::Sender<Observation>> {
        self.ingest_tx.clone()
    }

    fn spawn_ingest(&self, mut rx: mpsc::Receiver<Observation>) {
        let buffer = Arc::clone(&self.buffer);
        let health = Arc::clone(&self.health);
        let cancel = self.cancel.child_token();

        tokio::spawn(async move {
            loop {
                let obs = tokio::select! {
                    _ = cancel.cancelled() => return,
                    obs = rx.recv() => match obs {
                        Some(obs) => obs,
                        None => return,
                    },
                };

                health.observations_received.inc();

                if !ingest::accepts(&obs) {
                    health.observations_filtered.inc();
                    debug!(device_id = %obs.device_id, "observation filtered");
                    continue;
                }

                if buffer.add(obs) {
                    health.observations_buffered.inc();
                    health
                        .buffered_observations
                        .set(buffer.observation_count() as f64);
                }
            }
        });
    }
}
