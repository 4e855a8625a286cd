use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::export::health::HealthMetrics;
use crate::latch::EdgeLatch;
use crate::sink::Sink;

use super::buffer::ObservationBuffer;
use super::reduce::{reduce, FlushClock};

/// Drains the buffer, reduces each device group, and forwards the
/// resulting summaries to the sink.
///
/// The periodic tick and the forced flush issued on a Stop transition
/// share `flush_once`, serialized by an async mutex so two flushes never
/// interleave against the same drain.
pub struct Flusher {
    buffer: Arc<ObservationBuffer>,
    sink: Sink,
    gate: tokio::sync::Mutex<()>,
    send_failure: EdgeLatch,
    health: Option<Arc<HealthMetrics>>,
}

impl Flusher {
    /// Creates a new flusher over the given buffer and sink.
    pub fn new(
        buffer: Arc<ObservationBuffer>,
        sink: Sink,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            buffer,
            sink,
            gate: tokio::sync::Mutex::new(()),
            send_failure: EdgeLatch::new(),
            health,
        }
    }

    /// Immediately drain and flush, regardless of the activation flag.
    /// Used on Stop transitions and at shutdown.
    pub async fn flush_now(&self) -> usize {
        self.flush_once().await
    }

    /// One drain/reduce/send pass. Returns the number of summaries
    /// delivered.
    async fn flush_once(&self) -> usize {
        let _flush = self.gate.lock().await;
        let started = Instant::now();

        // Drain under the buffer lock only; sends happen after release.
        let groups = self.buffer.drain_all();
        if let Some(health) = &self.health {
            health.buffered_observations.set(0.0);
        }

        if groups.is_empty() {
            return 0;
        }

        let clock = FlushClock::now();
        let mut sent = 0usize;

        for (device_id, group) in groups {
            if group.is_empty() {
                continue;
            }

            let summary = reduce(&device_id, &group, clock);

            // Per-device delivery: one failure never blocks the others.
            match self.sink.send(&summary).await {
                Ok(()) => {
                    sent += 1;

                    if let Some(health) = &self.health {
                        health.summaries_sent.inc();
                    }

                    if self.send_failure.cleared() {
                        info!(sink = self.sink.name(), "summary delivery recovered");
                    }
                }
                Err(e) => {
                    if let Some(health) = &self.health {
                        health.summaries_failed.inc();
                    }

                    if self.send_failure.entered() {
                        warn!(
                            device_id = %device_id,
                            sink = self.sink.name(),
                            error = %e,
                            "summary delivery failed, suppressing repeats until recovery",
                        );
                    } else {
                        debug!(device_id = %device_id, error = %e, "summary delivery failed");
                    }
                }
            }
        }

        if let Some(health) = &self.health {
            health.flush_cycles.inc();
            health
                .flush_duration
                .observe(started.elapsed().as_secs_f64());
        }

        debug!(sent, "flush cycle complete");

        sent
    }

    /// Spawn the periodic flush loop. Runs until cancelled; a tick while
    /// the buffer is inactive drains nothing.
    pub fn spawn_periodic(self: &Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let flusher = Arc::clone(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        if !flusher.buffer.is_active() {
                            continue;
                        }

                        flusher.flush_once().await;
                    }
                }
            }
        });
    }
}
