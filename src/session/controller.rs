use std::sync::Arc;

use tracing::{debug, info};

use crate::export::health::HealthMetrics;

use super::buffer::ObservationBuffer;
use super::flush::Flusher;

/// Capture lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Active,
}

impl CaptureState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureState::Idle => "idle",
            CaptureState::Active => "active",
        }
    }
}

/// Owns the Idle/Active capture state machine.
///
/// Transitions hold the state mutex for their full duration, including any
/// forced flush, so Stop returns only after pending data has been handed to
/// the sink and concurrent transitions cannot interleave.
pub struct CaptureController {
    buffer: Arc<ObservationBuffer>,
    flusher: Arc<Flusher>,
    state: tokio::sync::Mutex<CaptureState>,
    health: Option<Arc<HealthMetrics>>,
}

impl CaptureController {
    /// Creates a controller starting in the Idle state.
    pub fn new(
        buffer: Arc<ObservationBuffer>,
        flusher: Arc<Flusher>,
        health: Option<Arc<HealthMetrics>>,
    ) -> Self {
        Self {
            buffer,
            flusher,
            state: tokio::sync::Mutex::new(CaptureState::Idle),
            health,
        }
    }

    /// Current lifecycle state.
    pub async fn state(&self) -> CaptureState {
        *self.state.lock().await
    }

    /// Transition to Active. A second Start while already active is a
    /// no-op and leaves buffered observations untouched.
    pub async fn start(&self) {
        let mut state = self.state.lock().await;

        if *state == CaptureState::Active {
            debug!("start ignored, capture already active");
            return;
        }

        // Leftover Idle-era data is discarded, not flushed.
        self.buffer.reset(true);
        *state = CaptureState::Active;

        if let Some(health) = &self.health {
            health.capture_active.set(1.0);
        }

        info!("capture started");
    }

    /// Transition to Idle, flushing everything buffered so far. Buffering
    /// is disabled before the flush so observations racing with Stop land
    /// in either this session or none, never a phantom next one.
    pub async fn stop(&self) {
        let mut state = self.state.lock().await;

        if *state == CaptureState::Idle {
            debug!("stop ignored, capture already idle");
            return;
        }

        self.buffer.set_active(false);
        *state = CaptureState::Idle;

        if let Some(health) = &self.health {
            health.capture_active.set(0.0);
        }

        let sent = self.flusher.flush_now().await;
        info!(summaries = sent, "capture stopped");
    }

    /// Transition to Idle discarding all buffered observations.
    pub async fn cancel(&self) {
        let mut state = self.state.lock().await;

        let discarded = self.buffer.observation_count();
        self.buffer.reset(false);
        *state = CaptureState::Idle;

        if let Some(health) = &self.health {
            health.capture_active.set(0.0);
        }

        info!(discarded, "capture cancelled");
    }
}
