pub mod http;

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use crate::session::reduce::SessionSummary;

pub use self::http::HttpSink;

/// Sink delivers one session summary at a time to a downstream consumer.
///
/// Uses enum dispatch rather than trait objects for zero-cost async
/// dispatch (avoids `Pin<Box<dyn Future>>` overhead on every send).
pub enum Sink {
    Http(HttpSink),
    Log(LogSink),
    Memory(MemorySink),
}

impl Sink {
    /// Returns the sink's name for logging.
    pub fn name(&self) -> &str {
        match self {
            Self::Http(s) => s.name(),
            Self::Log(_) => "log",
            Self::Memory(_) => "memory",
        }
    }

    /// Deliver one summary. Any non-success is a soft failure; callers
    /// log and skip without retrying within the cycle.
    pub async fn send(&self, summary: &SessionSummary) -> Result<()> {
        match self {
            Self::Http(s) => s.send(summary).await,
            Self::Log(s) => s.send(summary),
            Self::Memory(s) => s.send(summary),
        }
    }
}

/// Sink that logs each summary instead of delivering it. Used for dry runs.
pub struct LogSink;

impl LogSink {
    fn send(&self, summary: &SessionSummary) -> Result<()> {
        info!(
            device_id = %summary.device_id,
            observations = summary.observation_count,
            duration = summary.duration_total,
            signal_mean = summary.signal_mean,
            "session summary",
        );
        Ok(())
    }
}

/// In-memory sink capturing summaries, used by tests and local tooling.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<parking_lot::Mutex<Vec<SessionSummary>>>,
    fail_devices: Arc<HashSet<String>>,
}

impl MemorySink {
    /// Creates a sink that accepts every summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a sink that rejects summaries for the given devices,
    /// for exercising delivery failure paths.
    pub fn failing_for<I>(devices: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Self {
            sent: Arc::default(),
            fail_devices: Arc::new(devices.into_iter().collect()),
        }
    }

    /// Returns a snapshot of all summaries accepted so far.
    pub fn sent(&self) -> Vec<SessionSummary> {
        self.sent.lock().clone()
    }

    fn send(&self, summary: &SessionSummary) -> Result<()> {
        if self.fail_devices.contains(&summary.device_id) {
            anyhow::bail!("delivery rejected for device {}", summary.device_id);
        }

        self.sent.lock().push(summary.clone());
        Ok(())
    }
}
