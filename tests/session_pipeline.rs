use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use sessionoor::control::{ControlSource, DesiredState, Reconciler};
use sessionoor::ingest;
use sessionoor::session::buffer::ObservationBuffer;
use sessionoor::session::controller::{CaptureController, CaptureState};
use sessionoor::session::flush::Flusher;
use sessionoor::session::reduce::NO_SIGNAL_MEAN;
use sessionoor::session::Observation;
use sessionoor::sink::{MemorySink, Sink};

fn obs(device: &str, ap: &str, signal: Option<i32>, timestamp: f64) -> Observation {
    Observation {
        device_id: device.to_string(),
        access_point_id: ap.to_string(),
        signal_strength: signal,
        timestamp,
    }
}

fn pipeline(
    sink: MemorySink,
) -> (
    Arc<ObservationBuffer>,
    Arc<Flusher>,
    Arc<CaptureController>,
) {
    let buffer = Arc::new(ObservationBuffer::new());
    let flusher = Arc::new(Flusher::new(
        Arc::clone(&buffer),
        Sink::Memory(sink),
        None,
    ));
    let controller = Arc::new(CaptureController::new(
        Arc::clone(&buffer),
        Arc::clone(&flusher),
        None,
    ));
    (buffer, flusher, controller)
}

#[tokio::test]
async fn test_full_capture_cycle_delivers_expected_summary() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;

    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));
    buffer.add(obs("aa:bb", "ap-x", None, 1004.0));
    buffer.add(obs("aa:bb", "ap-y", Some(-60), 1010.0));

    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 1);

    let summary = &sent[0];
    assert_eq!(summary.device_id, "aa:bb");
    assert_eq!(summary.duration_total, 10.0);
    assert_eq!(summary.ap_switch_count, 2);
    assert_eq!(summary.observation_count, 3);
    assert_eq!(summary.missing_signal_count, 1);
    assert_eq!(summary.signal_mean, -50.0);
    assert_eq!(summary.signal_std_dev, 10.0);
}

#[tokio::test]
async fn test_summaries_share_time_of_day_within_one_flush() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;
    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));
    buffer.add(obs("cc:dd", "ap-y", Some(-60), 1005.0));
    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].hour_of_day, sent[1].hour_of_day);
    assert_eq!(sent[0].day_of_week, sent[1].day_of_week);
    assert_eq!(sent[0].minute_of_day, sent[1].minute_of_day);
}

#[tokio::test]
async fn test_all_absent_signals_use_sentinel_mean() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;
    buffer.add(obs("aa:bb", "ap-x", None, 1000.0));
    buffer.add(obs("aa:bb", "ap-x", None, 1002.0));
    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].signal_mean, NO_SIGNAL_MEAN);
    assert_eq!(sent[0].signal_std_dev, 0.0);
    assert_eq!(sent[0].missing_signal_count, 2);
}

#[tokio::test]
async fn test_cancel_discards_while_stop_delivers() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;
    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));
    controller.cancel().await;

    assert!(memory.sent().is_empty());
    assert_eq!(controller.state().await, CaptureState::Idle);

    controller.start().await;
    buffer.add(obs("cc:dd", "ap-y", Some(-60), 2000.0));
    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device_id, "cc:dd");
}

#[tokio::test]
async fn test_one_failing_device_does_not_block_the_rest() {
    let memory = MemorySink::failing_for(["aa:bb".to_string()]);
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;
    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));
    buffer.add(obs("cc:dd", "ap-y", Some(-60), 1000.0));
    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device_id, "cc:dd");

    // Failed summaries are dropped, never retried on the next cycle.
    controller.start().await;
    controller.stop().await;
    assert_eq!(memory.sent().len(), 1);
}

#[tokio::test]
async fn test_ingest_filter_rejects_broadcast_frames() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    controller.start().await;

    let frames = vec![
        obs("aa:bb", "ap-x", Some(-40), 1000.0),
        obs("ff:ff:ff:ff:ff:ff", "ap-x", Some(-10), 1001.0),
        obs("", "ap-x", Some(-40), 1002.0),
    ];

    for frame in frames {
        if ingest::accepts(&frame) {
            buffer.add(frame);
        }
    }

    controller.stop().await;

    let sent = memory.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].device_id, "aa:bb");
    assert_eq!(sent[0].observation_count, 1);
}

#[tokio::test]
async fn test_periodic_flush_drains_while_active() {
    let memory = MemorySink::new();
    let (buffer, flusher, controller) = pipeline(memory.clone());

    controller.start().await;
    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));

    let cancel = CancellationToken::new();
    flusher.spawn_periodic(Duration::from_millis(20), cancel.clone());

    tokio::time::sleep(Duration::from_millis(300)).await;
    cancel.cancel();

    assert_eq!(memory.sent().len(), 1);
    assert_eq!(buffer.observation_count(), 0);
}

struct ScriptedSource {
    responses: parking_lot::Mutex<std::collections::VecDeque<Result<DesiredState>>>,
}

impl ScriptedSource {
    fn new(responses: Vec<Result<DesiredState>>) -> Self {
        Self {
            responses: parking_lot::Mutex::new(responses.into()),
        }
    }
}

impl ControlSource for ScriptedSource {
    async fn fetch_desired(&self) -> Result<DesiredState> {
        self.responses
            .lock()
            .pop_front()
            .expect("scripted source exhausted")
    }
}

#[tokio::test]
async fn test_reconciler_drives_capture_end_to_end() {
    let memory = MemorySink::new();
    let (buffer, _flusher, controller) = pipeline(memory.clone());

    let source = ScriptedSource::new(vec![
        Ok(DesiredState {
            active: true,
            updated_at: None,
        }),
        Ok(DesiredState {
            active: true,
            updated_at: None,
        }),
        Ok(DesiredState {
            active: false,
            updated_at: None,
        }),
    ]);
    let mut reconciler = Reconciler::new(source, Arc::clone(&controller), None);

    // First poll seeds the baseline and activates capture.
    reconciler.poll_once().await;
    assert_eq!(controller.state().await, CaptureState::Active);

    buffer.add(obs("aa:bb", "ap-x", Some(-40), 1000.0));

    // Unchanged desired state leaves the buffer alone.
    reconciler.poll_once().await;
    assert_eq!(buffer.observation_count(), 1);

    // Deactivation edge stops and flushes.
    reconciler.poll_once().await;
    assert_eq!(controller.state().await, CaptureState::Idle);
    assert_eq!(memory.sent().len(), 1);
}
