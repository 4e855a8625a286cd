use std::collections::HashSet;

use chrono::{Datelike, Local, Timelike};
use serde::Serialize;

use super::DeviceGroup;

/// Mean reported when a group carries no measurable signal.
pub const NO_SIGNAL_MEAN: f64 = -99.0;

/// Reduced feature record, one per device per flush cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSummary {
    /// Device the group was keyed by.
    pub device_id: String,
    /// Max minus min observation timestamp, in seconds.
    pub duration_total: f64,
    /// Count of distinct access points seen, not of transitions.
    pub ap_switch_count: usize,
    /// Size of the group.
    pub observation_count: usize,
    /// Mean signal strength over measurable observations.
    pub signal_mean: f64,
    /// Population standard deviation over measurable observations.
    pub signal_std_dev: f64,
    /// Observations without a signal value.
    pub missing_signal_count: usize,
    /// Local hour at flush time.
    pub hour_of_day: u32,
    /// Local weekday at flush time, Monday is 0.
    pub day_of_week: u32,
    /// Local minute of day at flush time.
    pub minute_of_day: u32,
}

/// Wall-clock fields sampled once per flush cycle, so every summary in
/// the same cycle carries identical time-of-day values.
#[derive(Debug, Clone, Copy)]
pub struct FlushClock {
    pub hour_of_day: u32,
    pub day_of_week: u32,
    pub minute_of_day: u32,
}

impl FlushClock {
    /// Samples the local wall clock.
    pub fn now() -> Self {
        let now = Local::now();
        Self {
            hour_of_day: now.hour(),
            day_of_week: now.weekday().num_days_from_monday(),
            minute_of_day: now.hour() * 60 + now.minute(),
        }
    }
}

/// Reduces one device group into a session summary.
///
/// Pure over the group contents; time-of-day fields come from the given
/// flush clock, not from observation timestamps. The group must be
/// non-empty; callers filter empty groups before reducing.
pub fn reduce(device_id: &str, group: &DeviceGroup, clock: FlushClock) -> SessionSummary {
    let mut min_ts = f64::INFINITY;
    let mut max_ts = f64::NEG_INFINITY;
    let mut distinct_aps: HashSet<&str> = HashSet::new();
    let mut signals = Vec::with_capacity(group.len());

    for obs in group {
        min_ts = min_ts.min(obs.timestamp);
        max_ts = max_ts.max(obs.timestamp);
        distinct_aps.insert(obs.access_point_id.as_str());

        if let Some(signal) = obs.signal_strength {
            signals.push(f64::from(signal));
        }
    }

    let duration_total = round2((max_ts - min_ts).max(0.0));

    let (signal_mean, signal_std_dev) = if signals.is_empty() {
        (NO_SIGNAL_MEAN, 0.0)
    } else {
        let mean = signals.iter().sum::<f64>() / signals.len() as f64;

        let std_dev = if signals.len() > 1 {
            let variance =
                signals.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / signals.len() as f64;
            variance.sqrt()
        } else {
            0.0
        };

        (round2(mean), round2(std_dev))
    };

    SessionSummary {
        device_id: device_id.to_string(),
        duration_total,
        ap_switch_count: distinct_aps.len(),
        observation_count: group.len(),
        signal_mean,
        signal_std_dev,
        missing_signal_count: group.len() - signals.len(),
        hour_of_day: clock.hour_of_day,
        day_of_week: clock.day_of_week,
        minute_of_day: clock.minute_of_day,
    }
}

/// Rounds to two decimal places.
fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
