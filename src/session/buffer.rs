use std::collections::HashMap;

use parking_lot::Mutex;

use super::{DeviceGroup, Observation};

/// Thread-safe accumulator of observations grouped by device.
///
/// All state lives behind a single mutex so `add`, `drain_all`, and
/// activation changes never interleave partially. Critical sections are
/// bounded by a map insert or a map swap; sends to the sink never happen
/// under the lock.
pub struct ObservationBuffer {
    inner: Mutex<Inner>,
}

struct Inner {
    groups: HashMap<String, DeviceGroup>,
    active: bool,
}

impl ObservationBuffer {
    /// Creates an empty, inactive buffer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                groups: HashMap::new(),
                active: false,
            }),
        }
    }

    /// Appends the observation to its device group, creating the group
    /// if absent. A no-op while the buffer is inactive.
    ///
    /// Returns whether the observation was buffered.
    pub fn add(&self, obs: Observation) -> bool {
        let mut inner = self.inner.lock();

        if !inner.active {
            return false;
        }

        inner
            .groups
            .entry(obs.device_id.clone())
            .or_default()
            .push(obs);

        true
    }

    /// Atomically removes and returns the entire current mapping,
    /// leaving the buffer empty. A concurrent `add` lands either fully
    /// before or fully after the swap.
    pub fn drain_all(&self) -> HashMap<String, DeviceGroup> {
        std::mem::take(&mut self.inner.lock().groups)
    }

    /// Sets the gate flag. Has no effect on already-buffered data.
    pub fn set_active(&self, active: bool) {
        self.inner.lock().active = active;
    }

    /// Clears all buffered data and sets the gate flag in one critical
    /// section, so a concurrent `add` observes either the old state or
    /// the new one in full.
    pub fn reset(&self, active: bool) {
        let mut inner = self.inner.lock();
        inner.groups.clear();
        inner.active = active;
    }

    /// Whether the buffer currently accepts observations.
    pub fn is_active(&self) -> bool {
        self.inner.lock().active
    }

    /// Total buffered observations across all devices.
    pub fn observation_count(&self) -> usize {
        self.inner.lock().groups.values().map(Vec::len).sum()
    }

    /// Number of devices with at least one buffered observation.
    pub fn device_count(&self) -> usize {
        self.inner.lock().groups.len()
    }
}

impl Default for ObservationBuffer {
    fn default() -> Self {
        Self::new()
    }
}
