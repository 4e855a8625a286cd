pub mod buffer;
pub mod controller;
pub mod flush;
pub mod reduce;

use serde::{Deserialize, Serialize};

/// One recorded device-sighting event. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Stable identifier of the originating device.
    pub device_id: String,

    /// Identifier of the access point the device was observed against.
    pub access_point_id: String,

    /// Received signal strength, absent when unmeasurable.
    #[serde(default)]
    pub signal_strength: Option<i32>,

    /// Seconds since the UNIX epoch at capture time.
    pub timestamp: f64,
}

/// All buffered observations for one device since the last drain,
/// in arrival order.
pub type DeviceGroup = Vec<Observation>;
