use crate::session::Observation;

/// Broadcast and multicast device ids carry no session information.
const BROADCAST_PREFIX: &str = "ff:";

/// Returns whether an observation should be admitted to the buffer.
///
/// Rejects observations with missing identifiers and broadcast or
/// multicast device addresses.
pub fn accepts(obs: &Observation) -> bool {
    if obs.device_id.is_empty() || obs.access_point_id.is_empty() {
        return false;
    }

    if obs.device_id.to_ascii_lowercase().starts_with(BROADCAST_PREFIX) {
        return false;
    }

    true
}
