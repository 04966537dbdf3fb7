use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Live state of one simulated zone.
///
/// Owned by a single register device; everyone else sees copies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneRuntimeState {
    pub current_temperature: f64,
    pub target_temperature: f64,
    pub occupancy: bool,
    pub heater_on: bool,
}

impl ZoneRuntimeState {
    /// Initial state; the heater starts on only when the zone is clearly below target.
    pub fn new(current_temperature: f64, target_temperature: f64, occupancy: bool) -> Self {
        Self {
            current_temperature,
            target_temperature,
            occupancy,
            heater_on: current_temperature < target_temperature - 0.5,
        }
    }
}

/// What the decision loop needs to know about a zone's device at the start of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ZoneSnapshot {
    pub current_temp_c: f64,
    pub target_temp_c: f64,
    pub occupied: bool,
    pub heater_on: bool,
}

impl From<ZoneRuntimeState> for ZoneSnapshot {
    fn from(s: ZoneRuntimeState) -> Self {
        Self {
            current_temp_c: s.current_temperature,
            target_temp_c: s.target_temperature,
            occupied: s.occupancy,
            heater_on: s.heater_on,
        }
    }
}

/// Latest polled snapshot of a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    pub zone_id: u32,
    pub timestamp: DateTime<Utc>,
    pub snapshot: ZoneSnapshot,
}
