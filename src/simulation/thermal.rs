use serde::{Deserialize, Serialize};

use crate::domain::ZonePreferences;

/// Safe physical band for simulated indoor temperatures.
pub const MIN_SIMULATED_TEMP_C: f64 = 10.0;
pub const MAX_SIMULATED_TEMP_C: f64 = 30.0;

/// Lumped single-zone heating model.
///
/// Heating adds a fixed rate while the heater is on; the envelope pulls the
/// zone toward outdoor temperature proportionally to the difference.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThermalModel {
    pub heating_rate_c_per_hour: f64,
    pub cooling_factor_per_hour: f64,
}

impl ThermalModel {
    pub fn new(heating_rate_c_per_hour: f64, cooling_factor_per_hour: f64) -> Self {
        Self {
            heating_rate_c_per_hour,
            cooling_factor_per_hour,
        }
    }

    pub fn from_preferences(prefs: &ZonePreferences) -> Self {
        Self::new(prefs.heating_rate_degc_per_hour, prefs.cooling_rate_factor_per_hour)
    }

    /// Unclamped temperature after `minutes` of simulated time.
    pub fn advance(&self, current_c: f64, outdoor_c: f64, heater_on: bool, minutes: f64) -> f64 {
        let heating = if heater_on {
            self.heating_rate_c_per_hour / 60.0 * minutes
        } else {
            0.0
        };
        let envelope = (outdoor_c - current_c) * self.cooling_factor_per_hour / 60.0 * minutes;
        current_c + heating + envelope
    }

    /// Same as [`advance`](Self::advance) but held inside the simulated band.
    pub fn advance_clamped(&self, current_c: f64, outdoor_c: f64, heater_on: bool, minutes: f64) -> f64 {
        clamp_simulated(self.advance(current_c, outdoor_c, heater_on, minutes))
    }
}

pub fn clamp_simulated(temp_c: f64) -> f64 {
    temp_c.clamp(MIN_SIMULATED_TEMP_C, MAX_SIMULATED_TEMP_C)
}
