use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::schedule::{Schedule, Setpoints};
use crate::error::{ControlError, ControlResult};

/// Per-zone heating preferences.
///
/// Every field carries an explicit default, so a partially specified JSON or
/// TOML document always yields a complete structure. Validate once at the load
/// boundary with [`ZonePreferences::validated`]; downstream code reads fields
/// directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_target_limits", skip_on_field_errors = false))]
pub struct ZonePreferences {
    pub schedule: Schedule,

    #[validate(range(min = 5.0, max = 35.0))]
    pub default_occupied_temp: f64,
    #[validate(range(min = 5.0, max = 35.0))]
    pub default_unoccupied_temp: f64,
    #[validate(range(min = 5.0, max = 35.0))]
    pub min_target_temp: f64,
    #[validate(range(min = 5.0, max = 35.0))]
    pub max_target_temp: f64,

    pub use_occupancy_for_heating: bool,
    pub setback_setpoint: Option<f64>,

    // Energy price response (occupied periods only)
    #[validate(range(min = 0.0, max = 10.0))]
    pub peak_occupied_temp_reduction: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub super_peak_occupied_temp_reduction: f64,
    pub allow_off_peak_preconditioning: bool,
    #[validate(range(min = 0.0, max = 10.0))]
    pub off_peak_occupied_temp_increase: f64,

    // Predictive control
    pub allow_predictive_control: bool,
    #[validate(range(min = 1, max = 48))]
    pub predictive_window_hours: u32,
    #[validate(range(min = 0.0))]
    pub predictive_temp_drop_threshold: f64,
    #[validate(range(min = 0.0))]
    pub predictive_temp_rise_threshold: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub predictive_preheat_increase: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub predictive_avoid_overheat_reduction: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub max_combined_preheat_boost: f64,
    pub prioritize_comfort_over_peak_cost: bool,

    // Outdoor override
    pub high_outside_temp_threshold: f64,
    #[validate(range(min = 0.0, max = 10.0))]
    pub occupied_temp_reduction_high_outside: f64,

    // Thermal model coefficients
    #[serde(alias = "heating_rate_degC_per_hour")]
    #[validate(range(min = 0.0, max = 20.0))]
    pub heating_rate_degc_per_hour: f64,
    #[validate(range(min = 0.0, max = 5.0))]
    pub cooling_rate_factor_per_hour: f64,
}

impl Default for ZonePreferences {
    fn default() -> Self {
        Self {
            schedule: Schedule::default(),
            default_occupied_temp: 21.0,
            default_unoccupied_temp: 17.0,
            min_target_temp: 15.0,
            max_target_temp: 25.0,
            use_occupancy_for_heating: true,
            setback_setpoint: None,
            peak_occupied_temp_reduction: 1.0,
            super_peak_occupied_temp_reduction: 2.0,
            allow_off_peak_preconditioning: false,
            off_peak_occupied_temp_increase: 0.5,
            allow_predictive_control: false,
            predictive_window_hours: 3,
            predictive_temp_drop_threshold: 5.0,
            predictive_temp_rise_threshold: 5.0,
            predictive_preheat_increase: 1.0,
            predictive_avoid_overheat_reduction: 0.5,
            max_combined_preheat_boost: 2.0,
            prioritize_comfort_over_peak_cost: false,
            high_outside_temp_threshold: 21.0,
            occupied_temp_reduction_high_outside: 1.0,
            heating_rate_degc_per_hour: 1.0,
            cooling_rate_factor_per_hour: 0.1,
        }
    }
}

fn validate_target_limits(p: &ZonePreferences) -> Result<(), ValidationError> {
    if p.min_target_temp > p.max_target_temp {
        let mut err = ValidationError::new("target_limits");
        err.message = Some(
            format!(
                "min_target_temp {} exceeds max_target_temp {}",
                p.min_target_temp, p.max_target_temp
            )
            .into(),
        );
        return Err(err);
    }
    if p.setback_setpoint.is_some_and(|s| !s.is_finite()) {
        return Err(ValidationError::new("setback_setpoint"));
    }
    Ok(())
}

impl ZonePreferences {
    /// Run field and cross-field validation, returning the preferences on success.
    pub fn validated(self) -> ControlResult<Self> {
        self.validate()?;
        Ok(self)
    }

    pub fn from_json_str(s: &str) -> ControlResult<Self> {
        let prefs: Self = serde_json::from_str(s)
            .map_err(|e| ControlError::config(format!("invalid zone preferences: {e}")))?;
        prefs.validated()
    }

    pub fn from_toml_str(s: &str) -> ControlResult<Self> {
        let prefs: Self = toml::from_str(s)
            .map_err(|e| ControlError::config(format!("invalid zone preferences: {e}")))?;
        prefs.validated()
    }

    pub fn default_setpoints(&self) -> Setpoints {
        Setpoints {
            occupied_c: self.default_occupied_temp,
            unoccupied_c: self.default_unoccupied_temp,
        }
    }

    pub fn clamp_target(&self, value: f64) -> f64 {
        value.max(self.min_target_temp).min(self.max_target_temp)
    }
}
