use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;
use validator::Validate;

use crate::domain::{GeoLocation, PriceLevel, ZonePreferences};
use crate::error::{ControlError, ControlResult};
use crate::hardware::HardwareMode;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "ZHC__";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub controller: ControllerConfig,
    pub simulator: SimulatorSettings,
    pub pricing: PricingConfig,
    pub weather: WeatherConfig,
    pub zones: Vec<ZoneConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    pub control_interval_seconds: u64,
    pub poll_interval_seconds: u64,
    pub device_mode: HardwareMode,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_interval_seconds: 60,
            poll_interval_seconds: 30,
            device_mode: HardwareMode::Simulated,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SimulatorSettings {
    pub host: String,
    pub update_interval_seconds: f64,
    pub stop_timeout_seconds: f64,
    pub unit_id: u8,
}

impl Default for SimulatorSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            update_interval_seconds: 5.0,
            stop_timeout_seconds: 2.0,
            unit_id: 1,
        }
    }
}

impl SimulatorSettings {
    pub fn update_interval(&self) -> Duration {
        Duration::from_secs_f64(self.update_interval_seconds.max(0.01))
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stop_timeout_seconds.max(0.0))
    }

    pub fn bind_addr(&self, port: u16) -> ControlResult<SocketAddr> {
        format!("{}:{}", self.host, port)
            .parse()
            .map_err(|e| ControlError::config(format!("invalid simulator address {}:{port}: {e}", self.host)))
    }
}

/// Hour band `[start_hour, end_hour)` in UTC billed at `level`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct TariffBand {
    pub start_hour: u32,
    pub end_hour: u32,
    pub level: PriceLevel,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    pub bands: Vec<TariffBand>,
    pub default_level: PriceLevel,
    pub off_peak_price: f64,
    pub standard_price: f64,
    pub peak_price: f64,
    pub super_peak_price: f64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                TariffBand {
                    start_hour: 0,
                    end_hour: 7,
                    level: PriceLevel::OffPeak,
                },
                TariffBand {
                    start_hour: 17,
                    end_hour: 21,
                    level: PriceLevel::Peak,
                },
            ],
            default_level: PriceLevel::Standard,
            off_peak_price: 0.10,
            standard_price: 0.18,
            peak_price: 0.25,
            super_peak_price: 0.40,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeatherProvider {
    OpenMeteo,
    Static,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WeatherConfig {
    pub provider: WeatherProvider,
    pub forecast_base_url: String,
    pub archive_base_url: String,
    pub http_timeout_seconds: u64,
    /// Outdoor temperature served by the static provider.
    pub static_temperature_c: f64,
}

impl Default for WeatherConfig {
    fn default() -> Self {
        Self {
            provider: WeatherProvider::Static,
            forecast_base_url: "https://api.open-meteo.com".to_string(),
            archive_base_url: "https://archive-api.open-meteo.com".to_string(),
            http_timeout_seconds: 10,
            static_temperature_c: 5.0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ZoneConfig {
    pub id: u32,
    pub name: String,
    /// Register server port; 0 picks a free one.
    #[serde(default)]
    pub register_port: u16,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_initial_temp")]
    pub initial_temperature_c: f64,
    #[serde(default = "default_initial_target")]
    pub initial_target_c: f64,
    #[serde(default)]
    pub initial_occupancy: bool,
    #[serde(default = "default_heater_power")]
    pub heater_power_kw: f64,
    #[serde(default)]
    pub preferences: ZonePreferences,
}

fn default_initial_temp() -> f64 {
    20.0
}

fn default_initial_target() -> f64 {
    21.0
}

fn default_heater_power() -> f64 {
    2.0
}

impl ZoneConfig {
    pub fn location(&self) -> Option<GeoLocation> {
        Some(GeoLocation {
            latitude: self.latitude?,
            longitude: self.longitude?,
            name: Some(self.name.clone()),
        })
    }
}

impl Config {
    /// `.env`, then `config/default.toml`, then `ZHC__` environment variables.
    pub fn load() -> ControlResult<Self> {
        let _ = dotenvy::dotenv();
        Self::from_figment(
            Figment::new()
                .merge(Toml::file(DEFAULT_CONFIG_PATH))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    pub fn from_toml_str(s: &str) -> ControlResult<Self> {
        Self::from_figment(Figment::new().merge(Toml::string(s)))
    }

    fn from_figment(figment: Figment) -> ControlResult<Self> {
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> ControlResult<()> {
        if self.controller.control_interval_seconds == 0 || self.controller.poll_interval_seconds == 0 {
            return Err(ControlError::config("controller intervals must be positive"));
        }
        for band in &self.pricing.bands {
            if band.start_hour >= band.end_hour || band.end_hour > 24 {
                return Err(ControlError::config(format!(
                    "invalid tariff band {}..{}",
                    band.start_hour, band.end_hour
                )));
            }
        }

        let mut seen = HashSet::new();
        for zone in &self.zones {
            if !seen.insert(zone.id) {
                return Err(ControlError::config(format!("duplicate zone id {}", zone.id)));
            }
            zone.preferences
                .validate()
                .map_err(|e| ControlError::config(format!("zone {}: {e}", zone.id)))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = Config::from_toml_str("").unwrap();
        assert_eq!(cfg.controller.control_interval_seconds, 60);
        assert_eq!(cfg.pricing.bands.len(), 2);
        assert_eq!(cfg.weather.provider, WeatherProvider::Static);
        assert!(cfg.zones.is_empty());
    }

    #[test]
    fn zones_with_nested_preferences() {
        let cfg = Config::from_toml_str(
            r#"
            [controller]
            control_interval_seconds = 10

            [[zones]]
            id = 1
            name = "office"
            latitude = 52.5
            longitude = 13.4

            [zones.preferences]
            default_occupied_temp = 22.0
            setback_setpoint = 16.0

            [[zones.preferences.schedule]]
            time = "07:00"
            occupied_temp = 21.5
            unoccupied_temp = 17.0
            "#,
        )
        .unwrap();

        let zone = &cfg.zones[0];
        assert_eq!(cfg.controller.control_interval_seconds, 10);
        assert_eq!(zone.preferences.default_occupied_temp, 22.0);
        assert_eq!(zone.preferences.setback_setpoint, Some(16.0));
        assert_eq!(zone.preferences.schedule.entries().len(), 1);
        assert_eq!(zone.heater_power_kw, 2.0);
        assert_eq!(zone.location().unwrap().latitude, 52.5);
    }

    #[test]
    fn bad_schedule_time_is_config_error() {
        let err = Config::from_toml_str(
            r#"
            [[zones]]
            id = 1
            name = "office"
            [[zones.preferences.schedule]]
            time = "25:00"
            occupied_temp = 21.0
            unoccupied_temp = 17.0
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }

    #[test]
    fn duplicate_zone_ids_rejected() {
        let err = Config::from_toml_str(
            r#"
            [[zones]]
            id = 1
            name = "a"
            [[zones]]
            id = 1
            name = "b"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate zone id 1"));
    }

    #[test]
    fn inverted_tariff_band_rejected() {
        let err = Config::from_toml_str(
            r#"
            [pricing]
            bands = [{ start_hour = 9, end_hour = 3, level = "PEAK" }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ControlError::Config(_)));
    }
}
