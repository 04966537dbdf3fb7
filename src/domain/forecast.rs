use chrono::{DateTime, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Geographic location used for weather lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub latitude: f64,
    pub longitude: f64,
    pub name: Option<String>,
}

/// One hourly outdoor temperature sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HourlyTemperature {
    pub timestamp: DateTime<Utc>,
    pub temperature_c: f64,
}

/// Predicted outdoor temperature at a future offset from "now".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ForecastPoint {
    pub offset: Duration,
    /// Wall-clock time of the forecast slot, used for schedule lookups.
    pub time_of_day: NaiveTime,
    pub outdoor_temp_c: f64,
}

/// Current outdoor conditions plus an ordered forecast.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct WeatherSample {
    pub outdoor_temp_c: Option<f64>,
    pub forecast: Vec<ForecastPoint>,
}

/// Build forecast points from hourly samples strictly after `now` and no
/// further than `window_hours` ahead, in chronological order.
pub fn forecast_window(
    samples: &[HourlyTemperature],
    now: DateTime<Utc>,
    window_hours: u32,
) -> Vec<ForecastPoint> {
    let horizon = now + Duration::hours(i64::from(window_hours));
    let mut points: Vec<ForecastPoint> = samples
        .iter()
        .filter(|s| s.timestamp > now && s.timestamp <= horizon)
        .map(|s| ForecastPoint {
            offset: s.timestamp - now,
            time_of_day: s.timestamp.time(),
            outdoor_temp_c: s.temperature_c,
        })
        .collect();
    points.sort_by_key(|p| p.offset);
    points
}

/// Latest sample at or before `at`; the first sample when `at` precedes all of them.
pub fn temperature_at(samples: &[HourlyTemperature], at: DateTime<Utc>) -> Option<f64> {
    samples
        .iter()
        .filter(|s| s.timestamp <= at)
        .max_by_key(|s| s.timestamp)
        .or_else(|| samples.iter().min_by_key(|s| s.timestamp))
        .map(|s| s.temperature_c)
}
