//! Outdoor temperature sources.
//!
//! [`OpenMeteoClient`] talks to the Open-Meteo forecast and archive APIs;
//! [`StaticWeather`] serves a constant or an in-memory series for offline
//! runs and tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::domain::{forecast_window, temperature_at, GeoLocation, HourlyTemperature, WeatherSample};
use crate::error::{ControlError, ControlResult};

const OPEN_METEO_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M";

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait WeatherSource: Send + Sync {
    /// Outdoor temperature at `at` plus the hourly forecast for the
    /// following `window_hours`.
    async fn current_conditions(
        &self,
        location: &GeoLocation,
        at: DateTime<Utc>,
        window_hours: u32,
    ) -> ControlResult<WeatherSample>;

    /// Archived hourly temperatures for whole UTC days `start..=end`, oldest first.
    async fn historical_hourly(
        &self,
        location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ControlResult<Vec<HourlyTemperature>>;
}

#[derive(Debug, Deserialize)]
struct OpenMeteoResponse {
    #[serde(default)]
    current: Option<OpenMeteoCurrent>,
    #[serde(default)]
    hourly: Option<OpenMeteoHourly>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoCurrent {
    temperature_2m: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct OpenMeteoHourly {
    time: Vec<String>,
    temperature_2m: Vec<Option<f64>>,
}

impl OpenMeteoHourly {
    /// Pair timestamps with values; nulls and unparseable times are dropped.
    fn into_samples(self) -> Vec<HourlyTemperature> {
        let mut samples: Vec<HourlyTemperature> = self
            .time
            .iter()
            .zip(self.temperature_2m)
            .filter_map(|(t, v)| {
                let naive = NaiveDateTime::parse_from_str(t, OPEN_METEO_TIME_FORMAT).ok()?;
                Some(HourlyTemperature {
                    timestamp: Utc.from_utc_datetime(&naive),
                    temperature_c: v?,
                })
            })
            .collect();
        samples.sort_by_key(|s| s.timestamp);
        samples
    }
}

/// Open-Meteo HTTP client.
#[derive(Clone)]
pub struct OpenMeteoClient {
    client: Client,
    forecast_base_url: String,
    archive_base_url: String,
}

impl OpenMeteoClient {
    pub fn new(
        forecast_base_url: impl Into<String>,
        archive_base_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> ControlResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("zone-heating-controller/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ControlError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            forecast_base_url: forecast_base_url.into(),
            archive_base_url: archive_base_url.into(),
        })
    }

    async fn fetch(&self, url: &str, query: &[(&str, String)]) -> ControlResult<OpenMeteoResponse> {
        debug!(url, "requesting Open-Meteo");
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| ControlError::unavailable(format!("weather request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, url, "Open-Meteo returned error status");
            return Err(ControlError::unavailable(format!("weather API returned {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| ControlError::unavailable(format!("unreadable weather response: {e}")))
    }
}

fn coords(location: &GeoLocation) -> Vec<(&'static str, String)> {
    vec![
        ("latitude", location.latitude.to_string()),
        ("longitude", location.longitude.to_string()),
        ("hourly", "temperature_2m".to_string()),
        ("timezone", "UTC".to_string()),
    ]
}

#[async_trait]
impl WeatherSource for OpenMeteoClient {
    async fn current_conditions(
        &self,
        location: &GeoLocation,
        at: DateTime<Utc>,
        window_hours: u32,
    ) -> ControlResult<WeatherSample> {
        let url = format!("{}/v1/forecast", self.forecast_base_url.trim_end_matches('/'));
        let days = (window_hours / 24 + 2).min(16);
        let mut query = coords(location);
        query.push(("current", "temperature_2m".to_string()));
        query.push(("forecast_days", days.to_string()));

        let body = self.fetch(&url, &query).await?;
        let samples = body.hourly.map(OpenMeteoHourly::into_samples).unwrap_or_default();
        let outdoor = body
            .current
            .and_then(|c| c.temperature_2m)
            .or_else(|| temperature_at(&samples, at));

        if outdoor.is_none() {
            return Err(ControlError::unavailable(format!(
                "no outdoor temperature for ({}, {})",
                location.latitude, location.longitude
            )));
        }

        Ok(WeatherSample {
            outdoor_temp_c: outdoor,
            forecast: forecast_window(&samples, at, window_hours),
        })
    }

    async fn historical_hourly(
        &self,
        location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ControlResult<Vec<HourlyTemperature>> {
        let url = format!("{}/v1/archive", self.archive_base_url.trim_end_matches('/'));
        let mut query = coords(location);
        query.push(("start_date", start.format("%Y-%m-%d").to_string()));
        query.push(("end_date", end.format("%Y-%m-%d").to_string()));

        let body = self.fetch(&url, &query).await?;
        let samples = body.hourly.map(OpenMeteoHourly::into_samples).unwrap_or_default();
        debug!(count = samples.len(), %start, %end, "archived hourly temperatures");
        Ok(samples)
    }
}

/// Weather that never touches the network.
#[derive(Debug, Clone)]
pub enum StaticWeather {
    Fixed(f64),
    Series(Vec<HourlyTemperature>),
}

impl StaticWeather {
    pub fn series(mut samples: Vec<HourlyTemperature>) -> Self {
        samples.sort_by_key(|s| s.timestamp);
        Self::Series(samples)
    }

    fn hourly_between(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Vec<HourlyTemperature> {
        match self {
            Self::Fixed(t) => {
                let hours = (to - from).num_hours().max(0);
                (0..=hours)
                    .map(|h| HourlyTemperature {
                        timestamp: from + Duration::hours(h),
                        temperature_c: *t,
                    })
                    .collect()
            }
            Self::Series(samples) => samples
                .iter()
                .filter(|s| s.timestamp >= from && s.timestamp <= to)
                .copied()
                .collect(),
        }
    }
}

#[async_trait]
impl WeatherSource for StaticWeather {
    async fn current_conditions(
        &self,
        _location: &GeoLocation,
        at: DateTime<Utc>,
        window_hours: u32,
    ) -> ControlResult<WeatherSample> {
        match self {
            Self::Fixed(t) => {
                let samples = self.hourly_between(at, at + Duration::hours(i64::from(window_hours)));
                Ok(WeatherSample {
                    outdoor_temp_c: Some(*t),
                    forecast: forecast_window(&samples, at, window_hours),
                })
            }
            Self::Series(samples) => {
                let outdoor = temperature_at(samples, at)
                    .ok_or_else(|| ControlError::unavailable("static weather series is empty"))?;
                Ok(WeatherSample {
                    outdoor_temp_c: Some(outdoor),
                    forecast: forecast_window(samples, at, window_hours),
                })
            }
        }
    }

    async fn historical_hourly(
        &self,
        _location: &GeoLocation,
        start: NaiveDate,
        end: NaiveDate,
    ) -> ControlResult<Vec<HourlyTemperature>> {
        let from = Utc.from_utc_datetime(&start.and_time(chrono::NaiveTime::MIN));
        let to = Utc.from_utc_datetime(&end.and_time(chrono::NaiveTime::MIN)) + Duration::hours(23);
        Ok(self.hourly_between(from, to))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn berlin() -> GeoLocation {
        GeoLocation {
            latitude: 52.52,
            longitude: 13.41,
            name: Some("Berlin".into()),
        }
    }

    fn client(server: &MockServer) -> OpenMeteoClient {
        OpenMeteoClient::new(server.uri(), server.uri(), std::time::Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn current_conditions_with_forecast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/forecast"))
            .and(query_param("current", "temperature_2m"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "current": {"time": "2024-01-10T12:00", "temperature_2m": 4.2},
                "hourly": {
                    "time": ["2024-01-10T12:00", "2024-01-10T13:00", "2024-01-10T14:00", "2024-01-10T15:00"],
                    "temperature_2m": [4.0, 3.0, null, -2.5]
                }
            })))
            .mount(&server)
            .await;

        let at = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let sample = client(&server).current_conditions(&berlin(), at, 3).await.unwrap();

        assert_eq!(sample.outdoor_temp_c, Some(4.2));
        let temps: Vec<f64> = sample.forecast.iter().map(|p| p.outdoor_temp_c).collect();
        assert_eq!(temps, vec![3.0, -2.5]);
        assert_eq!(sample.forecast[1].offset, Duration::hours(3));
    }

    #[tokio::test]
    async fn archive_drops_nulls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/archive"))
            .and(query_param("start_date", "2024-01-01"))
            .and(query_param("end_date", "2024-01-01"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hourly": {
                    "time": ["2024-01-01T00:00", "2024-01-01T01:00", "2024-01-01T02:00"],
                    "temperature_2m": [1.5, null, 0.5]
                }
            })))
            .mount(&server)
            .await;

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let samples = client(&server).historical_hourly(&berlin(), day, day).await.unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].temperature_c, 0.5);
    }

    #[tokio::test]
    async fn http_error_is_data_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let at = Utc.with_ymd_and_hms(2024, 1, 10, 12, 0, 0).unwrap();
        let err = client(&server).current_conditions(&berlin(), at, 3).await.unwrap_err();
        assert!(matches!(err, ControlError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn malformed_body_is_data_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = client(&server).historical_hourly(&berlin(), day, day).await.unwrap_err();
        assert!(matches!(err, ControlError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn fixed_static_weather_covers_whole_days() {
        let weather = StaticWeather::Fixed(3.0);
        let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
        let samples = weather.historical_hourly(&berlin(), start, end).await.unwrap();
        assert_eq!(samples.len(), 48);

        let at = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let now = weather.current_conditions(&berlin(), at, 2).await.unwrap();
        assert_eq!(now.outdoor_temp_c, Some(3.0));
        assert_eq!(now.forecast.len(), 2);
    }

    #[tokio::test]
    async fn empty_series_is_unavailable() {
        let weather = StaticWeather::series(vec![]);
        let at = Utc.with_ymd_and_hms(2024, 1, 1, 6, 0, 0).unwrap();
        let err = weather.current_conditions(&berlin(), at, 2).await.unwrap_err();
        assert!(matches!(err, ControlError::DataUnavailable(_)));
    }
}
