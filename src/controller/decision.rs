use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use super::arbiter::{explain_target, ArbiterInputs};
use super::audit::AuditSink;
use super::hysteresis::decide_heater;
use crate::domain::{
    CommandRecord, CommandStatus, CommandType, EnergyPriceSample, GeoLocation, WeatherSample,
    ZonePreferences, ZoneSnapshot,
};
use crate::error::{ControlError, ControlResult, DeviceError};
use crate::forecast::{PriceSource, WeatherSource};
use crate::hardware::ZoneDevice;

/// Targets closer than this to the device's current target are not rewritten.
pub const TARGET_WRITE_THRESHOLD_C: f64 = 0.1;
const FLOAT_SLACK: f64 = 1e-9;

/// What one control cycle decided and wrote.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleOutcome {
    pub zone_id: u32,
    pub timestamp: DateTime<Utc>,
    pub snapshot: ZoneSnapshot,
    pub outdoor_temp_c: Option<f64>,
    pub target_temp_c: f64,
    pub heater_on: bool,
    /// `None` when no write was needed.
    pub target_write: Option<CommandStatus>,
    pub heater_write: Option<CommandStatus>,
}

#[derive(Default)]
struct LastKnown {
    weather: Option<WeatherSample>,
    price: Option<EnergyPriceSample>,
}

/// Decision loop for one zone.
///
/// Cycles are serialised per zone by an internal lock, so overlapping
/// triggers for the same zone run one after the other.
pub struct ZoneController {
    zone_id: u32,
    prefs: ZonePreferences,
    location: Option<GeoLocation>,
    device: Arc<dyn ZoneDevice>,
    weather: Arc<dyn WeatherSource>,
    prices: Arc<dyn PriceSource>,
    audit: Arc<dyn AuditSink>,
    last_known: Mutex<LastKnown>,
}

impl ZoneController {
    pub fn new(
        prefs: ZonePreferences,
        location: Option<GeoLocation>,
        device: Arc<dyn ZoneDevice>,
        weather: Arc<dyn WeatherSource>,
        prices: Arc<dyn PriceSource>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            zone_id: device.zone_id(),
            prefs,
            location,
            device,
            weather,
            prices,
            audit,
            last_known: Mutex::new(LastKnown::default()),
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    pub fn device(&self) -> &Arc<dyn ZoneDevice> {
        &self.device
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> ControlResult<CycleOutcome> {
        let mut last_known = self.last_known.lock().await;

        let snapshot = self.device.read_snapshot().await?;
        let weather = self.resolve_weather(now, &mut last_known).await;
        let price = self.resolve_price(now, &mut last_known)?;

        let inputs = ArbiterInputs {
            now,
            prefs: &self.prefs,
            current_internal_c: snapshot.current_temp_c,
            occupied: snapshot.occupied,
            outdoor_c: weather.outdoor_temp_c,
            forecast: &weather.forecast,
            price_level: price.level,
        };
        let breakdown = explain_target(&inputs);
        let target_c = self.checked_target(breakdown.target_c);
        let heater_on = decide_heater(snapshot.current_temp_c, target_c, snapshot.heater_on);

        debug!(
            zone_id = self.zone_id,
            current_c = snapshot.current_temp_c,
            target_c,
            heater_on,
            predictive = ?breakdown.predictive,
            price = %price.level,
            "control decision"
        );

        let target_write = if (target_c - snapshot.target_temp_c).abs() > TARGET_WRITE_THRESHOLD_C + FLOAT_SLACK {
            Some(self.write_target(now, &snapshot, target_c).await)
        } else {
            None
        };

        let heater_write = if heater_on != snapshot.heater_on {
            Some(self.write_heater(now, &snapshot, target_c, heater_on).await)
        } else {
            None
        };

        Ok(CycleOutcome {
            zone_id: self.zone_id,
            timestamp: now,
            snapshot,
            outdoor_temp_c: weather.outdoor_temp_c,
            target_temp_c: target_c,
            heater_on,
            target_write,
            heater_write,
        })
    }

    /// Fresh weather, else the last sample seen, else no outdoor data at all.
    async fn resolve_weather(&self, now: DateTime<Utc>, last_known: &mut LastKnown) -> WeatherSample {
        let Some(location) = &self.location else {
            return WeatherSample::default();
        };
        match self
            .weather
            .current_conditions(location, now, self.prefs.predictive_window_hours)
            .await
        {
            Ok(sample) => {
                last_known.weather = Some(sample.clone());
                sample
            }
            Err(e) => {
                warn!(zone_id = self.zone_id, error = %e, "weather unavailable, using last known outdoor temperature");
                // Forecast offsets are relative to the old fetch, so only the reading carries over.
                WeatherSample {
                    outdoor_temp_c: last_known.weather.as_ref().and_then(|w| w.outdoor_temp_c),
                    forecast: Vec::new(),
                }
            }
        }
    }

    fn resolve_price(&self, now: DateTime<Utc>, last_known: &mut LastKnown) -> ControlResult<EnergyPriceSample> {
        match self.prices.price_at(now) {
            Ok(price) => {
                last_known.price = Some(price);
                Ok(price)
            }
            Err(e) => match last_known.price {
                Some(price) => {
                    warn!(zone_id = self.zone_id, error = %e, level = %price.level, "price unavailable, using last known level");
                    Ok(price)
                }
                None => Err(ControlError::unavailable(format!(
                    "no energy price for zone {}: {e}",
                    self.zone_id
                ))),
            },
        }
    }

    fn checked_target(&self, target_c: f64) -> f64 {
        let lo = self.prefs.min_target_temp;
        let hi = self.prefs.max_target_temp;
        if target_c.is_finite() && target_c >= lo - 0.05 && target_c <= hi + 0.05 {
            return target_c;
        }
        let err = ControlError::InternalInvariant(format!(
            "target {target_c} outside [{lo}, {hi}] for zone {}",
            self.zone_id
        ));
        error!(zone_id = self.zone_id, error = %err, "clamping arbitrated target");
        if target_c.is_finite() {
            self.prefs.clamp_target(target_c)
        } else {
            self.prefs.default_occupied_temp.clamp(lo, hi)
        }
    }

    async fn write_target(&self, now: DateTime<Utc>, snapshot: &ZoneSnapshot, target_c: f64) -> CommandStatus {
        let result = self.device.write_target_temperature(target_c).await;
        let status = command_status(&result);
        let mut details = json!({
            "target_temp": target_c,
            "previous_target_temp": snapshot.target_temp_c,
        });
        if let Err(e) = &result {
            details["error"] = json!(e.to_string());
        }
        info!(zone_id = self.zone_id, from = snapshot.target_temp_c, to = target_c, %status, "target write");
        self.audit.record(CommandRecord {
            zone_id: self.zone_id,
            timestamp: now,
            command_type: CommandType::SetTargetTemp,
            target_temp: target_c,
            details,
            status,
        });
        status
    }

    async fn write_heater(
        &self,
        now: DateTime<Utc>,
        snapshot: &ZoneSnapshot,
        target_c: f64,
        heater_on: bool,
    ) -> CommandStatus {
        let result = self.device.write_heater_state(heater_on).await;
        let status = command_status(&result);
        let mut details = json!({
            "heater_on": heater_on,
            "previous_heater_on": snapshot.heater_on,
            "target_temp_at_decision": target_c,
            "current_temp_at_decision": snapshot.current_temp_c,
        });
        if let Err(e) = &result {
            details["error"] = json!(e.to_string());
        }
        info!(zone_id = self.zone_id, heater_on, %status, "heater write");
        self.audit.record(CommandRecord {
            zone_id: self.zone_id,
            timestamp: now,
            command_type: CommandType::SetHeater,
            target_temp: target_c,
            details,
            status,
        });
        status
    }
}

fn command_status(result: &Result<(), DeviceError>) -> CommandStatus {
    match result {
        Ok(()) => CommandStatus::Success,
        Err(DeviceError::Rejected(_)) => CommandStatus::Failed,
        Err(_) => CommandStatus::Error,
    }
}

/// Run one cycle for every zone concurrently. A failing zone is logged and
/// does not affect the others.
pub async fn run_all_zones(
    controllers: &[Arc<ZoneController>],
    now: DateTime<Utc>,
) -> Vec<(u32, ControlResult<CycleOutcome>)> {
    let results = join_all(controllers.iter().map(|c| async move { (c.zone_id(), c.run_cycle(now).await) })).await;
    for (zone_id, result) in &results {
        if let Err(e) = result {
            warn!(zone_id, error = %e, "control cycle failed");
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::audit::MemoryAuditSink;
    use crate::forecast::{MockWeatherSource, StaticWeather, TimeOfUsePricing};
    use crate::hardware::MockZoneDevice;
    use chrono::TimeZone;
    use mockall::predicate::eq;

    // 11:00 UTC falls in the STANDARD band of the default tariff.
    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 10, 11, 0, 0).unwrap()
    }

    fn snapshot(current: f64, target: f64, occupied: bool, heater_on: bool) -> ZoneSnapshot {
        ZoneSnapshot {
            current_temp_c: current,
            target_temp_c: target,
            occupied,
            heater_on,
        }
    }

    fn controller(device: MockZoneDevice, audit: Arc<MemoryAuditSink>) -> ZoneController {
        ZoneController::new(
            ZonePreferences::default(),
            None,
            Arc::new(device),
            Arc::new(StaticWeather::Fixed(5.0)),
            Arc::new(TimeOfUsePricing::default()),
            audit,
        )
    }

    fn device_with(snap: ZoneSnapshot) -> MockZoneDevice {
        let mut device = MockZoneDevice::new();
        device.expect_zone_id().return_const(7u32);
        device.expect_read_snapshot().returning(move || Ok(snap));
        device
    }

    #[tokio::test]
    async fn cold_zone_gets_target_and_heater() {
        let mut device = device_with(snapshot(19.0, 17.0, true, false));
        device
            .expect_write_target_temperature()
            .with(eq(21.0))
            .times(1)
            .returning(|_| Ok(()));
        device
            .expect_write_heater_state()
            .with(eq(true))
            .times(1)
            .returning(|_| Ok(()));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = controller(device, audit.clone()).run_cycle(now()).await.unwrap();

        assert_eq!(outcome.target_temp_c, 21.0);
        assert!(outcome.heater_on);
        assert_eq!(outcome.target_write, Some(CommandStatus::Success));
        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].command_type, CommandType::SetTargetTemp);
        assert_eq!(records[0].details["previous_target_temp"], 17.0);
        assert_eq!(records[1].command_type, CommandType::SetHeater);
        assert_eq!(records[1].details["current_temp_at_decision"], 19.0);
    }

    #[tokio::test]
    async fn settled_zone_writes_nothing() {
        let device = device_with(snapshot(20.8, 21.0, true, true));
        let audit = Arc::new(MemoryAuditSink::new());

        let outcome = controller(device, audit.clone()).run_cycle(now()).await.unwrap();

        assert!(outcome.heater_on);
        assert_eq!(outcome.target_write, None);
        assert_eq!(outcome.heater_write, None);
        assert!(audit.is_empty());
    }

    #[tokio::test]
    async fn small_target_difference_is_not_rewritten() {
        let device = device_with(snapshot(21.0, 20.9, true, false));
        let audit = Arc::new(MemoryAuditSink::new());
        let outcome = controller(device, audit.clone()).run_cycle(now()).await.unwrap();
        assert_eq!(outcome.target_write, None);
    }

    #[tokio::test]
    async fn rejected_heater_write_is_failed_and_io_error_is_error() {
        let mut device = device_with(snapshot(25.0, 21.0, true, true));
        device
            .expect_write_heater_state()
            .returning(|_| Err(DeviceError::Rejected("illegal data address".into())));
        let audit = Arc::new(MemoryAuditSink::new());
        let outcome = controller(device, audit.clone()).run_cycle(now()).await.unwrap();
        assert_eq!(outcome.heater_write, Some(CommandStatus::Failed));
        assert!(audit.records()[0].details["error"].is_string());

        let mut device = device_with(snapshot(15.0, 21.0, true, false));
        device.expect_write_heater_state().returning(|_| {
            Err(DeviceError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset",
            )))
        });
        let outcome = controller(device, Arc::new(MemoryAuditSink::new()))
            .run_cycle(now())
            .await
            .unwrap();
        assert_eq!(outcome.heater_write, Some(CommandStatus::Error));
    }

    #[tokio::test]
    async fn unreadable_device_fails_cycle() {
        let mut device = MockZoneDevice::new();
        device.expect_zone_id().return_const(7u32);
        device
            .expect_read_snapshot()
            .returning(|| Err(DeviceError::Timeout(std::time::Duration::from_secs(1))));
        let err = controller(device, Arc::new(MemoryAuditSink::new()))
            .run_cycle(now())
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::DeviceIo(DeviceError::Timeout(_))));
    }

    #[tokio::test]
    async fn weather_outage_falls_back_to_last_reading() {
        let mut weather = MockWeatherSource::new();
        let mut calls = 0;
        weather.expect_current_conditions().returning(move |_, _, _| {
            calls += 1;
            if calls == 1 {
                Ok(WeatherSample {
                    outdoor_temp_c: Some(25.0),
                    forecast: vec![],
                })
            } else {
                Err(ControlError::unavailable("down"))
            }
        });
        let device = device_with(snapshot(21.0, 20.0, true, false));
        let ctl = ZoneController::new(
            ZonePreferences::default(),
            Some(GeoLocation {
                latitude: 1.0,
                longitude: 2.0,
                name: None,
            }),
            Arc::new(device),
            Arc::new(weather),
            Arc::new(TimeOfUsePricing::default()),
            Arc::new(MemoryAuditSink::new()),
        );

        let first = ctl.run_cycle(now()).await.unwrap();
        let second = ctl.run_cycle(now()).await.unwrap();
        // High outdoor reduction applies in both cycles.
        assert_eq!(first.target_temp_c, 20.0);
        assert_eq!(second.outdoor_temp_c, Some(25.0));
        assert_eq!(second.target_temp_c, 20.0);
    }

    struct BrokenPrices;

    impl PriceSource for BrokenPrices {
        fn price_at(&self, _at: DateTime<Utc>) -> ControlResult<EnergyPriceSample> {
            Err(ControlError::unavailable("tariff offline"))
        }
    }

    #[tokio::test]
    async fn missing_price_skips_cycle() {
        let device = device_with(snapshot(21.0, 21.0, true, false));
        let ctl = ZoneController::new(
            ZonePreferences::default(),
            None,
            Arc::new(device),
            Arc::new(StaticWeather::Fixed(5.0)),
            Arc::new(BrokenPrices),
            Arc::new(MemoryAuditSink::new()),
        );
        let err = ctl.run_cycle(now()).await.unwrap_err();
        assert!(matches!(err, ControlError::DataUnavailable(_)));
    }

    #[tokio::test]
    async fn one_failing_zone_does_not_stop_others() {
        let mut broken = MockZoneDevice::new();
        broken.expect_zone_id().return_const(1u32);
        broken
            .expect_read_snapshot()
            .returning(|| Err(DeviceError::Unavailable("gone".into())));
        let mut healthy = MockZoneDevice::new();
        healthy.expect_zone_id().return_const(2u32);
        healthy
            .expect_read_snapshot()
            .returning(|| Ok(snapshot(21.0, 21.0, true, false)));
        let audit = Arc::new(MemoryAuditSink::new());

        let controllers = vec![
            Arc::new(controller(broken, audit.clone())),
            Arc::new(controller(healthy, audit)),
        ];
        let results = run_all_zones(&controllers, now()).await;

        assert_eq!(results.len(), 2);
        assert!(results[0].1.is_err());
        assert_eq!(results[1].0, 2);
        assert!(results[1].1.is_ok());
    }
}
