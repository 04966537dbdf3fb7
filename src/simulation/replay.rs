//! Historical replay.
//!
//! Runs a zone's preferences against archived outdoor temperatures: every
//! step goes through the same arbiter and hysteresis as live control, then
//! the thermal model advances the simulated room. [`Replay`] yields the
//! per-step points lazily; [`run_replay`] wraps it with a run record and a
//! recorder so progress survives a failure halfway through.

use chrono::{DateTime, Datelike, Duration, Timelike, Utc, Weekday};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ZoneConfig;
use crate::controller::{calculate_target, decide_heater, ArbiterInputs};
use crate::domain::{
    forecast_window, round2, temperature_at, GeoLocation, HourlyTemperature, PriceLevel, TimeOfDay, ZonePreferences,
};
use crate::error::{ControlError, ControlResult};
use crate::forecast::{PriceSource, WeatherSource};
use crate::simulation::thermal::ThermalModel;

pub const DEFAULT_HEATER_POWER_KW: f64 = 2.0;
const PROGRESS_EVERY: usize = 100;

/// How a replay decides whether the zone is in use at a given instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OccupancyModel {
    /// Occupied 07:00 to 22:00 UTC, Monday to Friday.
    #[default]
    WeekdayDaytime,
    /// Occupied whenever a schedule entry is active.
    Schedule,
}

impl OccupancyModel {
    pub fn is_occupied(&self, at: DateTime<Utc>, prefs: &ZonePreferences) -> bool {
        match self {
            Self::WeekdayDaytime => {
                let weekday = !matches!(at.weekday(), Weekday::Sat | Weekday::Sun);
                weekday && (7..22).contains(&at.hour())
            }
            Self::Schedule => prefs
                .schedule
                .active_entry(TimeOfDay::from_time(at.time()))
                .is_some(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReplayRequest {
    pub zone_id: u32,
    pub prefs: ZonePreferences,
    pub window_start: DateTime<Utc>,
    /// Exclusive.
    pub window_end: DateTime<Utc>,
    pub step_minutes: u32,
    /// Starting room temperature; the occupied default when unset.
    pub initial_temp_c: Option<f64>,
    pub heater_power_kw: f64,
    pub occupancy: OccupancyModel,
}

impl ReplayRequest {
    /// Hourly steps, default occupancy model and heater power.
    pub fn new(zone_id: u32, prefs: ZonePreferences, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            zone_id,
            prefs,
            window_start,
            window_end,
            step_minutes: 60,
            initial_temp_c: None,
            heater_power_kw: DEFAULT_HEATER_POWER_KW,
            occupancy: OccupancyModel::default(),
        }
    }

    /// Request for a configured zone: its preferences, heater rating and
    /// configured starting temperature.
    pub fn for_zone(zone: &ZoneConfig, window_start: DateTime<Utc>, window_end: DateTime<Utc>) -> Self {
        Self {
            initial_temp_c: Some(zone.initial_temperature_c),
            heater_power_kw: zone.heater_power_kw,
            ..Self::new(zone.id, zone.preferences.clone(), window_start, window_end)
        }
    }

    pub fn step_hours(&self) -> f64 {
        f64::from(self.step_minutes) / 60.0
    }

    /// Number of steps between window start and end.
    pub fn step_count(&self) -> usize {
        if self.step_minutes == 0 || self.window_end <= self.window_start {
            return 0;
        }
        let minutes = (self.window_end - self.window_start).num_minutes();
        let step = i64::from(self.step_minutes);
        usize::try_from((minutes + step - 1) / step).unwrap_or(0)
    }

    fn validate(&self) -> ControlResult<()> {
        if self.step_minutes == 0 {
            return Err(ControlError::config("replay step must be at least one minute"));
        }
        if self.window_end <= self.window_start {
            return Err(ControlError::config(format!(
                "replay window {} .. {} is empty",
                self.window_start, self.window_end
            )));
        }
        if !self.heater_power_kw.is_finite() || self.heater_power_kw < 0.0 {
            return Err(ControlError::config("heater power must be a non-negative number"));
        }
        Ok(())
    }
}

/// One simulated step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoricalDataPoint {
    pub timestamp: DateTime<Utc>,
    /// Room temperature at the start of the step.
    pub simulated_temp_c: f64,
    pub target_temp_c: f64,
    /// Heater state applied during the step.
    pub heater_on: bool,
    pub occupied: bool,
    pub outdoor_temp_c: f64,
    pub price_level: PriceLevel,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ReplaySummary {
    pub points: usize,
    pub heater_on_steps: usize,
    pub simulated_hours: f64,
    pub energy_kwh: f64,
}

/// Lazy step iterator over a replay window.
///
/// Yields `Err` at most once, after which it is exhausted.
pub struct Replay<'a> {
    request: &'a ReplayRequest,
    samples: &'a [HourlyTemperature],
    prices: &'a dyn PriceSource,
    model: ThermalModel,
    now: DateTime<Utc>,
    current_c: f64,
    outdoor_c: f64,
    heater_on: bool,
    summary: ReplaySummary,
    done: bool,
}

impl<'a> Replay<'a> {
    pub fn new(
        request: &'a ReplayRequest,
        samples: &'a [HourlyTemperature],
        prices: &'a dyn PriceSource,
    ) -> ControlResult<Self> {
        request.validate()?;
        let outdoor_c = temperature_at(samples, request.window_start).ok_or_else(|| {
            ControlError::unavailable(format!("no weather samples for zone {} replay", request.zone_id))
        })?;

        let prefs = &request.prefs;
        let current_c = request.initial_temp_c.unwrap_or(prefs.default_occupied_temp);
        let first_target = prefs
            .schedule
            .resolve(TimeOfDay::from_time(request.window_start.time()), prefs.default_setpoints())
            .occupied_c;

        Ok(Self {
            request,
            samples,
            prices,
            model: ThermalModel::from_preferences(prefs),
            now: request.window_start,
            current_c,
            outdoor_c,
            heater_on: current_c < first_target - 0.5,
            summary: ReplaySummary::default(),
            done: false,
        })
    }

    /// Totals over the points yielded so far.
    pub fn summary(&self) -> ReplaySummary {
        self.summary
    }

    fn step(&mut self) -> ControlResult<HistoricalDataPoint> {
        let request = self.request;
        let prefs = &request.prefs;
        let now = self.now;

        // Beyond the last sample the last known temperature holds.
        if let Some(t) = temperature_at(self.samples, now) {
            self.outdoor_c = t;
        }
        let outdoor_c = self.outdoor_c;
        let forecast = forecast_window(self.samples, now, prefs.predictive_window_hours);
        let occupied = request.occupancy.is_occupied(now, prefs);
        let price = self.prices.price_at(now)?;

        let target_c = calculate_target(&ArbiterInputs {
            now,
            prefs,
            current_internal_c: self.current_c,
            occupied,
            outdoor_c: Some(outdoor_c),
            forecast: &forecast,
            price_level: price.level,
        });
        let heater_on = decide_heater(self.current_c, target_c, self.heater_on);

        let point = HistoricalDataPoint {
            timestamp: now,
            simulated_temp_c: round2(self.current_c),
            target_temp_c: target_c,
            heater_on,
            occupied,
            outdoor_temp_c: round2(outdoor_c),
            price_level: price.level,
        };

        self.current_c = self
            .model
            .advance_clamped(self.current_c, outdoor_c, heater_on, f64::from(request.step_minutes));
        self.heater_on = heater_on;
        self.now = now + Duration::minutes(i64::from(request.step_minutes));

        self.summary.points += 1;
        self.summary.simulated_hours += request.step_hours();
        if heater_on {
            self.summary.heater_on_steps += 1;
            self.summary.energy_kwh += request.heater_power_kw * request.step_hours();
        }
        Ok(point)
    }
}

impl Iterator for Replay<'_> {
    type Item = ControlResult<HistoricalDataPoint>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.now >= self.request.window_end {
            return None;
        }
        let result = self.step();
        if result.is_err() {
            self.done = true;
        }
        Some(result)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplayStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Bookkeeping for one replay invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayRun {
    pub id: Uuid,
    pub zone_id: u32,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub status: ReplayStatus,
    pub status_message: String,
    pub total_simulated_hours: Option<f64>,
    pub calculated_energy_kwh: Option<f64>,
    pub created_at: DateTime<Utc>,
}

impl ReplayRun {
    fn pending(request: &ReplayRequest) -> Self {
        Self {
            id: Uuid::new_v4(),
            zone_id: request.zone_id,
            window_start: request.window_start,
            window_end: request.window_end,
            status: ReplayStatus::Pending,
            status_message: "Queued".to_string(),
            total_simulated_hours: None,
            calculated_energy_kwh: None,
            created_at: Utc::now(),
        }
    }

    fn fail(&mut self, message: String) {
        self.status = ReplayStatus::Failed;
        self.status_message = message;
    }
}

/// Destination for run records and data points.
pub trait ReplayRecorder: Send + Sync {
    /// Called on every status change; later calls supersede earlier ones.
    fn update_run(&self, run: &ReplayRun);
    fn record_point(&self, run_id: Uuid, point: &HistoricalDataPoint);
}

#[derive(Debug, Default)]
pub struct InMemoryRecorder {
    runs: Mutex<Vec<ReplayRun>>,
    points: Mutex<Vec<(Uuid, HistoricalDataPoint)>>,
}

impl InMemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&self, id: Uuid) -> Option<ReplayRun> {
        self.runs.lock().iter().find(|r| r.id == id).cloned()
    }

    pub fn points(&self, run_id: Uuid) -> Vec<HistoricalDataPoint> {
        self.points
            .lock()
            .iter()
            .filter(|(id, _)| *id == run_id)
            .map(|(_, p)| *p)
            .collect()
    }
}

impl ReplayRecorder for InMemoryRecorder {
    fn update_run(&self, run: &ReplayRun) {
        let mut runs = self.runs.lock();
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => runs.push(run.clone()),
        }
    }

    fn record_point(&self, run_id: Uuid, point: &HistoricalDataPoint) {
        self.points.lock().push((run_id, *point));
    }
}

/// Fetch archived weather for the window and replay it, reporting status and
/// points to `recorder`. Failures end the run as `FAILED`; points already
/// recorded are kept.
pub async fn run_replay(
    weather: &dyn WeatherSource,
    location: &GeoLocation,
    prices: &dyn PriceSource,
    request: &ReplayRequest,
    recorder: &dyn ReplayRecorder,
) -> ReplayRun {
    let mut run = ReplayRun::pending(request);
    recorder.update_run(&run);

    run.status = ReplayStatus::Running;
    run.status_message = "Fetching historical weather data...".to_string();
    recorder.update_run(&run);
    info!(run_id = %run.id, zone_id = request.zone_id, start = %request.window_start, end = %request.window_end, "replay started");

    let samples = match weather
        .historical_hourly(location, request.window_start.date_naive(), request.window_end.date_naive())
        .await
    {
        Ok(samples) if !samples.is_empty() => samples,
        Ok(_) => {
            run.fail("Failed to fetch historical weather data: no samples returned".to_string());
            recorder.update_run(&run);
            warn!(run_id = %run.id, "replay has no weather data");
            return run;
        }
        Err(e) => {
            run.fail(format!("Failed to fetch historical weather data: {e}"));
            recorder.update_run(&run);
            warn!(run_id = %run.id, error = %e, "replay weather fetch failed");
            return run;
        }
    };

    let expected = request.step_count();
    run.status_message = format!("Processing {} hourly weather points...", samples.len());
    recorder.update_run(&run);

    let mut replay = match Replay::new(request, &samples, prices) {
        Ok(replay) => replay,
        Err(e) => {
            run.fail(format!("Setup error: {e}"));
            recorder.update_run(&run);
            return run;
        }
    };

    for (i, point) in replay.by_ref().enumerate() {
        match point {
            Ok(point) => recorder.record_point(run.id, &point),
            Err(e) => {
                run.fail(format!("Processing error: {e}"));
                recorder.update_run(&run);
                warn!(run_id = %run.id, error = %e, processed = i, "replay failed");
                return run;
            }
        }
        if (i + 1) % PROGRESS_EVERY == 0 {
            run.status_message = format!("Processed {}/{expected} data points...", i + 1);
            recorder.update_run(&run);
            debug!(run_id = %run.id, processed = i + 1, expected, "replay progress");
        }
    }

    let summary = replay.summary();
    run.status = ReplayStatus::Completed;
    run.status_message = format!("Simulation completed. Processed {} data points.", summary.points);
    run.total_simulated_hours = Some(summary.simulated_hours);
    run.calculated_energy_kwh = Some(round2(summary.energy_kwh));
    recorder.update_run(&run);
    info!(
        run_id = %run.id,
        points = summary.points,
        energy_kwh = summary.energy_kwh,
        "replay completed"
    );
    run
}
