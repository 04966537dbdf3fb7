pub mod arbiter;
pub mod audit;
pub mod decision;
pub mod hysteresis;
pub mod scheduler;

pub use arbiter::{calculate_target, explain_target, ArbiterInputs, PredictiveAdjustment, TargetBreakdown};
pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink};
pub use decision::{run_all_zones, CycleOutcome, ZoneController};
pub use hysteresis::decide_heater;
pub use scheduler::{ControlScheduler, PeriodicTaskConfig, ReadingsMap, TaskStatus};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{Config, WeatherProvider};
use crate::domain::{SensorReading, ZoneRuntimeState};
use crate::error::{ControlError, ControlResult};
use crate::forecast::{OpenMeteoClient, PriceSource, StaticWeather, TimeOfUsePricing, WeatherSource};
use crate::hardware::DeviceFactory;
use crate::simulation::{SimulatorConfig, ZoneSimulator};

struct Running {
    scheduler: Arc<ControlScheduler>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Everything the controller process owns: one simulator per configured
/// zone, the shared data sources, and the periodic tasks once started.
pub struct AppState {
    pub cfg: Config,
    simulators: Vec<Arc<ZoneSimulator>>,
    weather: Arc<dyn WeatherSource>,
    prices: Arc<dyn PriceSource>,
    audit: Arc<dyn AuditSink>,
    readings: ReadingsMap,
    running: Mutex<Option<Running>>,
}

impl AppState {
    /// Build state from configuration, with the weather provider it names,
    /// the configured tariff and a log-only audit trail.
    pub fn new(cfg: Config) -> ControlResult<Self> {
        let weather: Arc<dyn WeatherSource> = match cfg.weather.provider {
            WeatherProvider::OpenMeteo => Arc::new(OpenMeteoClient::new(
                cfg.weather.forecast_base_url.clone(),
                cfg.weather.archive_base_url.clone(),
                Duration::from_secs(cfg.weather.http_timeout_seconds),
            )?),
            WeatherProvider::Static => Arc::new(StaticWeather::Fixed(cfg.weather.static_temperature_c)),
        };
        let prices = Arc::new(TimeOfUsePricing::new(&cfg.pricing));
        Self::with_parts(cfg, weather, prices, Arc::new(TracingAuditSink))
    }

    pub fn with_parts(
        cfg: Config,
        weather: Arc<dyn WeatherSource>,
        prices: Arc<dyn PriceSource>,
        audit: Arc<dyn AuditSink>,
    ) -> ControlResult<Self> {
        cfg.validate()?;
        let simulators = cfg
            .zones
            .iter()
            .map(|zone| {
                let mut sim_cfg =
                    SimulatorConfig::new(zone.id, zone.name.clone(), cfg.simulator.bind_addr(zone.register_port)?);
                sim_cfg.update_interval = cfg.simulator.update_interval();
                sim_cfg.stop_timeout = cfg.simulator.stop_timeout();
                sim_cfg.unit_id = cfg.simulator.unit_id;
                let initial = ZoneRuntimeState::new(
                    zone.initial_temperature_c,
                    zone.preferences.clamp_target(zone.initial_target_c),
                    zone.initial_occupancy,
                );
                Ok(Arc::new(ZoneSimulator::new(sim_cfg, initial)))
            })
            .collect::<ControlResult<Vec<_>>>()?;

        Ok(Self {
            cfg,
            simulators,
            weather,
            prices,
            audit,
            readings: ReadingsMap::default(),
            running: Mutex::new(None),
        })
    }

    pub fn simulators(&self) -> &[Arc<ZoneSimulator>] {
        &self.simulators
    }

    pub fn simulator(&self, zone_id: u32) -> Option<&Arc<ZoneSimulator>> {
        self.simulators.iter().find(|s| s.zone_id() == zone_id)
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Start every simulator, connect a device handle to each, and spawn the
    /// control and poll loops. A second call while running does nothing.
    pub async fn start(&self) -> ControlResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        for sim in &self.simulators {
            if let Err(e) = sim.start().await {
                error!(zone_id = sim.zone_id(), error = %e, "register device failed to start");
                self.stop_simulators().await;
                return Err(e.into());
            }
        }

        let controllers = match self.build_controllers().await {
            Ok(c) => c,
            Err(e) => {
                self.stop_simulators().await;
                return Err(e);
            }
        };

        let scheduler = Arc::new(ControlScheduler::new(
            controllers,
            self.readings.clone(),
            PeriodicTaskConfig {
                control_interval_secs: self.cfg.controller.control_interval_seconds,
                poll_interval_secs: self.cfg.controller.poll_interval_seconds,
            },
        ));
        let cancel = CancellationToken::new();
        let tasks = scheduler.clone().start(cancel.child_token());

        info!(zones = self.simulators.len(), mode = ?self.cfg.controller.device_mode, "controller started");
        *running = Some(Running {
            scheduler,
            cancel,
            tasks,
        });
        Ok(())
    }

    async fn build_controllers(&self) -> ControlResult<Vec<Arc<ZoneController>>> {
        let factory = DeviceFactory::new(self.cfg.controller.device_mode);
        let mut controllers = Vec::with_capacity(self.simulators.len());
        for (sim, zone) in self.simulators.iter().zip(&self.cfg.zones) {
            let device = factory.create(sim).await?;
            controllers.push(Arc::new(ZoneController::new(
                zone.preferences.clone(),
                zone.location(),
                device,
                self.weather.clone(),
                self.prices.clone(),
                self.audit.clone(),
            )));
        }
        Ok(controllers)
    }

    /// Stop the periodic tasks, then every simulator.
    pub async fn shutdown(&self) {
        if let Some(running) = self.running.lock().await.take() {
            running.cancel.cancel();
            for task in running.tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "periodic task ended abnormally");
                }
            }
        }
        self.stop_simulators().await;
        info!("controller stopped");
    }

    async fn stop_simulators(&self) {
        for sim in &self.simulators {
            sim.stop().await;
        }
    }

    /// Run one control cycle now, outside the periodic schedule.
    pub async fn run_control_cycle(&self, now: DateTime<Utc>) -> ControlResult<Vec<(u32, ControlResult<CycleOutcome>)>> {
        let scheduler = self.scheduler().await?;
        Ok(scheduler.run_control_once(now).await)
    }

    /// Poll every device now.
    pub async fn poll_sensors(&self, now: DateTime<Utc>) -> ControlResult<()> {
        self.scheduler().await?.poll_once(now).await;
        Ok(())
    }

    pub async fn latest_readings(&self) -> HashMap<u32, SensorReading> {
        self.readings.read().await.clone()
    }

    pub async fn control_status(&self) -> Option<TaskStatus> {
        let scheduler = self.scheduler().await.ok()?;
        Some(scheduler.control_status().await)
    }

    pub async fn poll_status(&self) -> Option<TaskStatus> {
        let scheduler = self.scheduler().await.ok()?;
        Some(scheduler.poll_status().await)
    }

    async fn scheduler(&self) -> ControlResult<Arc<ControlScheduler>> {
        self.running
            .lock()
            .await
            .as_ref()
            .map(|r| r.scheduler.clone())
            .ok_or_else(|| ControlError::unavailable("controller is not running"))
    }
}
