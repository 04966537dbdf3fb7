use chrono::{DateTime, Utc};
use futures::future::join_all;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decision::{run_all_zones, CycleOutcome, ZoneController};
use crate::domain::SensorReading;
use crate::error::ControlResult;

/// Periodic task configuration
#[derive(Debug, Clone)]
pub struct PeriodicTaskConfig {
    /// Control cycle interval (seconds)
    pub control_interval_secs: u64,
    /// Sensor polling interval (seconds)
    pub poll_interval_secs: u64,
}

impl Default for PeriodicTaskConfig {
    fn default() -> Self {
        Self {
            control_interval_secs: 60,
            poll_interval_secs: 30,
        }
    }
}

/// Task status tracking
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskStatus {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub run_count: u64,
    pub success_count: u64,
    pub error_count: u64,
}

impl TaskStatus {
    fn started(&mut self, now: DateTime<Utc>) {
        self.last_run = Some(now);
        self.run_count += 1;
    }

    fn finished(&mut self, now: DateTime<Utc>, errors: Vec<String>) {
        if errors.is_empty() {
            self.last_success = Some(now);
            self.success_count += 1;
            self.last_error = None;
        } else {
            self.error_count += 1;
            self.last_error = Some(errors.join("; "));
        }
    }
}

pub type ReadingsMap = Arc<RwLock<HashMap<u32, SensorReading>>>;

/// Drives the per-zone control cycle and the sensor poll on fixed intervals.
pub struct ControlScheduler {
    config: PeriodicTaskConfig,
    controllers: Vec<Arc<ZoneController>>,
    readings: ReadingsMap,
    control_status: RwLock<TaskStatus>,
    poll_status: RwLock<TaskStatus>,
}

impl ControlScheduler {
    pub fn new(controllers: Vec<Arc<ZoneController>>, readings: ReadingsMap, config: PeriodicTaskConfig) -> Self {
        Self {
            config,
            controllers,
            readings,
            control_status: RwLock::new(TaskStatus::default()),
            poll_status: RwLock::new(TaskStatus::default()),
        }
    }

    /// Spawn the control and poll loops. Both stop when `cancel` fires.
    pub fn start(self: Arc<Self>, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let control = {
            let scheduler = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { scheduler.run_control_task(cancel).await })
        };
        let poll = {
            let scheduler = self.clone();
            tokio::spawn(async move { scheduler.run_poll_task(cancel).await })
        };
        info!(
            zones = self.controllers.len(),
            control_interval_secs = self.config.control_interval_secs,
            poll_interval_secs = self.config.poll_interval_secs,
            "periodic tasks started"
        );
        vec![control, poll]
    }

    async fn run_control_task(&self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.control_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_control_once(Utc::now()).await;
                }
            }
        }
        debug!("control task stopped");
    }

    async fn run_poll_task(&self, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.poll_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_once(Utc::now()).await;
                }
            }
        }
        debug!("poll task stopped");
    }

    /// One control cycle over every zone.
    pub async fn run_control_once(&self, now: DateTime<Utc>) -> Vec<(u32, ControlResult<CycleOutcome>)> {
        self.control_status.write().await.started(now);

        let results = run_all_zones(&self.controllers, now).await;
        let errors = results
            .iter()
            .filter_map(|(zone_id, r)| r.as_ref().err().map(|e| format!("zone {zone_id}: {e}")))
            .collect_vec();
        if !errors.is_empty() {
            error!(failed = errors.len(), total = results.len(), "control cycle had failures");
        }
        self.control_status.write().await.finished(now, errors);
        results
    }

    /// Read every device once and publish the snapshots.
    pub async fn poll_once(&self, now: DateTime<Utc>) {
        self.poll_status.write().await.started(now);

        let reads = join_all(self.controllers.iter().map(|c| async move {
            (c.zone_id(), c.device().read_snapshot().await)
        }))
        .await;

        let mut errors = Vec::new();
        {
            let mut readings = self.readings.write().await;
            for (zone_id, read) in reads {
                match read {
                    Ok(snapshot) => {
                        readings.insert(
                            zone_id,
                            SensorReading {
                                zone_id,
                                timestamp: now,
                                snapshot,
                            },
                        );
                    }
                    Err(e) => {
                        warn!(zone_id, error = %e, "sensor poll failed");
                        errors.push(format!("zone {zone_id}: {e}"));
                    }
                }
            }
        }
        self.poll_status.write().await.finished(now, errors);
    }

    pub async fn control_status(&self) -> TaskStatus {
        self.control_status.read().await.clone()
    }

    pub async fn poll_status(&self) -> TaskStatus {
        self.poll_status.read().await.clone()
    }
}
