//! Simulated zones: the thermal model, the register-device simulator that
//! stands in for a zone's hardware, and historical replay.

pub mod replay;
pub mod thermal;
pub mod zone_device;

pub use replay::{
    run_replay, HistoricalDataPoint, InMemoryRecorder, OccupancyModel, Replay, ReplayRecorder, ReplayRequest,
    ReplayRun, ReplayStatus, ReplaySummary,
};
pub use thermal::{clamp_simulated, ThermalModel, MAX_SIMULATED_TEMP_C, MIN_SIMULATED_TEMP_C};
pub use zone_device::{drift_step, SimulatorConfig, SimulatorStatus, ZoneSimulator, ZoneState};
