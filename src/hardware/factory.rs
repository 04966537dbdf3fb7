use serde::Deserialize;
use std::sync::Arc;

use super::{SimulatedZoneDevice, ZoneDevice};
use crate::error::{ControlError, ControlResult};
use crate::simulation::ZoneSimulator;

/// How the decision loop reaches a zone's register device.
///
/// `Modbus` talks to the device over its TCP listener and needs the `modbus`
/// feature; without it, selecting the mode is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HardwareMode {
    /// In-process handle sharing the simulator's state.
    Simulated,
    /// Register access over Modbus-TCP.
    Modbus,
}

/// Builds [`ZoneDevice`] handles for running simulators.
pub struct DeviceFactory {
    mode: HardwareMode,
}

impl DeviceFactory {
    pub fn new(mode: HardwareMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> HardwareMode {
        self.mode
    }

    pub async fn create(&self, sim: &ZoneSimulator) -> ControlResult<Arc<dyn ZoneDevice>> {
        match self.mode {
            HardwareMode::Simulated => Ok(Arc::new(SimulatedZoneDevice::new(sim.state()))),
            HardwareMode::Modbus => self.connect_modbus(sim).await,
        }
    }

    #[cfg(feature = "modbus")]
    async fn connect_modbus(&self, sim: &ZoneSimulator) -> ControlResult<Arc<dyn ZoneDevice>> {
        let addr = sim.local_addr().await.ok_or_else(|| {
            ControlError::unavailable(format!("zone {} simulator is not listening", sim.zone_id()))
        })?;
        let device =
            super::modbus::ModbusZoneDevice::connect(sim.zone_id(), &addr.to_string(), sim.unit_id())
                .await?;
        tracing::info!(zone_id = sim.zone_id(), %addr, "connected to register device");
        Ok(Arc::new(device))
    }

    #[cfg(not(feature = "modbus"))]
    async fn connect_modbus(&self, sim: &ZoneSimulator) -> ControlResult<Arc<dyn ZoneDevice>> {
        Err(ControlError::config(format!(
            "zone {}: device_mode = \"modbus\" requires the `modbus` feature",
            sim.zone_id()
        )))
    }
}
