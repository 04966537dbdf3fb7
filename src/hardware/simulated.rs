use async_trait::async_trait;
use std::sync::Arc;

use super::ZoneDevice;
use crate::domain::ZoneSnapshot;
use crate::error::DeviceError;
use crate::simulation::zone_device::ZoneState;

/// In-process handle onto a running zone simulator.
///
/// Writes go through the same lock as the simulator's updater tick, so a
/// decision never interleaves with a drift step.
#[derive(Clone)]
pub struct SimulatedZoneDevice {
    state: Arc<ZoneState>,
}

impl SimulatedZoneDevice {
    pub fn new(state: Arc<ZoneState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl ZoneDevice for SimulatedZoneDevice {
    fn zone_id(&self) -> u32 {
        self.state.zone_id()
    }

    async fn read_snapshot(&self) -> Result<ZoneSnapshot, DeviceError> {
        Ok(self.state.snapshot().into())
    }

    async fn write_target_temperature(&self, celsius: f64) -> Result<(), DeviceError> {
        self.state
            .set_target_temperature(celsius)
            .map(|_| ())
            .map_err(|e| DeviceError::Rejected(e.to_string()))
    }

    async fn write_heater_state(&self, on: bool) -> Result<(), DeviceError> {
        self.state.set_heater(on);
        Ok(())
    }
}
