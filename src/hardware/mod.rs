//! Zone device access.
//!
//! The decision loop talks to a zone only through [`ZoneDevice`]; whether the
//! zone lives in this process or behind a register bus is a wiring choice made
//! by [`factory::DeviceFactory`].

use async_trait::async_trait;

use crate::domain::ZoneSnapshot;
use crate::error::DeviceError;

pub mod factory;
#[cfg(feature = "modbus")]
pub mod modbus;
pub mod simulated;

pub use factory::{DeviceFactory, HardwareMode};
pub use simulated::SimulatedZoneDevice;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ZoneDevice: Send + Sync {
    fn zone_id(&self) -> u32;

    async fn read_snapshot(&self) -> Result<ZoneSnapshot, DeviceError>;

    async fn write_target_temperature(&self, celsius: f64) -> Result<(), DeviceError>;

    async fn write_heater_state(&self, on: bool) -> Result<(), DeviceError>;
}
