use async_trait::async_trait;
use tracing::debug;

use crate::domain::ZoneSnapshot;
use crate::error::DeviceError;
use crate::hardware::ZoneDevice;
use crate::modbus::client::ModbusClient;
use crate::modbus::register_map::{
    decode_state, encode_temp, REGISTER_COUNT, REG_CURRENT_TEMP, REG_HEATER_STATUS, REG_TARGET_TEMP,
};

/// Zone device reached over Modbus-TCP.
///
/// A conforming zone only accepts writes to the target register, so heater
/// commands are answered with an exception and surface as
/// [`DeviceError::Rejected`].
pub struct ModbusZoneDevice {
    zone_id: u32,
    client: ModbusClient,
}

impl ModbusZoneDevice {
    pub async fn connect(zone_id: u32, addr: &str, unit_id: u8) -> Result<Self, DeviceError> {
        let client = ModbusClient::connect(addr, unit_id).await?;
        debug!(zone_id, addr, "connected to zone register device");
        Ok(Self { zone_id, client })
    }

    pub fn with_client(zone_id: u32, client: ModbusClient) -> Self {
        Self { zone_id, client }
    }
}

#[async_trait]
impl ZoneDevice for ModbusZoneDevice {
    fn zone_id(&self) -> u32 {
        self.zone_id
    }

    async fn read_snapshot(&self) -> Result<ZoneSnapshot, DeviceError> {
        let regs = self
            .client
            .read_holding_registers(REG_CURRENT_TEMP, REGISTER_COUNT)
            .await?;
        decode_state(&regs).map(ZoneSnapshot::from).ok_or_else(|| {
            DeviceError::Unavailable(format!(
                "zone {} returned {} registers, expected {REGISTER_COUNT}",
                self.zone_id,
                regs.len()
            ))
        })
    }

    async fn write_target_temperature(&self, celsius: f64) -> Result<(), DeviceError> {
        self.client
            .write_single_register(REG_TARGET_TEMP, encode_temp(celsius))
            .await
    }

    async fn write_heater_state(&self, on: bool) -> Result<(), DeviceError> {
        self.client
            .write_single_register(REG_HEATER_STATUS, u16::from(on))
            .await
    }
}
