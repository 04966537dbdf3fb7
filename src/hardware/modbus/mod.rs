mod zone;

pub use zone::ModbusZoneDevice;
