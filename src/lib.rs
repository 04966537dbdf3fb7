//! Zone heating control: setpoint arbitration, register-device simulation
//! and historical replay.

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod hardware;
pub mod modbus;
pub mod simulation;
pub mod telemetry;

pub use error::{ControlError, ControlResult, DeviceError};
