use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandType {
    SetTargetTemp,
    SetHeater,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandStatus {
    Success,
    /// The device answered and refused the write.
    Failed,
    /// The write could not be delivered.
    Error,
}

/// Audit entry for one device write attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub zone_id: u32,
    pub timestamp: DateTime<Utc>,
    pub command_type: CommandType,
    pub target_temp: f64,
    pub details: serde_json::Value,
    pub status: CommandStatus,
}
