use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Tariff band of an energy price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE", ascii_case_insensitive)]
pub enum PriceLevel {
    OffPeak,
    Standard,
    Peak,
    SuperPeak,
}

/// Energy price resolved for a single instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyPriceSample {
    pub level: PriceLevel,
    pub price_per_kwh: f64,
    pub timestamp: DateTime<Utc>,
}

impl EnergyPriceSample {
    pub fn new(level: PriceLevel, price_per_kwh: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            level,
            price_per_kwh,
            timestamp,
        }
    }
}
