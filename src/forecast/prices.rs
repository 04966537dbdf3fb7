use chrono::{DateTime, Timelike, Utc};

use crate::config::{PricingConfig, TariffBand};
use crate::domain::{EnergyPriceSample, PriceLevel};
use crate::error::ControlResult;

/// Energy price lookup. A pure function of time.
pub trait PriceSource: Send + Sync {
    fn price_at(&self, at: DateTime<Utc>) -> ControlResult<EnergyPriceSample>;
}

/// Fixed hour-of-day tariff, evaluated in UTC.
#[derive(Debug, Clone)]
pub struct TimeOfUsePricing {
    bands: Vec<TariffBand>,
    default_level: PriceLevel,
    off_peak: f64,
    standard: f64,
    peak: f64,
    super_peak: f64,
}

impl TimeOfUsePricing {
    pub fn new(cfg: &PricingConfig) -> Self {
        Self {
            bands: cfg.bands.clone(),
            default_level: cfg.default_level,
            off_peak: cfg.off_peak_price,
            standard: cfg.standard_price,
            peak: cfg.peak_price,
            super_peak: cfg.super_peak_price,
        }
    }

    pub fn level_at(&self, at: DateTime<Utc>) -> PriceLevel {
        let hour = at.hour();
        self.bands
            .iter()
            .find(|b| b.start_hour <= hour && hour < b.end_hour)
            .map_or(self.default_level, |b| b.level)
    }

    pub fn price_for(&self, level: PriceLevel) -> f64 {
        match level {
            PriceLevel::OffPeak => self.off_peak,
            PriceLevel::Standard => self.standard,
            PriceLevel::Peak => self.peak,
            PriceLevel::SuperPeak => self.super_peak,
        }
    }
}

impl Default for TimeOfUsePricing {
    fn default() -> Self {
        Self::new(&PricingConfig::default())
    }
}

impl PriceSource for TimeOfUsePricing {
    fn price_at(&self, at: DateTime<Utc>) -> ControlResult<EnergyPriceSample> {
        let level = self.level_at(at);
        Ok(EnergyPriceSample::new(level, self.price_for(level), at))
    }
}
