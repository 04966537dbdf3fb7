//! Setpoint arbitration.
//!
//! Combines the zone schedule, occupancy, energy price and an optional
//! outdoor forecast into one target temperature. The calculation is a pure
//! function of [`ArbiterInputs`] so live control and historical replay agree
//! for identical inputs.

use chrono::{DateTime, Utc};
use tracing::trace;

use crate::domain::{round1, ForecastPoint, PriceLevel, TimeOfDay, ZonePreferences};

/// Everything the arbiter looks at for one decision.
#[derive(Debug, Clone, Copy)]
pub struct ArbiterInputs<'a> {
    pub now: DateTime<Utc>,
    pub prefs: &'a ZonePreferences,
    pub current_internal_c: f64,
    pub occupied: bool,
    pub outdoor_c: Option<f64>,
    /// Chronologically ordered forecast, offsets relative to `now`.
    pub forecast: &'a [ForecastPoint],
    pub price_level: PriceLevel,
}

/// Which predictive branch, if any, adjusted the target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PredictiveAdjustment {
    None,
    OccupiedPreheat { at_offset_hours: i64 },
    ScheduledPreheat { at_offset_hours: i64, future_occupied_c: f64 },
    AvoidOverheat { at_offset_hours: i64 },
}

/// Target plus the intermediate values that produced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetBreakdown {
    pub scheduled_c: f64,
    pub predictive: PredictiveAdjustment,
    pub boost_cap_c: f64,
    pub target_c: f64,
}

pub fn calculate_target(inputs: &ArbiterInputs<'_>) -> f64 {
    explain_target(inputs).target_c
}

pub fn explain_target(inputs: &ArbiterInputs<'_>) -> TargetBreakdown {
    let prefs = inputs.prefs;
    let fallback = prefs.default_setpoints();
    let now_tod = TimeOfDay::from_time(inputs.now.time());
    let active = prefs.schedule.resolve(now_tod, fallback);

    // Unoccupied baseline: setback replaces the scheduled unoccupied setpoint.
    let unoccupied_c = match prefs.setback_setpoint {
        Some(setback) if prefs.use_occupancy_for_heating => setback,
        _ => active.unoccupied_c,
    };
    let scheduled_c = if inputs.occupied {
        active.occupied_c
    } else {
        unoccupied_c
    };
    let mut target = scheduled_c;

    let predictive = match inputs.outdoor_c {
        Some(outdoor) if prefs.allow_predictive_control && !inputs.forecast.is_empty() => {
            scan_forecast(inputs, outdoor, &mut target)
        }
        _ => PredictiveAdjustment::None,
    };

    let boost_cap_c = active.occupied_c + prefs.max_combined_preheat_boost;
    if inputs.occupied || target > unoccupied_c {
        target = target.min(boost_cap_c);
    }

    if inputs.occupied {
        match inputs.price_level {
            PriceLevel::Peak => target -= prefs.peak_occupied_temp_reduction,
            PriceLevel::SuperPeak => target -= prefs.super_peak_occupied_temp_reduction,
            PriceLevel::OffPeak if prefs.allow_off_peak_preconditioning => {
                target = (target + prefs.off_peak_occupied_temp_increase).min(boost_cap_c);
            }
            _ => {}
        }

        if inputs
            .outdoor_c
            .is_some_and(|outdoor| outdoor > prefs.high_outside_temp_threshold)
        {
            target -= prefs.occupied_temp_reduction_high_outside;
        }
    }

    // Limits finer than 0.1 can sit between rounding steps.
    let target_c = prefs.clamp_target(round1(prefs.clamp_target(target)));
    trace!(
        scheduled_c,
        boost_cap_c,
        target_c,
        occupied = inputs.occupied,
        price = %inputs.price_level,
        "arbitrated target"
    );

    TargetBreakdown {
        scheduled_c,
        predictive,
        boost_cap_c,
        target_c,
    }
}

/// Walk the forecast in order; the first qualifying slot decides.
fn scan_forecast(inputs: &ArbiterInputs<'_>, outdoor_c: f64, target: &mut f64) -> PredictiveAdjustment {
    let prefs = inputs.prefs;
    let window = chrono::Duration::hours(i64::from(prefs.predictive_window_hours));
    let energy_ok = match inputs.price_level {
        PriceLevel::SuperPeak => false,
        PriceLevel::Peak => prefs.prioritize_comfort_over_peak_cost,
        PriceLevel::OffPeak | PriceLevel::Standard => true,
    };

    let slots = inputs
        .forecast
        .iter()
        .filter(|p| p.offset > chrono::Duration::zero())
        .take_while(|p| p.offset <= window);

    for point in slots {
        let hours = point.offset.num_hours();
        let future_c = point.outdoor_temp_c;

        if outdoor_c - future_c > prefs.predictive_temp_drop_threshold && energy_ok {
            if inputs.occupied {
                *target += prefs.predictive_preheat_increase;
                return PredictiveAdjustment::OccupiedPreheat { at_offset_hours: hours };
            }
            let future = prefs
                .schedule
                .resolve(TimeOfDay::from_time(point.time_of_day), prefs.default_setpoints());
            if future.active
                && future_c < future.occupied_c
                && inputs.current_internal_c < future.occupied_c
            {
                *target = future.occupied_c + prefs.predictive_preheat_increase;
                return PredictiveAdjustment::ScheduledPreheat {
                    at_offset_hours: hours,
                    future_occupied_c: future.occupied_c,
                };
            }
        }

        if future_c - outdoor_c > prefs.predictive_temp_rise_threshold && inputs.occupied {
            *target -= prefs.predictive_avoid_overheat_reduction;
            return PredictiveAdjustment::AvoidOverheat { at_offset_hours: hours };
        }
    }

    PredictiveAdjustment::None
}
