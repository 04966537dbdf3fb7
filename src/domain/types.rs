use chrono::{NaiveTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ControlError;

// ============================================================================
// Time of day
// ============================================================================

/// Wall-clock time of day in strict 24-hour `HH:MM` form.
///
/// Parsing is the only way to build one from text, so a schedule that
/// deserialises successfully never carries a malformed time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeOfDay(NaiveTime);

impl TimeOfDay {
    pub fn new(hour: u32, minute: u32) -> Option<Self> {
        NaiveTime::from_hms_opt(hour, minute, 0).map(Self)
    }

    pub fn from_time(time: NaiveTime) -> Self {
        // Schedules have minute resolution.
        Self(NaiveTime::from_hms_opt(time.hour(), time.minute(), 0).unwrap_or(time))
    }

    pub fn hour(&self) -> u32 {
        self.0.hour()
    }

    pub fn minute(&self) -> u32 {
        self.0.minute()
    }

    pub fn as_naive(&self) -> NaiveTime {
        self.0
    }
}

impl FromStr for TimeOfDay {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s.as_bytes();
        let well_formed = bytes.len() == 5
            && bytes[2] == b':'
            && bytes[..2].iter().all(u8::is_ascii_digit)
            && bytes[3..].iter().all(u8::is_ascii_digit);
        if !well_formed {
            return Err(ControlError::config(format!(
                "invalid time of day '{s}', expected HH:MM"
            )));
        }
        let hour: u32 = s[..2].parse().map_err(|_| ControlError::config(format!("invalid hour in '{s}'")))?;
        let minute: u32 = s[3..].parse().map_err(|_| ControlError::config(format!("invalid minute in '{s}'")))?;
        Self::new(hour, minute)
            .ok_or_else(|| ControlError::config(format!("time of day '{s}' is out of range")))
    }
}

impl TryFrom<String> for TimeOfDay {
    type Error = ControlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TimeOfDay> for String {
    fn from(t: TimeOfDay) -> Self {
        t.to_string()
    }
}

impl From<NaiveTime> for TimeOfDay {
    fn from(t: NaiveTime) -> Self {
        Self::from_time(t)
    }
}

impl fmt::Display for TimeOfDay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour(), self.minute())
    }
}

// ============================================================================
// Temperature helpers
// ============================================================================

/// Round to one decimal place, the precision of every published setpoint.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Round to two decimal places, used for simulated temperatures and traces.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
