use itertools::Itertools;
use serde::{Deserialize, Serialize};

use super::types::TimeOfDay;

/// One time-of-day setpoint change in a zone schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub time: TimeOfDay,
    pub occupied_temp: f64,
    pub unoccupied_temp: f64,
}

/// Occupied/unoccupied setpoint pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Setpoints {
    pub occupied_c: f64,
    pub unoccupied_c: f64,
}

/// Result of a schedule lookup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedSetpoints {
    /// True when a schedule entry (rather than the fallback) supplied the pair.
    pub active: bool,
    pub occupied_c: f64,
    pub unoccupied_c: f64,
}

/// A zone schedule, always held sorted by ascending time of day.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ScheduleEntry>", into = "Vec<ScheduleEntry>")]
pub struct Schedule {
    entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new(entries: impl IntoIterator<Item = ScheduleEntry>) -> Self {
        let entries = entries.into_iter().sorted_by_key(|e| e.time).collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[ScheduleEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Latest entry whose time of day is at or before `at`.
    pub fn active_entry(&self, at: TimeOfDay) -> Option<&ScheduleEntry> {
        self.entries.iter().rev().find(|e| e.time <= at)
    }

    /// Setpoints active at `at`, or `fallback` with `active = false` when the
    /// query is earlier than every entry.
    pub fn resolve(&self, at: TimeOfDay, fallback: Setpoints) -> ResolvedSetpoints {
        match self.active_entry(at) {
            Some(entry) => ResolvedSetpoints {
                active: true,
                occupied_c: entry.occupied_temp,
                unoccupied_c: entry.unoccupied_temp,
            },
            None => ResolvedSetpoints {
                active: false,
                occupied_c: fallback.occupied_c,
                unoccupied_c: fallback.unoccupied_c,
            },
        }
    }
}

impl From<Vec<ScheduleEntry>> for Schedule {
    fn from(entries: Vec<ScheduleEntry>) -> Self {
        Self::new(entries)
    }
}

impl From<Schedule> for Vec<ScheduleEntry> {
    fn from(schedule: Schedule) -> Self {
        schedule.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DEFAULTS: Setpoints = Setpoints {
        occupied_c: 21.0,
        unoccupied_c: 17.0,
    };

    fn entry(h: u32, m: u32, occ: f64, unocc: f64) -> ScheduleEntry {
        ScheduleEntry {
            time: TimeOfDay::new(h, m).unwrap(),
            occupied_temp: occ,
            unoccupied_temp: unocc,
        }
    }

    #[test]
    fn sorts_entries_on_construction() {
        let s = Schedule::new(vec![entry(18, 0, 20.0, 16.0), entry(6, 30, 22.0, 18.0)]);
        assert_eq!(s.entries()[0].time.to_string(), "06:30");
        assert_eq!(s.entries()[1].time.to_string(), "18:00");
    }

    #[test]
    fn picks_latest_entry_at_or_before_query() {
        let s = Schedule::new(vec![
            entry(6, 0, 22.0, 18.0),
            entry(12, 0, 21.0, 17.5),
            entry(18, 0, 20.0, 16.0),
        ]);
        let at = |h, m| TimeOfDay::new(h, m).unwrap();

        let r = s.resolve(at(12, 0), DEFAULTS);
        assert!(r.active);
        assert_eq!((r.occupied_c, r.unoccupied_c), (21.0, 17.5));

        let r = s.resolve(at(23, 59), DEFAULTS);
        assert_eq!(r.occupied_c, 20.0);
    }

    #[test]
    fn falls_back_before_first_entry() {
        let s = Schedule::new(vec![entry(6, 0, 22.0, 18.0)]);
        let r = s.resolve(TimeOfDay::new(5, 59).unwrap(), DEFAULTS);
        assert!(!r.active);
        assert_eq!((r.occupied_c, r.unoccupied_c), (21.0, 17.0));
    }

    #[test]
    fn empty_schedule_always_falls_back() {
        let r = Schedule::default().resolve(TimeOfDay::new(12, 0).unwrap(), DEFAULTS);
        assert!(!r.active);
        assert_eq!(r.occupied_c, 21.0);
    }

    proptest! {
        #[test]
        fn resolves_latest_entry_not_after_query(
            minutes in proptest::collection::vec(0u32..1440, 0..8),
            query in 0u32..1440,
        ) {
            let entries: Vec<_> = minutes
                .iter()
                .map(|m| entry(m / 60, m % 60, f64::from(*m), 0.0))
                .collect();
            let schedule = Schedule::new(entries);
            let q = TimeOfDay::new(query / 60, query % 60).unwrap();
            let r = schedule.resolve(q, DEFAULTS);

            match minutes.iter().filter(|m| **m <= query).max() {
                Some(best) => {
                    prop_assert!(r.active);
                    prop_assert_eq!(r.occupied_c, f64::from(*best));
                }
                None => {
                    prop_assert!(!r.active);
                    prop_assert_eq!(r.occupied_c, DEFAULTS.occupied_c);
                }
            }
        }
    }
}
