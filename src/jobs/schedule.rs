// src/jobs/schedule.rs
//! When a job fires: a fixed interval or a small cron subset
//! (day set, list of hours, one minute).

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Datelike, Days, TimeZone};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DaySet {
    /// Monday to Friday.
    Weekdays,
    Every,
}

impl DaySet {
    fn contains(self, weekday: chrono::Weekday) -> bool {
        match self {
            DaySet::Every => true,
            DaySet::Weekdays => weekday.number_from_monday() <= 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Trigger {
    Interval {
        #[serde(with = "secs")]
        every: Duration,
    },
    Cron {
        days: DaySet,
        /// Sorted, deduplicated, each < 24.
        hours: Vec<u32>,
        minute: u32,
    },
}

mod secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
}

impl Trigger {
    pub fn every(every: Duration) -> Self {
        Trigger::Interval { every }
    }

    pub fn cron(days: DaySet, hours: impl IntoIterator<Item = u32>, minute: u32) -> Self {
        let mut hours: Vec<u32> = hours.into_iter().filter(|h| *h < 24).collect();
        hours.sort_unstable();
        hours.dedup();
        Trigger::Cron {
            days,
            hours,
            minute: minute.min(59),
        }
    }

    /// Monday to Friday at `hour:minute`.
    pub fn weekdays_at(hour: u32, minute: u32) -> Self {
        Self::cron(DaySet::Weekdays, [hour], minute)
    }

    /// Next fire time strictly after `now`, in `now`'s time zone.
    /// `None` when the trigger can never fire (zero interval or no hours).
    pub fn next_after<Tz: TimeZone>(&self, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        match self {
            Trigger::Interval { every } => {
                if every.is_zero() {
                    return None;
                }
                let step = chrono::Duration::from_std(*every).ok()?;
                now.clone().checked_add_signed(step)
            }
            Trigger::Cron {
                days,
                hours,
                minute,
            } => {
                let tz = now.timezone();
                let today = now.date_naive();
                // A week plus one day covers every DaySet.
                for offset in 0..=7u64 {
                    let date = today.checked_add_days(Days::new(offset))?;
                    if !days.contains(date.weekday()) {
                        continue;
                    }
                    for &hour in hours {
                        let Some(naive) = date.and_hms_opt(hour, *minute, 0) else {
                            continue;
                        };
                        // Skips wall-clock times that do not exist (DST gaps).
                        let Some(at) = tz.from_local_datetime(&naive).earliest() else {
                            continue;
                        };
                        if at > *now {
                            return Some(at);
                        }
                    }
                }
                None
            }
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Trigger::Interval { every } => write!(f, "every {}s", every.as_secs()),
            Trigger::Cron {
                days,
                hours,
                minute,
            } => {
                let days = match days {
                    DaySet::Weekdays => "mon-fri",
                    DaySet::Every => "daily",
                };
                let hours = hours
                    .iter()
                    .map(|h| h.to_string())
                    .collect::<Vec<_>>()
                    .join(",");
                write!(f, "{days} at hour {hours} minute {minute}")
            }
        }
    }
}
