//! Hourly uptime buckets.

use chrono::{Local, TimeZone};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

use super::round_to;
use crate::db::{Observation, Status};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HourlyBucket {
    /// `YYYY-MM-DD HH:00` in the bucketing time zone.
    pub hour: String,
    pub up_checks: u64,
    pub down_checks: u64,
    pub total_checks: u64,
    pub uptime_percentage: f64,
}

/// Bucket observations by hour of the server's local time.
pub fn bucket_by_local_hour(observations: &[Observation]) -> Vec<HourlyBucket> {
    bucket_by_hour(observations, &Local)
}

/// Bucket observations by hour in `tz`, ascending, without empty hours.
pub fn bucket_by_hour<Tz>(observations: &[Observation], tz: &Tz) -> Vec<HourlyBucket>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    // The key format sorts chronologically.
    let mut buckets: BTreeMap<String, (u64, u64)> = BTreeMap::new();

    for obs in observations {
        let key = obs
            .checked_at
            .with_timezone(tz)
            .format("%Y-%m-%d %H:00")
            .to_string();
        let entry = buckets.entry(key).or_default();
        match obs.status {
            Status::Up => entry.0 += 1,
            Status::Down => entry.1 += 1,
            Status::Checking => {}
        }
    }

    buckets
        .into_iter()
        .filter(|(_, (up, down))| up + down > 0)
        .map(|(hour, (up, down))| {
            let total = up + down;
            HourlyBucket {
                hour,
                up_checks: up,
                down_checks: down,
                total_checks: total,
                uptime_percentage: round_to(up as f64 / total as f64 * 100.0, 2),
            }
        })
        .collect()
}
