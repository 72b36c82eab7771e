//! Time utilities for siteguardd
//!
//! Everything here is wall-clock based: day buckets, schedule ranges and the
//! daily rollover all follow the local calendar, not UTC.
//!
//! # Mock Time for Development
//!
//! In debug builds, the `SITEGUARD_MOCK_TIME` environment variable can be set
//! to override the system time for all time-sensitive operations. The mocked
//! clock keeps advancing at the real rate from the given starting point.
//!
//! Format: `YYYY-MM-DD HH:MM:SS` (e.g., `2025-12-27 21:55:00`)
//!
//! Example:
//! ```bash
//! SITEGUARD_MOCK_TIME="2025-12-27 23:59:30" siteguardd
//! ```

use chrono::{DateTime, Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Weekday};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable name for mock time (debug builds only)
pub const MOCK_TIME_ENV_VAR: &str = "SITEGUARD_MOCK_TIME";

const MINUTES_PER_DAY: u16 = 24 * 60;

static MOCK_TIME_OFFSET: OnceLock<Option<chrono::Duration>> = OnceLock::new();

#[allow(clippy::disallowed_methods)] // This is the internal implementation that wraps Local::now()
fn get_mock_time_offset() -> Option<chrono::Duration> {
    *MOCK_TIME_OFFSET.get_or_init(|| {
        #[cfg(debug_assertions)]
        {
            let mock_time_str = std::env::var(MOCK_TIME_ENV_VAR).ok()?;
            let Ok(naive_dt) = NaiveDateTime::parse_from_str(&mock_time_str, "%Y-%m-%d %H:%M:%S")
            else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    expected_format = "%Y-%m-%d %H:%M:%S",
                    "Invalid mock time format"
                );
                return None;
            };
            let Some(mock_dt) = Local.from_local_datetime(&naive_dt).single() else {
                tracing::warn!(
                    mock_time = %mock_time_str,
                    "Mock time does not exist in the local timezone"
                );
                return None;
            };
            let offset = mock_dt.signed_duration_since(chrono::Local::now());
            tracing::info!(
                mock_time = %mock_time_str,
                offset_secs = offset.num_seconds(),
                "Mock time enabled"
            );
            Some(offset)
        }
        #[cfg(not(debug_assertions))]
        {
            None
        }
    })
}

/// Returns whether mock time is currently active.
pub fn is_mock_time_active() -> bool {
    get_mock_time_offset().is_some()
}

/// Get the current local time, respecting mock time settings in debug builds.
#[allow(clippy::disallowed_methods)] // This is the wrapper that provides mock time support
pub fn now() -> DateTime<Local> {
    let real_now = chrono::Local::now();
    match get_mock_time_offset() {
        Some(offset) => real_now + offset,
        None => real_now,
    }
}

/// Minute-resolution wall-clock time, written as `HH:MM`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WallClock {
    pub hour: u8,
    pub minute: u8,
}

impl WallClock {
    pub fn new(hour: u8, minute: u8) -> Option<Self> {
        if hour < 24 && minute < 60 {
            Some(Self { hour, minute })
        } else {
            None
        }
    }

    pub fn from_naive_time(time: NaiveTime) -> Self {
        Self {
            hour: time.hour() as u8,
            minute: time.minute() as u8,
        }
    }

    /// The wall-clock minute `dt` falls in (seconds are truncated)
    pub fn of(dt: &DateTime<Local>) -> Self {
        Self::from_naive_time(dt.time())
    }

    pub fn minutes_from_midnight(&self) -> u16 {
        (self.hour as u16) * 60 + self.minute as u16
    }
}

impl PartialOrd for WallClock {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for WallClock {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.minutes_from_midnight()
            .cmp(&other.minutes_from_midnight())
    }
}

impl fmt::Display for WallClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.hour, self.minute)
    }
}

impl FromStr for WallClock {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (hour, minute) = s
            .split_once(':')
            .ok_or_else(|| "Expected HH:MM format".to_string())?;

        if minute.len() != 2 {
            return Err("Expected HH:MM format".into());
        }

        let hour: u8 = hour.parse().map_err(|_| "Invalid hour".to_string())?;
        let minute: u8 = minute.parse().map_err(|_| "Invalid minute".to_string())?;

        if hour >= 24 {
            return Err("Hour must be 0-23".into());
        }
        if minute >= 60 {
            return Err("Minute must be 0-59".into());
        }

        Ok(Self { hour, minute })
    }
}

impl Serialize for WallClock {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for WallClock {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Which half of a site rule applies on a given day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DayType {
    Weekday,
    Weekend,
}

impl DayType {
    pub fn of_date(date: NaiveDate) -> Self {
        match date.weekday() {
            Weekday::Sat | Weekday::Sun => DayType::Weekend,
            _ => DayType::Weekday,
        }
    }

    pub fn of(dt: &DateTime<Local>) -> Self {
        Self::of_date(dt.date_naive())
    }
}

impl fmt::Display for DayType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DayType::Weekday => write!(f, "weekday"),
            DayType::Weekend => write!(f, "weekend"),
        }
    }
}

/// A daily clock window `[start, end)`; when `start > end` it wraps past midnight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClockRange {
    pub start: WallClock,
    pub end: WallClock,
}

impl ClockRange {
    pub fn new(start: WallClock, end: WallClock) -> Self {
        Self { start, end }
    }

    pub fn wraps(&self) -> bool {
        self.start > self.end
    }

    /// A range whose start equals its end never matches anything
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn contains(&self, time: WallClock) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            // Crosses midnight (e.g., 22:00 - 06:00)
            time >= self.start || time < self.end
        }
    }

    /// Usage bucket key, `HH:MM-HH:MM`
    pub fn key(&self) -> String {
        format!("{}-{}", self.start, self.end)
    }

    /// Minute intervals `[from, to)` this range covers within one day
    fn segments(&self) -> Vec<(u16, u16)> {
        let start = self.start.minutes_from_midnight();
        let end = self.end.minutes_from_midnight();
        if start < end {
            vec![(start, end)]
        } else if start > end {
            vec![(start, MINUTES_PER_DAY), (0, end)]
        } else {
            Vec::new()
        }
    }

    pub fn overlaps(&self, other: &ClockRange) -> bool {
        let theirs = other.segments();
        self.segments()
            .iter()
            .any(|(a0, a1)| theirs.iter().any(|(b0, b1)| a0 < b1 && b0 < a1))
    }
}

impl fmt::Display for ClockRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

/// Calendar date formatted as `YYYY-MM-DD`
pub fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// First instant of `date` in local time.
///
/// If local midnight does not exist (DST gap), the first instant after the gap is used.
pub fn start_of_day(date: NaiveDate) -> Option<DateTime<Local>> {
    let midnight = date.and_time(NaiveTime::MIN);
    Local
        .from_local_datetime(&midnight)
        .earliest()
        .or_else(|| {
            Local
                .from_local_datetime(&(midnight + chrono::Duration::hours(1)))
                .earliest()
        })
}

/// Next daily rollover instant: the coming local midnight plus `buffer`
pub fn next_rollover(now: &DateTime<Local>, buffer: Duration) -> DateTime<Local> {
    let buffer = chrono::Duration::from_std(buffer).unwrap_or_else(|_| chrono::Duration::zero());
    let midnight = now
        .date_naive()
        .succ_opt()
        .and_then(start_of_day)
        .unwrap_or_else(|| *now + chrono::Duration::days(1));
    midnight + buffer
}
