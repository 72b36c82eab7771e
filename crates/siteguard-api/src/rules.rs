//! Site rules and the process-wide policy settings
//!
//! Field names are camelCase on the wire and in the store: these values are
//! persisted as-is under the `rules`, `globalLimits`, `operationMode` and
//! `temporaryDisable*` keys.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use siteguard_util::{ClockRange, DayType, HostName, WallClock};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// All site rules, keyed by host
pub type RuleSet = BTreeMap<HostName, SiteRule>;

/// A clock window during which a site is reachable, optionally with its own limit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeRange {
    pub start_time: WallClock,
    pub end_time: WallClock,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_minutes: Option<u32>,
}

impl TimeRange {
    pub fn new(start_time: WallClock, end_time: WallClock) -> Self {
        Self {
            start_time,
            end_time,
            limit_minutes: None,
        }
    }

    pub fn with_limit(mut self, minutes: u32) -> Self {
        self.limit_minutes = Some(minutes);
        self
    }

    pub fn clock_range(&self) -> ClockRange {
        ClockRange::new(self.start_time, self.end_time)
    }

    /// Key of this range's usage bucket
    pub fn key(&self) -> String {
        self.clock_range().key()
    }

    pub fn contains(&self, time: WallClock) -> bool {
        self.clock_range().contains(time)
    }
}

/// Schedule applying on weekdays or on weekends
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRule {
    #[serde(default)]
    pub daily_limit_minutes: Option<u32>,

    /// Absent or empty means allowed all day
    #[serde(default)]
    pub time_ranges: Option<Vec<TimeRange>>,
}

impl ScheduleRule {
    /// Ranges that gate access, if any are configured
    pub fn gating_ranges(&self) -> Option<&[TimeRange]> {
        self.time_ranges
            .as_deref()
            .filter(|ranges| !ranges.is_empty())
    }

    /// First range in declaration order containing `time`
    pub fn matching_range(&self, time: WallClock) -> Option<&TimeRange> {
        self.gating_ranges()?
            .iter()
            .find(|range| range.contains(time))
    }
}

/// Per-host rule: either unrestricted, or a weekday and/or weekend schedule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteRule {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unrestricted: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<ScheduleRule>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekend: Option<ScheduleRule>,
}

impl SiteRule {
    pub fn unrestricted() -> Self {
        Self {
            unrestricted: true,
            ..Default::default()
        }
    }

    pub fn schedule_for(&self, day_type: DayType) -> Option<&ScheduleRule> {
        match day_type {
            DayType::Weekday => self.weekday.as_ref(),
            DayType::Weekend => self.weekend.as_ref(),
        }
    }
}

/// Caps on total minutes across all hosts combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalLimits {
    #[serde(default)]
    pub weekday: Option<u32>,
    #[serde(default)]
    pub weekend: Option<u32>,
}

impl GlobalLimits {
    pub fn for_day(&self, day_type: DayType) -> Option<u32> {
        match day_type {
            DayType::Weekday => self.weekday,
            DayType::Weekend => self.weekend,
        }
    }
}

/// Global policy stance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationMode {
    /// Observe only, never block
    Monitoring,
    /// Default-allow: hosts without rules are reachable
    #[default]
    Permissive,
    /// Default-deny: hosts without rules are blocked
    Strict,
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationMode::Monitoring => write!(f, "monitoring"),
            OperationMode::Permissive => write!(f, "permissive"),
            OperationMode::Strict => write!(f, "strict"),
        }
    }
}

impl FromStr for OperationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "monitoring" => Ok(OperationMode::Monitoring),
            "permissive" => Ok(OperationMode::Permissive),
            "strict" => Ok(OperationMode::Strict),
            other => Err(format!("Unknown operation mode: {}", other)),
        }
    }
}

/// Time-boxed override suspending all blocking
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemporaryDisable {
    pub end_time: DateTime<Local>,
    pub duration_minutes: u32,
}

impl TemporaryDisable {
    pub fn is_active(&self, now: &DateTime<Local>) -> bool {
        *now < self.end_time
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(s: &str) -> WallClock {
        s.parse().unwrap()
    }

    #[test]
    fn site_rule_camel_case_roundtrip() {
        let json = r#"{
            "weekday": {
                "dailyLimitMinutes": 60,
                "timeRanges": [
                    {"startTime": "09:00", "endTime": "12:00", "limitMinutes": 30},
                    {"startTime": "22:00", "endTime": "06:00"}
                ]
            },
            "weekend": {"dailyLimitMinutes": null, "timeRanges": null}
        }"#;

        let rule: SiteRule = serde_json::from_str(json).unwrap();
        assert!(!rule.unrestricted);

        let weekday = rule.schedule_for(DayType::Weekday).unwrap();
        assert_eq!(weekday.daily_limit_minutes, Some(60));
        let ranges = weekday.gating_ranges().unwrap();
        assert_eq!(ranges.len(), 2);
        assert_eq!(ranges[0].limit_minutes, Some(30));
        assert_eq!(ranges[1].key(), "22:00-06:00");

        let weekend = rule.schedule_for(DayType::Weekend).unwrap();
        assert!(weekend.gating_ranges().is_none());

        let out = serde_json::to_value(&rule).unwrap();
        assert!(out.get("unrestricted").is_none());
        assert_eq!(out["weekday"]["timeRanges"][0]["startTime"], "09:00");
    }

    #[test]
    fn unrestricted_rule_shape() {
        let json = serde_json::to_string(&SiteRule::unrestricted()).unwrap();
        assert_eq!(json, r#"{"unrestricted":true}"#);
    }

    #[test]
    fn matching_range_is_first_match() {
        let schedule = ScheduleRule {
            daily_limit_minutes: None,
            time_ranges: Some(vec![
                TimeRange::new(clock("08:00"), clock("12:00")).with_limit(10),
                TimeRange::new(clock("22:00"), clock("06:00")),
            ]),
        };

        assert_eq!(
            schedule.matching_range(clock("09:30")).map(|r| r.key()),
            Some("08:00-12:00".to_string())
        );
        assert_eq!(
            schedule.matching_range(clock("23:00")).map(|r| r.key()),
            Some("22:00-06:00".to_string())
        );
        assert!(schedule.matching_range(clock("15:00")).is_none());
    }

    #[test]
    fn empty_ranges_do_not_gate() {
        let schedule = ScheduleRule {
            daily_limit_minutes: Some(5),
            time_ranges: Some(vec![]),
        };
        assert!(schedule.gating_ranges().is_none());
        assert!(schedule.matching_range(clock("12:00")).is_none());
    }

    #[test]
    fn operation_mode_parsing() {
        assert_eq!("Strict".parse::<OperationMode>().unwrap(), OperationMode::Strict);
        assert_eq!(OperationMode::default(), OperationMode::Permissive);
        assert!("lenient".parse::<OperationMode>().is_err());
        assert_eq!(serde_json::to_string(&OperationMode::Monitoring).unwrap(), r#""monitoring""#);
    }

    #[test]
    fn global_limits_per_day_type() {
        let limits = GlobalLimits {
            weekday: Some(120),
            weekend: None,
        };
        assert_eq!(limits.for_day(DayType::Weekday), Some(120));
        assert_eq!(limits.for_day(DayType::Weekend), None);
    }
}
