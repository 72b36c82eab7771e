//! Shared types for the siteguardd API

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use siteguard_util::{DayType, HostName, TabId, WindowId};
use std::fmt;
use std::time::Duration;

use crate::{OperationMode, TemporaryDisable};

/// Why a navigation was allowed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowReason {
    TemporaryOverride,
    MonitoringMode,
    NoRule,
    Unrestricted,
    NoScheduleForDayType,
    WithinLimits,
}

/// Why a navigation was blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "snake_case")]
pub enum BlockReason {
    /// Strict mode and the host has no rule at all
    NoRuleDefined,
    /// Strict mode and the rule has no schedule for today's day type
    NoRuleForDayType { day_type: DayType },
    /// Time ranges are configured and none contains the current time
    OutsideAllowedHours { day_type: DayType },
    /// The matched range's own limit is used up
    RangeLimitReached {
        range: String,
        limit_minutes: u32,
        day_type: DayType,
    },
    /// The host's daily limit is used up
    DailyLimitReached {
        host: HostName,
        limit_minutes: u32,
        day_type: DayType,
    },
    /// Combined usage across all hosts reached the global cap
    GlobalLimitReached { limit_minutes: u32, day_type: DayType },
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::NoRuleDefined => write!(f, "blocked by strict mode (no rule defined)"),
            BlockReason::NoRuleForDayType { day_type } => {
                write!(f, "blocked by strict mode (no rule for {})", day_type)
            }
            BlockReason::OutsideAllowedHours { day_type } => {
                write!(f, "outside allowed hours for {}", day_type)
            }
            BlockReason::RangeLimitReached {
                range,
                limit_minutes,
                day_type,
            } => write!(
                f,
                "time limit ({} min) reached for range {} ({})",
                limit_minutes, range, day_type
            ),
            BlockReason::DailyLimitReached {
                host,
                limit_minutes,
                day_type,
            } => write!(
                f,
                "daily limit ({} min) reached for {} on {}",
                limit_minutes, day_type, host
            ),
            BlockReason::GlobalLimitReached {
                limit_minutes,
                day_type,
            } => write!(
                f,
                "global daily limit ({} min) reached for {}",
                limit_minutes, day_type
            ),
        }
    }
}

/// Outcome of a policy decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum Verdict {
    Allow { reason: AllowReason },
    Block { reason: BlockReason },
}

impl Verdict {
    pub fn allow(reason: AllowReason) -> Self {
        Verdict::Allow { reason }
    }

    pub fn block(reason: BlockReason) -> Self {
        Verdict::Block { reason }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Verdict::Block { .. })
    }

    pub fn block_reason(&self) -> Option<&BlockReason> {
        match self {
            Verdict::Block { reason } => Some(reason),
            Verdict::Allow { .. } => None,
        }
    }
}

/// Page load phase reported with a tab update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadState {
    Loading,
    Complete,
}

/// What the bridge knows about one open tab
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub tab_id: TabId,
    #[serde(default)]
    pub window_id: Option<WindowId>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub active: bool,
}

/// Per-host line of the usage summary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageEntry {
    pub host: HostName,
    pub minutes: u64,
    pub seconds: u64,
    pub activations: usize,
    /// Daily limit of the host's schedule for the day's type, if any
    pub daily_limit_minutes: Option<u32>,
}

/// Time resolution of the activation report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportResolution {
    Hour,
    TwoHours,
    FourHours,
    EightHours,
    Day,
}

impl ReportResolution {
    /// Length of the trailing window; `None` covers the whole day
    pub fn window(&self) -> Option<Duration> {
        let hours = match self {
            ReportResolution::Hour => 1,
            ReportResolution::TwoHours => 2,
            ReportResolution::FourHours => 4,
            ReportResolution::EightHours => 8,
            ReportResolution::Day => return None,
        };
        Some(Duration::from_secs(hours * 3600))
    }

    pub fn bucket(&self) -> Duration {
        let minutes = match self {
            ReportResolution::Hour => 10,
            ReportResolution::TwoHours => 15,
            ReportResolution::FourHours => 30,
            ReportResolution::EightHours | ReportResolution::Day => 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

/// Activation counts of one host per bucket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationRow {
    pub host: HostName,
    pub counts: Vec<u32>,
    pub total: u32,
}

/// Host activations bucketed over a window of one day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationReport {
    pub date: NaiveDate,
    pub resolution: ReportResolution,
    pub window_start: DateTime<Local>,
    pub window_end: DateTime<Local>,
    /// Start instant of each bucket
    pub buckets: Vec<DateTime<Local>>,
    /// Sorted by total, descending
    pub rows: Vec<ActivationRow>,
}

/// The host currently accruing dwell time
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingInfo {
    pub host: HostName,
    pub tab_id: TabId,
    pub since: DateTime<Local>,
}

/// Service status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub api_version: u32,
    pub mode: OperationMode,
    pub day: NaiveDate,
    pub day_type: DayType,
    pub rule_count: usize,
    pub temporary_disable: Option<TemporaryDisable>,
    pub browser_focused: bool,
    pub tracking: Option<TrackingInfo>,
}

/// Role for authorization
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Browser bridge: reports tab events, executes blocks, reads state
    Bridge,
    /// Local admin: can also change rules, limits, mode and usage data
    Admin,
    /// Read-only observer
    Observer,
}

impl ClientRole {
    pub fn can_report_browser_events(&self) -> bool {
        matches!(self, ClientRole::Bridge | ClientRole::Admin)
    }

    pub fn can_configure(&self) -> bool {
        matches!(self, ClientRole::Admin)
    }
}

/// Health status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub live: bool,
    pub ready: bool,
    pub store_ok: bool,
    /// Whether a client is subscribed to receive block requests
    pub bridge_connected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_reason_text() {
        assert_eq!(
            BlockReason::NoRuleDefined.to_string(),
            "blocked by strict mode (no rule defined)"
        );
        assert_eq!(
            BlockReason::RangeLimitReached {
                range: "09:00-12:00".into(),
                limit_minutes: 30,
                day_type: DayType::Weekday,
            }
            .to_string(),
            "time limit (30 min) reached for range 09:00-12:00 (weekday)"
        );
        assert_eq!(
            BlockReason::GlobalLimitReached {
                limit_minutes: 120,
                day_type: DayType::Weekend,
            }
            .to_string(),
            "global daily limit (120 min) reached for weekend"
        );
    }

    #[test]
    fn verdict_serialization() {
        let verdict = Verdict::block(BlockReason::DailyLimitReached {
            host: HostName::new("youtube.com"),
            limit_minutes: 30,
            day_type: DayType::Weekday,
        });

        let json = serde_json::to_value(&verdict).unwrap();
        assert_eq!(json["verdict"], "block");
        assert_eq!(json["reason"]["code"], "daily_limit_reached");

        let parsed: Verdict = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, verdict);
        assert!(parsed.is_block());
    }

    #[test]
    fn report_resolutions() {
        assert_eq!(ReportResolution::Hour.window(), Some(Duration::from_secs(3600)));
        assert_eq!(ReportResolution::Hour.bucket(), Duration::from_secs(600));
        assert_eq!(ReportResolution::TwoHours.bucket(), Duration::from_secs(900));
        assert_eq!(ReportResolution::Day.window(), None);
        assert_eq!(ReportResolution::Day.bucket(), Duration::from_secs(3600));
    }

    #[test]
    fn roles() {
        assert!(ClientRole::Bridge.can_report_browser_events());
        assert!(!ClientRole::Bridge.can_configure());
        assert!(ClientRole::Admin.can_configure());
        assert!(!ClientRole::Observer.can_report_browser_events());
    }
}
