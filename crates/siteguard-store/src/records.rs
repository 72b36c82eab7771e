//! Persisted usage records

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use siteguard_util::HostName;
use std::collections::BTreeMap;

/// All host usage records of one calendar day (`usage-<YYYY-MM-DD>`)
pub type UsageDay = BTreeMap<HostName, HostUsage>;

/// Visited URLs per date key (`visitedTabs`), diagnostic only
pub type VisitedTabs = BTreeMap<String, Vec<String>>;

/// Add `secs` to a minutes/seconds pair, keeping `seconds < 60`
fn carry(minutes: &mut u64, seconds: &mut u64, secs: u64) {
    let total = *seconds + secs;
    *minutes += total / 60;
    *seconds = total % 60;
}

/// Time accrued inside one configured range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeUsage {
    #[serde(default)]
    pub minutes: u64,
    #[serde(default)]
    pub seconds: u64,
}

impl RangeUsage {
    pub fn add_seconds(&mut self, secs: u64) {
        carry(&mut self.minutes, &mut self.seconds, secs);
    }

    pub fn total_seconds(&self) -> u64 {
        self.minutes * 60 + self.seconds
    }
}

/// One host's usage on one day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostUsage {
    #[serde(default)]
    pub minutes: u64,

    /// Always below 60
    #[serde(default)]
    pub seconds: u64,

    /// Chronological
    #[serde(default)]
    pub activation_timestamps: Vec<DateTime<Local>>,

    /// Keyed by `HH:MM-HH:MM`
    #[serde(default)]
    pub range_usage: BTreeMap<String, RangeUsage>,
}

impl HostUsage {
    pub fn add_seconds(&mut self, secs: u64) {
        carry(&mut self.minutes, &mut self.seconds, secs);
    }

    pub fn add_range_seconds(&mut self, range_key: &str, secs: u64) {
        self.range_usage
            .entry(range_key.to_string())
            .or_default()
            .add_seconds(secs);
    }

    pub fn record_activation(&mut self, at: DateTime<Local>) {
        self.activation_timestamps.push(at);
    }

    pub fn total_seconds(&self) -> u64 {
        self.minutes * 60 + self.seconds
    }

    /// Usage of one range; zero if nothing accrued yet
    pub fn range(&self, range_key: &str) -> RangeUsage {
        self.range_usage.get(range_key).copied().unwrap_or_default()
    }

    /// Activations within `[start, end)`
    pub fn activations_between(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> impl Iterator<Item = &DateTime<Local>> {
        self.activation_timestamps
            .iter()
            .filter(move |at| **at >= start && **at < end)
    }

    /// Activations within `[start, end]`
    pub fn activations_through(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
    ) -> impl Iterator<Item = &DateTime<Local>> {
        self.activation_timestamps
            .iter()
            .filter(move |at| **at >= start && **at <= end)
    }
}

/// Combined seconds across every host of a day
pub fn day_total_seconds(day: &UsageDay) -> u64 {
    day.values().map(HostUsage::total_seconds).sum()
}
