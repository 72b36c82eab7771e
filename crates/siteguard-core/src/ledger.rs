//! Usage ledger: per-day, per-host accounting over the store

use chrono::{DateTime, Local, NaiveDate};
use siteguard_config::RolloverPolicy;
use siteguard_store::{
    HostUsage, Store, StoreExt, StoreResult, UsageDay, VISITED_TABS_KEY, parse_usage_key,
};
use siteguard_util::{DayType, HostName, WallClock, date_key, is_recordable_url};
use std::sync::Arc;
use tracing::debug;

/// Reads and writes `usage-<date>` records.
///
/// Every mutation is a read-modify-write of one day's record. The engine is
/// the only caller, so these never race.
pub struct UsageLedger {
    store: Arc<dyn Store>,
}

impl UsageLedger {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Append `now` to the host's activation timestamps for today
    pub fn record_activation(&self, host: Option<&HostName>, now: DateTime<Local>) -> StoreResult<()> {
        let Some(host) = host else {
            return Ok(());
        };

        let today = now.date_naive();
        let mut day = self.store.usage_day(today)?;
        day.entry(host.clone()).or_default().record_activation(now);
        self.store.set_usage_day(today, &day)?;

        debug!(host = %host, "Activation recorded");
        Ok(())
    }

    /// Bill `seconds` of dwell time to `host` on today's record.
    ///
    /// No-op for `seconds <= 0` and for unrestricted hosts. When today's
    /// schedule has time ranges, the first range containing `now` is billed
    /// the same seconds. Returns whether anything was written.
    pub fn record_time_spent(
        &self,
        host: &HostName,
        seconds: i64,
        now: DateTime<Local>,
    ) -> StoreResult<bool> {
        if seconds <= 0 {
            return Ok(false);
        }
        let seconds = seconds as u64;

        let rules = self.store.rules()?;
        let rule = rules.get(host);
        if rule.is_some_and(|r| r.unrestricted) {
            return Ok(false);
        }

        let range_key = rule
            .and_then(|r| r.schedule_for(DayType::of(&now)))
            .and_then(|schedule| schedule.matching_range(WallClock::of(&now)))
            .map(|range| range.key());

        let today = now.date_naive();
        let mut day = self.store.usage_day(today)?;
        let usage = day.entry(host.clone()).or_default();
        usage.add_seconds(seconds);
        if let Some(key) = &range_key {
            usage.add_range_seconds(key, seconds);
        }
        self.store.set_usage_day(today, &day)?;

        debug!(
            host = %host,
            seconds,
            range = range_key.as_deref().unwrap_or("-"),
            "Time recorded"
        );
        Ok(true)
    }

    /// Append a URL to today's visited-tabs log, skipping consecutive repeats
    pub fn record_visited(&self, url: &str, now: DateTime<Local>) -> StoreResult<bool> {
        if url.is_empty() || !is_recordable_url(url) {
            return Ok(false);
        }

        let mut visited = self.store.visited_tabs()?;
        let today = visited.entry(date_key(now.date_naive())).or_default();
        if today.last().is_some_and(|last| last == url) {
            return Ok(false);
        }
        today.push(url.to_string());
        self.store.set_visited_tabs(&visited)?;
        Ok(true)
    }

    pub fn usage_day(&self, date: NaiveDate) -> StoreResult<UsageDay> {
        self.store.usage_day(date)
    }

    pub fn host_usage(&self, host: &HostName, date: NaiveDate) -> StoreResult<HostUsage> {
        Ok(self.usage_day(date)?.remove(host).unwrap_or_default())
    }

    /// Remove every usage record and the visited-tabs log
    pub fn clear(&self) -> StoreResult<Vec<String>> {
        let mut keys = self.store.usage_keys()?;
        keys.push(VISITED_TABS_KEY.to_string());
        self.store.remove(&keys)?;
        Ok(keys)
    }

    /// Remove the records the daily rollover drops; returns the removed keys
    pub fn rollover(&self, today: NaiveDate, policy: RolloverPolicy) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .store
            .usage_keys()?
            .into_iter()
            .filter(|key| match (policy, parse_usage_key(key)) {
                (RolloverPolicy::ResetAll, _) => true,
                (RolloverPolicy::DropPrevious, Some(date)) => date < today,
                // Unparseable keys are junk
                (RolloverPolicy::DropPrevious, None) => true,
            })
            .collect();
        keys.push(VISITED_TABS_KEY.to_string());

        self.store.remove(&keys)?;
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use siteguard_api::{ScheduleRule, SiteRule, TimeRange};
    use siteguard_store::{SqliteStore, usage_key};

    fn setup() -> (Arc<dyn Store>, UsageLedger) {
        let store: Arc<dyn Store> = Arc::new(SqliteStore::in_memory().unwrap());
        let ledger = UsageLedger::new(store.clone());
        (store, ledger)
    }

    fn monday(hour: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 29, hour, min, 0).unwrap()
    }

    fn host(s: &str) -> HostName {
        HostName::new(s)
    }

    fn clock(s: &str) -> WallClock {
        s.parse().unwrap()
    }

    #[test]
    fn non_positive_seconds_never_mutate() {
        let (store, ledger) = setup();
        let now = monday(10, 0);

        assert!(!ledger.record_time_spent(&host("a.com"), 0, now).unwrap());
        assert!(!ledger.record_time_spent(&host("a.com"), -5, now).unwrap());
        assert!(store.get_value(&usage_key(now.date_naive())).unwrap().is_none());
    }

    #[test]
    fn carry_over_many_flushes() {
        let (_store, ledger) = setup();
        let now = monday(10, 0);
        let flushes = [1, 59, 60, 61, 119, 7, 33, 3600, 2];

        for secs in flushes {
            ledger.record_time_spent(&host("a.com"), secs, now).unwrap();
        }

        let usage = ledger.host_usage(&host("a.com"), now.date_naive()).unwrap();
        let total: i64 = flushes.iter().sum();
        assert_eq!(usage.total_seconds(), total as u64);
        assert!(usage.seconds < 60);
    }

    #[test]
    fn unrestricted_hosts_are_never_billed() {
        let (store, ledger) = setup();
        let mut rules = store.rules().unwrap();
        rules.insert(host("wikipedia.org"), SiteRule::unrestricted());
        store.set_rules(&rules).unwrap();

        let now = monday(10, 0);
        assert!(!ledger.record_time_spent(&host("wikipedia.org"), 30, now).unwrap());
        assert!(ledger.usage_day(now.date_naive()).unwrap().is_empty());
    }

    #[test]
    fn time_in_a_range_is_also_billed_to_the_range() {
        let (store, ledger) = setup();
        let mut rules = store.rules().unwrap();
        rules.insert(
            host("youtube.com"),
            SiteRule {
                unrestricted: false,
                weekday: Some(ScheduleRule {
                    daily_limit_minutes: None,
                    time_ranges: Some(vec![
                        TimeRange::new(clock("08:00"), clock("12:00")),
                        TimeRange::new(clock("22:00"), clock("06:00")),
                    ]),
                }),
                weekend: None,
            },
        );
        store.set_rules(&rules).unwrap();

        ledger.record_time_spent(&host("youtube.com"), 90, monday(9, 0)).unwrap();
        ledger.record_time_spent(&host("youtube.com"), 30, monday(23, 0)).unwrap();
        ledger.record_time_spent(&host("youtube.com"), 10, monday(15, 0)).unwrap();

        let usage = ledger
            .host_usage(&host("youtube.com"), monday(0, 0).date_naive())
            .unwrap();
        assert_eq!(usage.total_seconds(), 130);
        assert_eq!(usage.range("08:00-12:00").total_seconds(), 90);
        assert_eq!(usage.range("22:00-06:00").total_seconds(), 30);
        assert_eq!(usage.range_usage.len(), 2);
    }

    #[test]
    fn activations_are_chronological() {
        let (_store, ledger) = setup();
        ledger.record_activation(Some(&host("a.com")), monday(9, 0)).unwrap();
        ledger.record_activation(Some(&host("a.com")), monday(9, 5)).unwrap();
        ledger.record_activation(None, monday(9, 6)).unwrap();

        let usage = ledger.host_usage(&host("a.com"), monday(0, 0).date_naive()).unwrap();
        assert_eq!(usage.activation_timestamps, vec![monday(9, 0), monday(9, 5)]);
        assert_eq!(usage.total_seconds(), 0);
    }

    #[test]
    fn visited_log_dedupes_consecutive_urls() {
        let (store, ledger) = setup();
        let now = monday(9, 0);

        assert!(ledger.record_visited("https://a.com/", now).unwrap());
        assert!(!ledger.record_visited("https://a.com/", now).unwrap());
        assert!(ledger.record_visited("https://b.com/", now).unwrap());
        assert!(ledger.record_visited("https://a.com/", now).unwrap());
        assert!(!ledger.record_visited("chrome-extension://x/blocked.html", now).unwrap());
        assert!(!ledger.record_visited("", now).unwrap());

        let visited = store.visited_tabs().unwrap();
        assert_eq!(
            visited["2025-12-29"],
            vec!["https://a.com/", "https://b.com/", "https://a.com/"]
        );
    }

    #[test]
    fn rollover_policies() {
        let (store, ledger) = setup();
        let today = monday(0, 0).date_naive();
        let yesterday = today.pred_opt().unwrap();

        let noon_yesterday = Local.with_ymd_and_hms(2025, 12, 28, 12, 0, 0).unwrap();
        for at in [noon_yesterday, monday(12, 0)] {
            ledger.record_time_spent(&host("a.com"), 60, at).unwrap();
        }
        ledger.record_visited("https://a.com/", monday(12, 0)).unwrap();

        let removed = ledger.rollover(today, RolloverPolicy::DropPrevious).unwrap();
        assert_eq!(removed, vec![usage_key(yesterday), VISITED_TABS_KEY.to_string()]);
        assert!(!ledger.usage_day(today).unwrap().is_empty());
        assert!(store.visited_tabs().unwrap().is_empty());

        ledger.rollover(today, RolloverPolicy::ResetAll).unwrap();
        assert!(ledger.usage_day(today).unwrap().is_empty());
    }

    #[test]
    fn clear_removes_everything() {
        let (store, ledger) = setup();
        ledger.record_time_spent(&host("a.com"), 60, monday(10, 0)).unwrap();
        ledger.record_visited("https://a.com/", monday(10, 0)).unwrap();

        ledger.clear().unwrap();
        assert!(store.usage_keys().unwrap().is_empty());
        assert!(store.visited_tabs().unwrap().is_empty());
    }
}
