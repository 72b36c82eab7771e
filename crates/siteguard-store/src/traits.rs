//! Store trait definitions

use chrono::{DateTime, Local, NaiveDate};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use siteguard_api::{GlobalLimits, OperationMode, RuleSet, TemporaryDisable};
use siteguard_util::{HostName, date_key};
use tracing::warn;

use crate::{AuditEvent, HostUsage, StoreResult, UsageDay, VisitedTabs};

pub const RULES_KEY: &str = "rules";
pub const USAGE_KEY_PREFIX: &str = "usage-";
pub const OPERATION_MODE_KEY: &str = "operationMode";
pub const GLOBAL_LIMITS_KEY: &str = "globalLimits";
pub const TEMPORARY_DISABLE_END_KEY: &str = "temporaryDisableEndTime";
pub const TEMPORARY_DISABLE_DURATION_KEY: &str = "temporaryDisableDuration";
pub const VISITED_TABS_KEY: &str = "visitedTabs";
pub const LAST_ROLLOVER_KEY: &str = "lastRolloverDate";

/// Key of the usage records for `date`
pub fn usage_key(date: NaiveDate) -> String {
    format!("{}{}", USAGE_KEY_PREFIX, date_key(date))
}

/// Date of a `usage-<YYYY-MM-DD>` key
pub fn parse_usage_key(key: &str) -> Option<NaiveDate> {
    let date = key.strip_prefix(USAGE_KEY_PREFIX)?;
    NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()
}

/// Main store trait
///
/// A flat key/value store of JSON values. There are no multi-key
/// transactions; callers serialize their read-modify-write cycles.
pub trait Store: Send + Sync {
    // Key/value records

    /// Get the value stored under `key`
    fn get_value(&self, key: &str) -> StoreResult<Option<Value>>;

    /// Store `value` under `key`, replacing any previous value
    fn set_value(&self, key: &str, value: &Value) -> StoreResult<()>;

    /// Remove keys; returns how many existed
    fn remove(&self, keys: &[String]) -> StoreResult<usize>;

    /// All keys starting with `prefix`, sorted
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    // Audit log

    /// Append an audit event
    fn append_audit(&self, event: AuditEvent) -> StoreResult<()>;

    /// Get recent audit events
    fn get_recent_audits(&self, limit: usize) -> StoreResult<Vec<AuditEvent>>;

    // Health

    /// Check if store is healthy
    fn is_healthy(&self) -> bool;
}

/// Typed accessors for the persisted records
pub trait StoreExt: Store {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get_value(key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        self.set_value(key, &serde_json::to_value(value)?)
    }

    fn contains_key(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get_value(key)?.is_some())
    }

    fn rules(&self) -> StoreResult<RuleSet> {
        Ok(self.get_json(RULES_KEY)?.unwrap_or_default())
    }

    fn set_rules(&self, rules: &RuleSet) -> StoreResult<()> {
        self.set_json(RULES_KEY, rules)
    }

    fn operation_mode(&self) -> StoreResult<OperationMode> {
        Ok(self.get_json(OPERATION_MODE_KEY)?.unwrap_or_default())
    }

    fn set_operation_mode(&self, mode: OperationMode) -> StoreResult<()> {
        self.set_json(OPERATION_MODE_KEY, &mode)
    }

    fn global_limits(&self) -> StoreResult<GlobalLimits> {
        Ok(self.get_json(GLOBAL_LIMITS_KEY)?.unwrap_or_default())
    }

    fn set_global_limits(&self, limits: &GlobalLimits) -> StoreResult<()> {
        self.set_json(GLOBAL_LIMITS_KEY, limits)
    }

    /// The override window, whether or not it has expired
    fn temporary_disable(&self) -> StoreResult<Option<TemporaryDisable>> {
        let Some(end_time) = self.get_json::<DateTime<Local>>(TEMPORARY_DISABLE_END_KEY)? else {
            return Ok(None);
        };
        let duration_minutes = self
            .get_json(TEMPORARY_DISABLE_DURATION_KEY)?
            .unwrap_or_default();
        Ok(Some(TemporaryDisable {
            end_time,
            duration_minutes,
        }))
    }

    fn set_temporary_disable(&self, disable: &TemporaryDisable) -> StoreResult<()> {
        self.set_json(TEMPORARY_DISABLE_END_KEY, &disable.end_time)?;
        self.set_json(TEMPORARY_DISABLE_DURATION_KEY, &disable.duration_minutes)
    }

    fn clear_temporary_disable(&self) -> StoreResult<()> {
        self.remove(&[
            TEMPORARY_DISABLE_END_KEY.to_string(),
            TEMPORARY_DISABLE_DURATION_KEY.to_string(),
        ])?;
        Ok(())
    }

    /// Usage records of one day.
    ///
    /// Host entries that fail to parse are logged and left out; the
    /// remaining hosts are returned as usual.
    fn usage_day(&self, date: NaiveDate) -> StoreResult<UsageDay> {
        let key = usage_key(date);
        let mut day = UsageDay::new();
        for (host, entry) in raw_usage_entries(self, &key)? {
            match serde_json::from_value::<HostUsage>(entry) {
                Ok(usage) => {
                    day.insert(HostName::new(&host), usage);
                }
                Err(e) => {
                    warn!(key = %key, host = %host, error = %e, "Skipping malformed usage record");
                }
            }
        }
        Ok(day)
    }

    /// Replace the usage records of one day.
    ///
    /// Malformed entries already stored for hosts absent from `day` are
    /// written back untouched.
    fn set_usage_day(&self, date: NaiveDate, day: &UsageDay) -> StoreResult<()> {
        let key = usage_key(date);
        let mut entries = Map::new();
        for (host, entry) in raw_usage_entries(self, &key)? {
            if !day.contains_key(&HostName::new(&host))
                && serde_json::from_value::<HostUsage>(entry.clone()).is_err()
            {
                entries.insert(host, entry);
            }
        }
        for (host, usage) in day {
            entries.insert(host.to_string(), serde_json::to_value(usage)?);
        }
        self.set_value(&key, &Value::Object(entries))
    }

    /// Every `usage-<date>` key in the store, oldest first
    fn usage_keys(&self) -> StoreResult<Vec<String>> {
        self.keys_with_prefix(USAGE_KEY_PREFIX)
    }

    fn visited_tabs(&self) -> StoreResult<VisitedTabs> {
        Ok(self.get_json(VISITED_TABS_KEY)?.unwrap_or_default())
    }

    fn set_visited_tabs(&self, visited: &VisitedTabs) -> StoreResult<()> {
        self.set_json(VISITED_TABS_KEY, visited)
    }

    fn last_rollover_date(&self) -> StoreResult<Option<NaiveDate>> {
        self.get_json(LAST_ROLLOVER_KEY)
    }

    fn set_last_rollover_date(&self, date: NaiveDate) -> StoreResult<()> {
        self.set_json(LAST_ROLLOVER_KEY, &date)
    }
}

impl<S: Store + ?Sized> StoreExt for S {}

/// Host entries of a usage record, unparsed
fn raw_usage_entries<S: Store + ?Sized>(store: &S, key: &str) -> StoreResult<Map<String, Value>> {
    match store.get_value(key)? {
        Some(Value::Object(entries)) => Ok(entries),
        Some(_) => {
            warn!(key = %key, "Usage record is not an object, ignoring it");
            Ok(Map::new())
        }
        None => Ok(Map::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_key_roundtrip() {
        let date = NaiveDate::from_ymd_opt(2025, 12, 29).unwrap();
        assert_eq!(usage_key(date), "usage-2025-12-29");
        assert_eq!(parse_usage_key("usage-2025-12-29"), Some(date));
        assert_eq!(parse_usage_key("usage-garbage"), None);
        assert_eq!(parse_usage_key("rules"), None);
    }
}
