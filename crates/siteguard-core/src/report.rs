//! Read-only views over the usage ledger

use chrono::{DateTime, Local, NaiveDate};
use siteguard_api::{ActivationReport, ActivationRow, ReportResolution, RuleSet, UsageEntry};
use siteguard_store::UsageDay;
use siteguard_util::{DayType, HostName, start_of_day};
use std::collections::BTreeSet;

/// One line per host with usage on `date` or a rule that can limit it, sorted by host
pub fn usage_summary(rules: &RuleSet, day: &UsageDay, date: NaiveDate) -> Vec<UsageEntry> {
    let day_type = DayType::of_date(date);
    let hosts: BTreeSet<&HostName> = day
        .keys()
        .chain(
            rules
                .iter()
                .filter(|(_, rule)| !rule.unrestricted)
                .map(|(host, _)| host),
        )
        .collect();

    hosts
        .into_iter()
        .map(|host| {
            let usage = day.get(host).cloned().unwrap_or_default();
            UsageEntry {
                host: host.clone(),
                minutes: usage.minutes,
                seconds: usage.seconds,
                activations: usage.activation_timestamps.len(),
                daily_limit_minutes: rules
                    .get(host)
                    .and_then(|rule| rule.schedule_for(day_type))
                    .and_then(|schedule| schedule.daily_limit_minutes),
            }
        })
        .collect()
}

/// Bucket the day's activations over the resolution's window.
///
/// The window ends at `now` for today and at the end of the day otherwise.
/// Returns `None` when the date has no representable local midnight.
pub fn activation_report(
    day: &UsageDay,
    date: NaiveDate,
    resolution: ReportResolution,
    now: DateTime<Local>,
) -> Option<ActivationReport> {
    let window_end = if date == now.date_naive() {
        now
    } else {
        start_of_day(date.succ_opt()?)?
    };
    let window_start = match resolution.window() {
        Some(window) => window_end - chrono::Duration::from_std(window).ok()?,
        None => start_of_day(date)?,
    };
    let step = chrono::Duration::from_std(resolution.bucket()).ok()?;

    let mut buckets = Vec::new();
    let mut cursor = window_start;
    while cursor < window_end {
        buckets.push(cursor);
        cursor += step;
    }

    let mut rows: Vec<ActivationRow> = day
        .iter()
        .map(|(host, usage)| {
            let counts: Vec<u32> = buckets
                .iter()
                .map(|start| {
                    let end = (*start + step).min(window_end);
                    // A window ending now includes activations stamped now
                    if end == now {
                        usage.activations_through(*start, end).count() as u32
                    } else {
                        usage.activations_between(*start, end).count() as u32
                    }
                })
                .collect();
            ActivationRow {
                host: host.clone(),
                total: counts.iter().sum(),
                counts,
            }
        })
        .filter(|row| row.total > 0)
        .collect();
    rows.sort_by(|a, b| b.total.cmp(&a.total).then_with(|| a.host.cmp(&b.host)));

    Some(ActivationReport {
        date,
        resolution,
        window_start,
        window_end,
        buckets,
        rows,
    })
}
