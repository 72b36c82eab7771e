//! Configuration validation

use crate::policy::RolloverPolicy;
use crate::schema::{RawConfig, RawSchedule, RawSiteRule, RawTimeRange};
use siteguard_api::{OperationMode, ScheduleRule, SiteRule, TimeRange};
use siteguard_util::{DayType, HostName, WallClock};
use std::collections::HashSet;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Site '{host}': {message}")]
    SiteError { host: String, message: String },

    #[error("Invalid time format '{value}': {message}")]
    InvalidTimeFormat { value: String, message: String },

    #[error("Site '{host}' ({day_type}): range {range} has zero length")]
    EmptyRange {
        host: String,
        day_type: DayType,
        range: String,
    },

    #[error("Site '{host}' ({day_type}): ranges {first} and {second} overlap")]
    OverlappingRanges {
        host: String,
        day_type: DayType,
        first: String,
        second: String,
    },

    #[error("Global config error: {0}")]
    GlobalError(String),
}

/// Validate a raw configuration
pub fn validate_config(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = validate_service(config);

    // Hosts are normalized, so "YouTube.com" and "youtube.com" collide
    let mut seen_hosts = HashSet::new();
    for (host, site) in &config.sites {
        let normalized = HostName::new(host);
        if !normalized.is_empty() && !seen_hosts.insert(normalized) {
            errors.push(ValidationError::SiteError {
                host: host.clone(),
                message: "duplicate host".into(),
            });
        }

        match convert_site_rule(site) {
            Ok(rule) => errors.extend(validate_site_rule(&HostName::new(host), &rule)),
            Err(time_errors) => {
                if HostName::new(host).is_empty() {
                    errors.push(empty_host_error(host));
                }
                errors.extend(time_errors);
            }
        }
    }

    errors
}

fn validate_service(config: &RawConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let service = &config.service;

    if let Some(mode) = &service.mode
        && let Err(e) = mode.parse::<OperationMode>()
    {
        errors.push(ValidationError::GlobalError(e));
    }

    if let Some(rollover) = &service.rollover
        && let Err(e) = rollover.parse::<RolloverPolicy>()
    {
        errors.push(ValidationError::GlobalError(e));
    }

    if service.tick_interval_seconds == Some(0) {
        errors.push(ValidationError::GlobalError(
            "tick_interval_seconds must be greater than zero".into(),
        ));
    }

    if let Some(block_page) = &service.block_page_url
        && let Err(e) = url::Url::parse(block_page)
    {
        errors.push(ValidationError::GlobalError(format!(
            "Invalid block_page_url '{}': {}",
            block_page, e
        )));
    }

    errors
}

/// Validate a typed site rule.
///
/// Used both for the config file and for rules edited at runtime. A rule is
/// rejected when any of its ranges is zero-length or when two ranges of the
/// same schedule overlap; wrapping ranges are split at midnight for the test.
pub fn validate_site_rule(host: &HostName, rule: &SiteRule) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if host.is_empty() {
        errors.push(empty_host_error(host.as_str()));
    }

    if rule.unrestricted {
        return errors;
    }

    for day_type in [DayType::Weekday, DayType::Weekend] {
        let Some(ranges) = rule
            .schedule_for(day_type)
            .and_then(|schedule| schedule.gating_ranges())
        else {
            continue;
        };

        for range in ranges {
            if range.clock_range().is_empty() {
                errors.push(ValidationError::EmptyRange {
                    host: host.to_string(),
                    day_type,
                    range: range.key(),
                });
            }
        }

        for (i, first) in ranges.iter().enumerate() {
            for second in &ranges[i + 1..] {
                if first.clock_range().overlaps(&second.clock_range()) {
                    errors.push(ValidationError::OverlappingRanges {
                        host: host.to_string(),
                        day_type,
                        first: first.key(),
                        second: second.key(),
                    });
                }
            }
        }
    }

    errors
}

fn empty_host_error(host: &str) -> ValidationError {
    ValidationError::SiteError {
        host: host.to_string(),
        message: "host cannot be empty".into(),
    }
}

/// Convert a raw site rule, collecting every malformed time
pub fn convert_site_rule(raw: &RawSiteRule) -> Result<SiteRule, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let weekday = raw
        .weekday
        .as_ref()
        .map(|s| convert_schedule(s, &mut errors));
    let weekend = raw
        .weekend
        .as_ref()
        .map(|s| convert_schedule(s, &mut errors));

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(SiteRule {
        unrestricted: raw.unrestricted,
        weekday,
        weekend,
    })
}

fn convert_schedule(raw: &RawSchedule, errors: &mut Vec<ValidationError>) -> ScheduleRule {
    let time_ranges = raw.time_ranges.as_ref().map(|ranges| {
        ranges
            .iter()
            .filter_map(|r| convert_time_range(r, errors))
            .collect()
    });

    ScheduleRule {
        daily_limit_minutes: raw.daily_limit_minutes,
        time_ranges,
    }
}

fn convert_time_range(raw: &RawTimeRange, errors: &mut Vec<ValidationError>) -> Option<TimeRange> {
    let start = parse_time(&raw.start).map_err(|message| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: raw.start.clone(),
            message,
        })
    });
    let end = parse_time(&raw.end).map_err(|message| {
        errors.push(ValidationError::InvalidTimeFormat {
            value: raw.end.clone(),
            message,
        })
    });

    let (start, end) = (start.ok()?, end.ok()?);
    Some(TimeRange {
        start_time: start,
        end_time: end,
        limit_minutes: raw.limit_minutes,
    })
}

/// Parse HH:MM time format
pub fn parse_time(s: &str) -> Result<WallClock, String> {
    s.trim().parse()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::RawServiceConfig;
    use std::collections::BTreeMap;

    fn range(start: &str, end: &str) -> RawTimeRange {
        RawTimeRange {
            start: start.into(),
            end: end.into(),
            limit_minutes: None,
        }
    }

    fn config_with_site(host: &str, site: RawSiteRule) -> RawConfig {
        let mut sites = BTreeMap::new();
        sites.insert(host.to_string(), site);
        RawConfig {
            config_version: 1,
            service: RawServiceConfig::default(),
            global_limits: None,
            sites,
        }
    }

    fn weekday_ranges(ranges: Vec<RawTimeRange>) -> RawSiteRule {
        RawSiteRule {
            unrestricted: false,
            weekday: Some(RawSchedule {
                daily_limit_minutes: None,
                time_ranges: Some(ranges),
            }),
            weekend: None,
        }
    }

    #[test]
    fn test_parse_time() {
        assert_eq!(parse_time("14:30"), Ok(WallClock::new(14, 30).unwrap()));
        assert_eq!(parse_time(" 00:00 "), Ok(WallClock::new(0, 0).unwrap()));
        assert!(parse_time("24:00").is_err());
        assert!(parse_time("12:60").is_err());
        assert!(parse_time("invalid").is_err());
    }

    #[test]
    fn valid_site_has_no_errors() {
        let config = config_with_site(
            "youtube.com",
            weekday_ranges(vec![range("08:00", "12:00"), range("22:00", "06:00")]),
        );
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn invalid_times_are_reported() {
        let config = config_with_site("youtube.com", weekday_ranges(vec![range("8am", "25:00")]));
        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::InvalidTimeFormat { .. })));
    }

    #[test]
    fn zero_length_range_is_rejected() {
        let config = config_with_site("youtube.com", weekday_ranges(vec![range("10:00", "10:00")]));
        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::EmptyRange { day_type: DayType::Weekday, .. }]
        ));
    }

    #[test]
    fn overlapping_ranges_are_rejected() {
        let config = config_with_site(
            "youtube.com",
            weekday_ranges(vec![range("22:00", "09:00"), range("08:00", "12:00")]),
        );
        let errors = validate_config(&config);
        assert!(matches!(
            errors.as_slice(),
            [ValidationError::OverlappingRanges { .. }]
        ));
    }

    #[test]
    fn adjacent_ranges_are_fine() {
        let config = config_with_site(
            "youtube.com",
            weekday_ranges(vec![range("08:00", "12:00"), range("12:00", "14:00")]),
        );
        assert!(validate_config(&config).is_empty());
    }

    #[test]
    fn duplicate_and_empty_hosts() {
        let mut config = config_with_site("YouTube.com", RawSiteRule::default());
        config
            .sites
            .insert("youtube.com".into(), RawSiteRule::default());
        config.sites.insert("  ".into(), RawSiteRule::default());

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| e.to_string().contains("duplicate host")));
        assert!(errors.iter().any(|e| e.to_string().contains("host cannot be empty")));
    }

    #[test]
    fn service_settings_are_checked() {
        let mut config = config_with_site("a.com", RawSiteRule::default());
        config.service.mode = Some("lenient".into());
        config.service.rollover = Some("weekly".into());
        config.service.tick_interval_seconds = Some(0);
        config.service.block_page_url = Some("not a url".into());

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 4);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ValidationError::GlobalError(_))));
    }

    #[test]
    fn unrestricted_rule_skips_range_checks() {
        let mut rule = SiteRule::unrestricted();
        rule.weekday = Some(ScheduleRule {
            daily_limit_minutes: None,
            time_ranges: Some(vec![TimeRange::new(
                WallClock::new(9, 0).unwrap(),
                WallClock::new(9, 0).unwrap(),
            )]),
        });
        assert!(validate_site_rule(&HostName::new("a.com"), &rule).is_empty());
    }
}
