//! Policy resolver: allow or block one host at one instant

use chrono::{DateTime, Local};
use siteguard_api::{
    AllowReason, BlockReason, GlobalLimits, OperationMode, RuleSet, TemporaryDisable, Verdict,
};
use siteguard_store::{UsageDay, day_total_seconds};
use siteguard_util::{DayType, HostName, WallClock};

/// Everything a decision depends on
#[derive(Debug, Clone, Copy)]
pub struct PolicyInputs<'a> {
    pub rules: &'a RuleSet,
    pub global_limits: GlobalLimits,
    pub mode: OperationMode,
    pub temporary_disable: Option<TemporaryDisable>,
    pub usage_today: &'a UsageDay,
    /// Unflushed seconds of the burst currently being tracked
    pub in_flight: Option<(&'a HostName, u64)>,
}

impl PolicyInputs<'_> {
    fn in_flight_for(&self, host: &HostName) -> u64 {
        match self.in_flight {
            Some((tracked, seconds)) if tracked == host => seconds,
            _ => 0,
        }
    }

    fn in_flight_total(&self) -> u64 {
        self.in_flight.map_or(0, |(_, seconds)| seconds)
    }
}

/// A verdict plus whether a stale override was seen and must be cleared
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub verdict: Verdict,
    pub override_expired: bool,
}

/// Decide whether `host` is reachable at `now`. The first matching clause wins.
pub fn decide(host: &HostName, now: &DateTime<Local>, inputs: &PolicyInputs<'_>) -> Evaluation {
    let mut override_expired = false;
    if let Some(disable) = &inputs.temporary_disable {
        if disable.is_active(now) {
            return Evaluation {
                verdict: Verdict::allow(AllowReason::TemporaryOverride),
                override_expired,
            };
        }
        override_expired = true;
    }

    Evaluation {
        verdict: evaluate_rules(host, now, inputs),
        override_expired,
    }
}

fn evaluate_rules(host: &HostName, now: &DateTime<Local>, inputs: &PolicyInputs<'_>) -> Verdict {
    let strict = inputs.mode == OperationMode::Strict;

    if inputs.mode == OperationMode::Monitoring {
        return Verdict::allow(AllowReason::MonitoringMode);
    }

    let Some(rule) = inputs.rules.get(host) else {
        return if strict {
            Verdict::block(BlockReason::NoRuleDefined)
        } else {
            Verdict::allow(AllowReason::NoRule)
        };
    };

    if rule.unrestricted {
        return Verdict::allow(AllowReason::Unrestricted);
    }

    let day_type = DayType::of(now);
    let Some(schedule) = rule.schedule_for(day_type) else {
        return if strict {
            Verdict::block(BlockReason::NoRuleForDayType { day_type })
        } else {
            Verdict::allow(AllowReason::NoScheduleForDayType)
        };
    };

    let usage = inputs.usage_today.get(host);
    let in_flight = inputs.in_flight_for(host);

    if schedule.gating_ranges().is_some() {
        let Some(range) = schedule.matching_range(WallClock::of(now)) else {
            return Verdict::block(BlockReason::OutsideAllowedHours { day_type });
        };

        if let Some(limit) = range.limit_minutes {
            let key = range.key();
            let used = usage.map_or(0, |u| u.range(&key).total_seconds()) + in_flight;
            if used / 60 >= u64::from(limit) {
                return Verdict::block(BlockReason::RangeLimitReached {
                    range: key,
                    limit_minutes: limit,
                    day_type,
                });
            }
        }
    }

    if let Some(limit) = schedule.daily_limit_minutes {
        let used = usage.map_or(0, |u| u.total_seconds()) + in_flight;
        if used / 60 >= u64::from(limit) {
            return Verdict::block(BlockReason::DailyLimitReached {
                host: host.clone(),
                limit_minutes: limit,
                day_type,
            });
        }
    }

    if let Some(limit) = inputs.global_limits.for_day(day_type) {
        // Seconds count as fractional minutes here
        let used = day_total_seconds(inputs.usage_today) + inputs.in_flight_total();
        if used >= u64::from(limit) * 60 {
            return Verdict::block(BlockReason::GlobalLimitReached {
                limit_minutes: limit,
                day_type,
            });
        }
    }

    Verdict::allow(AllowReason::WithinLimits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use siteguard_api::{ScheduleRule, SiteRule, TimeRange};
    use siteguard_store::HostUsage;

    fn monday(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 29, h, m, 0).unwrap()
    }

    fn saturday(h: u32, m: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 27, h, m, 0).unwrap()
    }

    fn host(s: &str) -> HostName {
        HostName::new(s)
    }

    fn clock(s: &str) -> WallClock {
        s.parse().unwrap()
    }

    fn usage(minutes: u64, seconds: u64) -> HostUsage {
        HostUsage {
            minutes,
            seconds,
            ..Default::default()
        }
    }

    fn weekday_rule(daily: Option<u32>, ranges: Option<Vec<TimeRange>>) -> SiteRule {
        SiteRule {
            unrestricted: false,
            weekday: Some(ScheduleRule {
                daily_limit_minutes: daily,
                time_ranges: ranges,
            }),
            weekend: None,
        }
    }

    struct Fixture {
        rules: RuleSet,
        usage: UsageDay,
        global_limits: GlobalLimits,
        mode: OperationMode,
        temporary_disable: Option<TemporaryDisable>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                rules: RuleSet::new(),
                usage: UsageDay::new(),
                global_limits: GlobalLimits::default(),
                mode: OperationMode::Permissive,
                temporary_disable: None,
            }
        }

        fn rule(mut self, h: &str, rule: SiteRule) -> Self {
            self.rules.insert(host(h), rule);
            self
        }

        fn used(mut self, h: &str, u: HostUsage) -> Self {
            self.usage.insert(host(h), u);
            self
        }

        fn mode(mut self, mode: OperationMode) -> Self {
            self.mode = mode;
            self
        }

        fn decide(&self, h: &str, now: DateTime<Local>) -> Evaluation {
            let inputs = PolicyInputs {
                rules: &self.rules,
                global_limits: self.global_limits,
                mode: self.mode,
                temporary_disable: self.temporary_disable,
                usage_today: &self.usage,
                in_flight: None,
            };
            decide(&host(h), &now, &inputs)
        }

        fn verdict(&self, h: &str, now: DateTime<Local>) -> Verdict {
            self.decide(h, now).verdict
        }
    }

    #[test]
    fn scenario_daily_limit_reached() {
        let fixture = Fixture::new()
            .rule("youtube.com", weekday_rule(Some(30), None))
            .used("youtube.com", usage(30, 0));

        assert_eq!(
            fixture.verdict("youtube.com", monday(10, 0)),
            Verdict::block(BlockReason::DailyLimitReached {
                host: host("youtube.com"),
                limit_minutes: 30,
                day_type: DayType::Weekday,
            })
        );
    }

    #[test]
    fn scenario_just_under_daily_limit() {
        let fixture = Fixture::new()
            .rule("youtube.com", weekday_rule(Some(30), None))
            .used("youtube.com", usage(29, 59));

        assert_eq!(
            fixture.verdict("youtube.com", monday(10, 0)),
            Verdict::allow(AllowReason::WithinLimits)
        );
    }

    #[test]
    fn scenario_no_rule_depends_on_mode() {
        let strict = Fixture::new().mode(OperationMode::Strict);
        assert_eq!(
            strict.verdict("example.com", monday(10, 0)),
            Verdict::block(BlockReason::NoRuleDefined)
        );

        let permissive = Fixture::new();
        assert_eq!(
            permissive.verdict("example.com", monday(10, 0)),
            Verdict::allow(AllowReason::NoRule)
        );
    }

    #[test]
    fn scenario_global_limit() {
        let mut fixture = Fixture::new()
            .rule("youtube.com", weekday_rule(None, None))
            .used("youtube.com", usage(5, 0))
            .used("reddit.com", usage(100, 0))
            .used("news.com", usage(20, 0));
        fixture.global_limits.weekday = Some(120);

        assert_eq!(
            fixture.verdict("youtube.com", monday(10, 0)),
            Verdict::block(BlockReason::GlobalLimitReached {
                limit_minutes: 120,
                day_type: DayType::Weekday,
            })
        );

        // Global limits only apply past a host's own rule; no weekend limit set
        assert_eq!(
            fixture.verdict("youtube.com", saturday(10, 0)),
            Verdict::allow(AllowReason::NoScheduleForDayType)
        );
    }

    #[test]
    fn global_limit_counts_seconds() {
        let mut fixture = Fixture::new()
            .used("a.com", usage(59, 30))
            .used("b.com", usage(0, 30));
        fixture.global_limits.weekday = Some(60);
        fixture.rules.insert(host("a.com"), weekday_rule(None, None));

        assert!(fixture.verdict("a.com", monday(10, 0)).is_block());
    }

    #[test]
    fn scenario_temporary_disable() {
        let mut fixture = Fixture::new().mode(OperationMode::Strict);
        fixture.temporary_disable = Some(TemporaryDisable {
            end_time: monday(10, 10),
            duration_minutes: 10,
        });

        let during = fixture.decide("example.com", monday(10, 0));
        assert_eq!(during.verdict, Verdict::allow(AllowReason::TemporaryOverride));
        assert!(!during.override_expired);

        let after = fixture.decide("example.com", monday(10, 10));
        assert_eq!(after.verdict, Verdict::block(BlockReason::NoRuleDefined));
        assert!(after.override_expired);
    }

    #[test]
    fn monitoring_never_blocks() {
        let fixture = Fixture::new()
            .mode(OperationMode::Monitoring)
            .rule("youtube.com", weekday_rule(Some(1), None))
            .used("youtube.com", usage(500, 0));

        assert_eq!(
            fixture.verdict("youtube.com", monday(10, 0)),
            Verdict::allow(AllowReason::MonitoringMode)
        );
        assert!(!fixture.verdict("unknown.com", monday(10, 0)).is_block());
    }

    #[test]
    fn strict_blocks_whenever_permissive_does() {
        let rules = [
            ("ranged.com", weekday_rule(None, Some(vec![TimeRange::new(clock("08:00"), clock("09:00"))]))),
            ("limited.com", weekday_rule(Some(10), None)),
            ("weekday-only.com", weekday_rule(None, None)),
            ("free.com", SiteRule::unrestricted()),
        ];
        let mut permissive = Fixture::new();
        for (h, rule) in &rules {
            permissive = permissive.rule(h, rule.clone());
        }
        permissive = permissive.used("limited.com", usage(12, 0));
        let mut strict = Fixture::new().mode(OperationMode::Strict);
        strict.rules = permissive.rules.clone();
        strict.usage = permissive.usage.clone();

        let hosts = ["ranged.com", "limited.com", "weekday-only.com", "free.com", "other.com"];
        for now in [monday(8, 30), monday(12, 0), saturday(8, 30)] {
            for h in hosts {
                if permissive.verdict(h, now).is_block() {
                    assert!(strict.verdict(h, now).is_block(), "{} at {}", h, now);
                }
            }
        }

        // Strict adds the missing-rule cases
        assert!(strict.verdict("other.com", monday(12, 0)).is_block());
        assert_eq!(
            strict.verdict("weekday-only.com", saturday(12, 0)),
            Verdict::block(BlockReason::NoRuleForDayType {
                day_type: DayType::Weekend
            })
        );
    }

    #[test]
    fn time_ranges_gate_access() {
        let fixture = Fixture::new().rule(
            "youtube.com",
            weekday_rule(
                None,
                Some(vec![
                    TimeRange::new(clock("16:00"), clock("20:00")),
                    TimeRange::new(clock("22:00"), clock("06:00")),
                ]),
            ),
        );

        assert!(!fixture.verdict("youtube.com", monday(17, 0)).is_block());
        assert!(!fixture.verdict("youtube.com", monday(23, 30)).is_block());
        assert!(!fixture.verdict("youtube.com", monday(5, 0)).is_block());
        assert_eq!(
            fixture.verdict("youtube.com", monday(12, 0)),
            Verdict::block(BlockReason::OutsideAllowedHours {
                day_type: DayType::Weekday
            })
        );
    }

    #[test]
    fn empty_ranges_mean_all_day() {
        let fixture = Fixture::new().rule("a.com", weekday_rule(None, Some(vec![])));
        assert!(!fixture.verdict("a.com", monday(3, 0)).is_block());
    }

    #[test]
    fn range_limit_checked_before_daily_limit() {
        let mut range_usage = usage(25, 0);
        range_usage.add_range_seconds("16:00-20:00", 20 * 60);

        let fixture = Fixture::new()
            .rule(
                "youtube.com",
                weekday_rule(
                    Some(25),
                    Some(vec![TimeRange::new(clock("16:00"), clock("20:00")).with_limit(20)]),
                ),
            )
            .used("youtube.com", range_usage);

        assert_eq!(
            fixture.verdict("youtube.com", monday(17, 0)),
            Verdict::block(BlockReason::RangeLimitReached {
                range: "16:00-20:00".into(),
                limit_minutes: 20,
                day_type: DayType::Weekday,
            })
        );
    }

    #[test]
    fn in_flight_seconds_count_toward_limits() {
        let fixture = Fixture::new()
            .rule("youtube.com", weekday_rule(Some(30), None))
            .used("youtube.com", usage(29, 30));
        let tracked = host("youtube.com");

        let decide_with = |seconds| {
            let inputs = PolicyInputs {
                rules: &fixture.rules,
                global_limits: fixture.global_limits,
                mode: fixture.mode,
                temporary_disable: None,
                usage_today: &fixture.usage,
                in_flight: Some((&tracked, seconds)),
            };
            decide(&tracked, &monday(10, 0), &inputs).verdict
        };

        assert!(!decide_with(29).is_block());
        assert!(decide_with(30).is_block());
    }

    #[test]
    fn unrestricted_wins_over_strict() {
        let fixture = Fixture::new()
            .mode(OperationMode::Strict)
            .rule("wikipedia.org", SiteRule::unrestricted());
        assert_eq!(
            fixture.verdict("wikipedia.org", saturday(3, 0)),
            Verdict::allow(AllowReason::Unrestricted)
        );
    }
}
