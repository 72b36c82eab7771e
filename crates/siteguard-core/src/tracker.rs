//! Session tracker: which host is accruing dwell time right now
//!
//! All browser activity is folded into [`TrackerEvent`]s and dispatched
//! through [`SessionTracker::apply`]. The tracker never writes usage itself;
//! it hands back the seconds to bill as [`Flush`]es.

use chrono::{DateTime, Local};
use siteguard_api::TrackingInfo;
use siteguard_util::{HostName, TabId};
use std::collections::HashMap;
use tracing::debug;

/// In-progress focus of one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTimer {
    pub tab_id: TabId,
    pub since: DateTime<Local>,
    pub running: bool,
}

/// Input to the tracker state machine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerEvent {
    /// A tab got focus. `host` is `None` for pages with nothing to evaluate;
    /// tracking starts only for an eligible host.
    FocusGained {
        tab_id: TabId,
        host: Option<HostName>,
        eligible: bool,
    },

    /// The tab no longer has focus (another tab was activated)
    FocusLost { tab_id: TabId },

    /// Another application took focus
    WindowUnfocused,

    /// A browser window took focus
    WindowFocused,

    TabClosed { tab_id: TabId },

    /// The focused tab started navigating away
    NavigationLoading { tab_id: TabId },

    /// The focused tab finished loading `host`
    NavigationComplete {
        tab_id: TabId,
        host: Option<HostName>,
        eligible: bool,
    },

    /// The host was just blocked; bill its last burst
    Blocked { host: HostName },

    /// Periodic reconciliation
    Tick,
}

/// Seconds to bill to a host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Flush {
    pub host: HostName,
    pub seconds: i64,
}

/// Result of one transition
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TrackerOutcome {
    pub flushes: Vec<Flush>,
    /// Nothing is tracking but this tab has focus; evaluate it and start tracking
    pub self_heal: Option<TabId>,
}

/// Owned registry of session timers.
///
/// At most one timer is running at any time: every transition that starts
/// one pauses all the others first.
#[derive(Debug, Default)]
pub struct SessionTracker {
    timers: HashMap<HostName, SessionTimer>,
    focused_tab: Option<TabId>,
    browser_focused: bool,
}

/// Whole seconds between `since` and `now`, rounded to nearest
fn elapsed_seconds(since: DateTime<Local>, now: DateTime<Local>) -> i64 {
    let millis = (now - since).num_milliseconds();
    if millis <= 0 {
        return 0;
    }
    (millis + 500) / 1000
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// The single state-transition function
    pub fn apply(&mut self, event: TrackerEvent, now: DateTime<Local>) -> TrackerOutcome {
        let mut outcome = TrackerOutcome::default();

        match event {
            TrackerEvent::FocusGained {
                tab_id,
                host,
                eligible,
            } => {
                self.browser_focused = true;
                self.focused_tab = Some(tab_id);
                self.focus(tab_id, host, eligible, now, &mut outcome);
            }

            TrackerEvent::FocusLost { tab_id } => {
                self.pause_where(|_, timer| timer.tab_id == tab_id, now, &mut outcome);
                if self.focused_tab == Some(tab_id) {
                    self.focused_tab = None;
                }
            }

            TrackerEvent::WindowUnfocused => {
                self.browser_focused = false;
                self.pause_where(|_, _| true, now, &mut outcome);
            }

            TrackerEvent::WindowFocused => {
                self.browser_focused = true;
            }

            TrackerEvent::TabClosed { tab_id } => {
                self.pause_where(|_, timer| timer.tab_id == tab_id, now, &mut outcome);
                self.timers.retain(|_, timer| timer.tab_id != tab_id);
                if self.focused_tab == Some(tab_id) {
                    self.focused_tab = None;
                }
            }

            TrackerEvent::NavigationLoading { tab_id } => {
                self.pause_where(|_, timer| timer.tab_id == tab_id, now, &mut outcome);
            }

            TrackerEvent::NavigationComplete {
                tab_id,
                host,
                eligible,
            } => {
                self.focused_tab = Some(tab_id);
                let eligible = eligible && self.browser_focused;
                self.focus(tab_id, host, eligible, now, &mut outcome);
            }

            TrackerEvent::Blocked { host } => {
                self.pause_where(|h, _| *h == host, now, &mut outcome);
            }

            TrackerEvent::Tick => self.tick(now, &mut outcome),
        }

        outcome
    }

    /// Pause every other host, then start or refresh tracking of `host` on `tab_id`
    fn focus(
        &mut self,
        tab_id: TabId,
        host: Option<HostName>,
        eligible: bool,
        now: DateTime<Local>,
        outcome: &mut TrackerOutcome,
    ) {
        let track = host.filter(|_| eligible);
        self.pause_where(|h, _| Some(h) != track.as_ref(), now, outcome);

        let Some(host) = track else {
            return;
        };

        match self.timers.get_mut(&host) {
            Some(timer) if timer.running => {
                // Same host refocused: bill the burst so far, then restart the clock
                let seconds = elapsed_seconds(timer.since, now);
                if seconds > 0 {
                    outcome.flushes.push(Flush {
                        host: host.clone(),
                        seconds,
                    });
                }
                timer.tab_id = tab_id;
                timer.since = now;
            }
            _ => {
                debug!(host = %host, tab_id = %tab_id, "Tracking started");
                self.timers.insert(
                    host,
                    SessionTimer {
                        tab_id,
                        since: now,
                        running: true,
                    },
                );
            }
        }
    }

    fn tick(&mut self, now: DateTime<Local>, outcome: &mut TrackerOutcome) {
        if !self.browser_focused {
            return;
        }
        let Some(focused) = self.focused_tab else {
            return;
        };

        let any_running = self.timers.values().any(|timer| timer.running);
        let focused_timer = self
            .timers
            .iter_mut()
            .find(|(_, timer)| timer.running && timer.tab_id == focused);

        match focused_timer {
            Some((host, timer)) => {
                let seconds = elapsed_seconds(timer.since, now);
                if seconds > 0 {
                    outcome.flushes.push(Flush {
                        host: host.clone(),
                        seconds,
                    });
                    timer.since = now;
                }
            }
            None if !any_running => outcome.self_heal = Some(focused),
            None => {}
        }
    }

    fn pause_where<F>(&mut self, predicate: F, now: DateTime<Local>, outcome: &mut TrackerOutcome)
    where
        F: Fn(&HostName, &SessionTimer) -> bool,
    {
        for (host, timer) in self.timers.iter_mut() {
            if !timer.running || !predicate(host, timer) {
                continue;
            }
            timer.running = false;
            let seconds = elapsed_seconds(timer.since, now);
            debug!(host = %host, seconds, "Tracking paused");
            if seconds > 0 {
                outcome.flushes.push(Flush {
                    host: host.clone(),
                    seconds,
                });
            }
        }
    }

    /// The running timer, if any
    pub fn tracking(&self) -> Option<TrackingInfo> {
        self.timers
            .iter()
            .find(|(_, timer)| timer.running)
            .map(|(host, timer)| TrackingInfo {
                host: host.clone(),
                tab_id: timer.tab_id,
                since: timer.since,
            })
    }

    /// Unflushed seconds of the host's current burst
    pub fn in_flight_seconds(&self, host: &HostName, now: DateTime<Local>) -> i64 {
        self.timers
            .get(host)
            .filter(|timer| timer.running)
            .map(|timer| elapsed_seconds(timer.since, now))
            .unwrap_or(0)
    }

    pub fn timer(&self, host: &HostName) -> Option<&SessionTimer> {
        self.timers.get(host)
    }

    pub fn focused_tab(&self) -> Option<TabId> {
        self.focused_tab
    }

    pub fn browser_focused(&self) -> bool {
        self.browser_focused
    }

    /// Drop every timer without billing (daily rollover)
    pub fn clear(&mut self) {
        self.timers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 12, 29, h, m, s).unwrap()
    }

    fn host(s: &str) -> HostName {
        HostName::new(s)
    }

    fn gain(tab: i64, h: &str) -> TrackerEvent {
        TrackerEvent::FocusGained {
            tab_id: TabId(tab),
            host: Some(host(h)),
            eligible: true,
        }
    }

    fn running_count(tracker: &SessionTracker) -> usize {
        tracker.timers.values().filter(|t| t.running).count()
    }

    #[test]
    fn switching_tabs_flushes_the_previous_host() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(gain(2, "b.com"), at(10, 0, 40));
        assert_eq!(
            outcome.flushes,
            vec![Flush {
                host: host("a.com"),
                seconds: 40
            }]
        );
        assert_eq!(tracker.tracking().unwrap().host, host("b.com"));
        assert!(!tracker.timer(&host("a.com")).unwrap().running);
    }

    #[test]
    fn at_most_one_host_tracks() {
        let mut tracker = SessionTracker::new();
        let events = vec![
            gain(1, "a.com"),
            gain(2, "b.com"),
            TrackerEvent::WindowFocused,
            gain(3, "c.com"),
            gain(1, "a.com"),
            TrackerEvent::NavigationComplete {
                tab_id: TabId(1),
                host: Some(host("d.com")),
                eligible: true,
            },
            gain(2, "b.com"),
            TrackerEvent::Tick,
            gain(2, "b.com"),
        ];

        for (i, event) in events.into_iter().enumerate() {
            tracker.apply(event, at(10, i as u32, 0));
            assert!(running_count(&tracker) <= 1);
        }
        assert_eq!(tracker.tracking().unwrap().host, host("b.com"));
    }

    #[test]
    fn ineligible_focus_stays_idle_and_pauses_others() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(
            TrackerEvent::FocusGained {
                tab_id: TabId(2),
                host: Some(host("wikipedia.org")),
                eligible: false,
            },
            at(10, 1, 0),
        );

        assert_eq!(outcome.flushes.len(), 1);
        assert!(tracker.tracking().is_none());
        assert!(tracker.timer(&host("wikipedia.org")).is_none());
    }

    #[test]
    fn refocus_of_same_host_flushes_then_restarts() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(gain(4, "a.com"), at(10, 0, 30));
        assert_eq!(outcome.flushes[0].seconds, 30);

        let info = tracker.tracking().unwrap();
        assert_eq!(info.tab_id, TabId(4));
        assert_eq!(info.since, at(10, 0, 30));
    }

    #[test]
    fn elapsed_is_rounded_to_nearest_second() {
        let since = at(10, 0, 0);
        assert_eq!(elapsed_seconds(since, since + chrono::Duration::milliseconds(1499)), 1);
        assert_eq!(elapsed_seconds(since, since + chrono::Duration::milliseconds(1500)), 2);
        assert_eq!(elapsed_seconds(since, since + chrono::Duration::milliseconds(400)), 0);
        assert_eq!(elapsed_seconds(since, since - chrono::Duration::seconds(5)), 0);
    }

    #[test]
    fn sub_second_pause_does_not_flush() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(
            TrackerEvent::WindowUnfocused,
            at(10, 0, 0) + chrono::Duration::milliseconds(300),
        );
        assert!(outcome.flushes.is_empty());
        assert!(tracker.tracking().is_none());
    }

    #[test]
    fn window_unfocus_and_refocus() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(TrackerEvent::WindowUnfocused, at(10, 2, 0));
        assert_eq!(outcome.flushes[0].seconds, 120);
        assert!(!tracker.browser_focused());

        // Ticks while unfocused do nothing
        assert_eq!(tracker.apply(TrackerEvent::Tick, at(10, 3, 0)), TrackerOutcome::default());

        tracker.apply(TrackerEvent::WindowFocused, at(10, 4, 0));
        let outcome = tracker.apply(TrackerEvent::Tick, at(10, 5, 0));
        assert_eq!(outcome.self_heal, Some(TabId(1)));
    }

    #[test]
    fn tick_flushes_and_resets_since() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(TrackerEvent::Tick, at(10, 1, 0));
        assert_eq!(outcome.flushes[0].seconds, 60);
        assert_eq!(outcome.self_heal, None);
        assert_eq!(tracker.tracking().unwrap().since, at(10, 1, 0));
        assert_eq!(tracker.in_flight_seconds(&host("a.com"), at(10, 1, 10)), 10);
    }

    #[test]
    fn tab_close_discards_its_timers() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(TrackerEvent::TabClosed { tab_id: TabId(1) }, at(10, 0, 10));
        assert_eq!(outcome.flushes[0].seconds, 10);
        assert!(tracker.timer(&host("a.com")).is_none());
        assert_eq!(tracker.focused_tab(), None);

        // Nothing focused, nothing to heal
        assert_eq!(tracker.apply(TrackerEvent::Tick, at(10, 1, 0)).self_heal, None);
    }

    #[test]
    fn navigation_loading_pauses_the_tab() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(TrackerEvent::NavigationLoading { tab_id: TabId(1) }, at(10, 0, 5));
        assert_eq!(outcome.flushes[0].seconds, 5);
        assert!(tracker.tracking().is_none());

        tracker.apply(
            TrackerEvent::NavigationComplete {
                tab_id: TabId(1),
                host: Some(host("b.com")),
                eligible: true,
            },
            at(10, 0, 6),
        );
        assert_eq!(tracker.tracking().unwrap().host, host("b.com"));
    }

    #[test]
    fn navigation_complete_while_unfocused_does_not_track() {
        let mut tracker = SessionTracker::new();
        tracker.apply(
            TrackerEvent::NavigationComplete {
                tab_id: TabId(1),
                host: Some(host("a.com")),
                eligible: true,
            },
            at(10, 0, 0),
        );
        assert!(tracker.tracking().is_none());
    }

    #[test]
    fn blocked_host_is_paused() {
        let mut tracker = SessionTracker::new();
        tracker.apply(gain(1, "a.com"), at(10, 0, 0));

        let outcome = tracker.apply(TrackerEvent::Blocked { host: host("a.com") }, at(10, 0, 20));
        assert_eq!(outcome.flushes[0].seconds, 20);
        assert!(tracker.tracking().is_none());
        assert_eq!(tracker.in_flight_seconds(&host("a.com"), at(10, 5, 0)), 0);
    }
}
