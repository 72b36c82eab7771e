//! Core policy engine

use chrono::{DateTime, Local, NaiveDate};
use siteguard_api::{
    API_VERSION, ActivationReport, BlockReason, BrowserEvent, GlobalLimits, LoadState,
    OperationMode, ReportResolution, RuleSet, SiteRule, StatusSnapshot, TemporaryDisable,
    UsageEntry, Verdict,
};
use siteguard_config::{Policy, RolloverPolicy, ServiceConfig, ValidationError, validate_site_rule};
use siteguard_host_api::TabQuery;
use siteguard_store::{
    AuditEvent, AuditEventType, GLOBAL_LIMITS_KEY, OPERATION_MODE_KEY, RULES_KEY, Store,
    StoreError, StoreExt, StoreResult, VISITED_TABS_KEY, VisitedTabs,
};
use siteguard_util::{DayType, HostName, TabId, host_from_url};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    CoreEvent, Flush, PolicyInputs, SessionTracker, TrackerEvent, UsageLedger, decide, report,
};

/// Engine errors
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid rule: {errors:?}")]
    InvalidRule { errors: Vec<ValidationError> },

    #[error("Temporary disable needs at least one minute")]
    InvalidDuration,

    #[error("Date out of range")]
    InvalidDate,
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Service settings the engine needs at runtime
#[derive(Debug, Clone, Default)]
pub struct EngineSettings {
    pub rollover: RolloverPolicy,
    /// URLs under this prefix are our own block page and never evaluated
    pub block_page_url: Option<String>,
}

impl EngineSettings {
    pub fn from_service(service: &ServiceConfig) -> Self {
        Self {
            rollover: service.rollover,
            block_page_url: service.block_page_url.clone(),
        }
    }
}

/// Verdict for a host plus whether it may accrue time
#[derive(Debug, Clone)]
struct Decision {
    verdict: Verdict,
    eligible: bool,
}

/// Preview of the verdict for a URL
#[derive(Debug, Clone)]
pub struct UrlCheck {
    /// `None` when the URL has nothing to evaluate
    pub host: Option<HostName>,
    pub verdict: Option<Verdict>,
    pub events: Vec<CoreEvent>,
}

/// The core policy engine.
///
/// Owns the session tracker and is the single writer of the usage ledger.
/// Every entry point takes `now` explicitly.
pub struct CoreEngine {
    store: Arc<dyn Store>,
    ledger: UsageLedger,
    tracker: SessionTracker,
    settings: EngineSettings,
}

impl CoreEngine {
    /// Create a new core engine
    pub fn new(store: Arc<dyn Store>, settings: EngineSettings, now: DateTime<Local>) -> Self {
        // A fresh store has nothing to roll over today
        match store.last_rollover_date() {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) = store.set_last_rollover_date(now.date_naive()) {
                    warn!(error = %e, "Failed to record rollover date");
                }
            }
            Err(e) => warn!(error = %e, "Failed to read rollover date"),
        }

        info!(
            rollover = %settings.rollover,
            block_page = settings.block_page_url.as_deref().unwrap_or("-"),
            "Core engine initialized"
        );

        Self {
            ledger: UsageLedger::new(store.clone()),
            store,
            tracker: SessionTracker::new(),
            settings,
        }
    }

    /// Write install-time defaults for every key the store does not have yet
    pub fn seed_defaults(&self, policy: &Policy) -> EngineResult<Vec<String>> {
        let mut seeded = Vec::new();

        if !self.store.contains_key(RULES_KEY)? {
            self.store.set_rules(&policy.sites)?;
            seeded.push(RULES_KEY.to_string());
        }
        if !self.store.contains_key(OPERATION_MODE_KEY)? {
            self.store.set_operation_mode(policy.service.mode)?;
            seeded.push(OPERATION_MODE_KEY.to_string());
        }
        if !self.store.contains_key(GLOBAL_LIMITS_KEY)? {
            self.store.set_global_limits(&policy.global_limits)?;
            seeded.push(GLOBAL_LIMITS_KEY.to_string());
        }
        if !self.store.contains_key(VISITED_TABS_KEY)? {
            self.store.set_visited_tabs(&VisitedTabs::new())?;
            seeded.push(VISITED_TABS_KEY.to_string());
        }

        if !seeded.is_empty() {
            info!(keys = ?seeded, "Seeded defaults");
            let _ = self.store.append_audit(AuditEvent::new(AuditEventType::DefaultsSeeded {
                keys: seeded.clone(),
            }));
        }

        Ok(seeded)
    }

    /// Translate a raw browser event into tracker transitions and blocks.
    ///
    /// `tabs` must already reflect `event`.
    pub fn handle_browser_event(
        &mut self,
        event: &BrowserEvent,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        match event {
            BrowserEvent::TabActivated { tab_id, .. } => {
                if let Some(previous) = self.tracker.focused_tab()
                    && previous != *tab_id
                {
                    self.transition(TrackerEvent::FocusLost { tab_id: previous }, now);
                }
                self.transition(TrackerEvent::WindowFocused, now);

                let url = tabs.tab(*tab_id).and_then(|tab| tab.url);
                if let Some(url) = &url {
                    self.record_visited(url, now);
                }
                let host = url.as_deref().and_then(|url| self.evaluable_host(url));
                if let Err(e) = self.ledger.record_activation(host.as_ref(), now) {
                    warn!(tab_id = %tab_id, error = %e, "Failed to record activation");
                }

                self.gain_focus(*tab_id, url.as_deref(), now, &mut events);
            }

            BrowserEvent::TabUpdated {
                tab_id,
                url,
                active,
                status,
                ..
            } => {
                let url = url
                    .clone()
                    .or_else(|| tabs.tab(*tab_id).and_then(|tab| tab.url));

                match status {
                    LoadState::Loading => {
                        if *active {
                            self.transition(TrackerEvent::NavigationLoading { tab_id: *tab_id }, now);
                        }
                    }
                    LoadState::Complete => {
                        self.navigation_complete(*tab_id, url.as_deref(), *active, tabs, now, &mut events);
                    }
                }
            }

            BrowserEvent::TabRemoved { tab_id } => {
                self.transition(TrackerEvent::TabClosed { tab_id: *tab_id }, now);
            }

            BrowserEvent::WindowFocusChanged { window_id: None } => {
                self.transition(TrackerEvent::WindowUnfocused, now);
            }

            BrowserEvent::WindowFocusChanged {
                window_id: Some(window),
            } => {
                self.transition(TrackerEvent::WindowFocused, now);

                if let Some(tab) = tabs.active_tab(*window) {
                    let url = tab.url.as_deref();
                    if let Some(host) = url.and_then(|url| self.evaluable_host(url))
                        && let Err(e) = self.ledger.record_activation(Some(&host), now)
                    {
                        warn!(host = %host, error = %e, "Failed to record activation");
                    }
                    self.gain_focus(tab.tab_id, url, now, &mut events);
                }
            }

            BrowserEvent::TabsSnapshot { tabs: snapshot, .. } => {
                debug!(tabs = snapshot.len(), "Tabs snapshot received");
                events.extend(self.reevaluate_all(tabs, now));
            }
        }

        events
    }

    fn navigation_complete(
        &mut self,
        tab_id: TabId,
        url: Option<&str>,
        active: bool,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        if active && let Some(url) = url {
            self.record_visited(url, now);
        }

        let focused = active && tabs.focused_tab().is_some_and(|tab| tab.tab_id == tab_id);
        let host = url.and_then(|url| self.evaluable_host(url));

        let Some((host, url)) = host.zip(url) else {
            if focused {
                self.transition(
                    TrackerEvent::NavigationComplete {
                        tab_id,
                        host: None,
                        eligible: false,
                    },
                    now,
                );
            }
            return;
        };

        match self.evaluate(&host, now, events) {
            Ok(decision) => {
                if let Some(reason) = decision.verdict.block_reason() {
                    self.block(tab_id, &host, url, reason.clone(), now, events);
                } else if focused {
                    self.transition(
                        TrackerEvent::NavigationComplete {
                            tab_id,
                            host: Some(host),
                            eligible: decision.eligible,
                        },
                        now,
                    );
                }
            }
            Err(e) => warn!(tab_id = %tab_id, host = %host, error = %e, "Failed to evaluate tab"),
        }
    }

    /// Focus moved to `tab_id`: block it, or start tracking it when allowed
    fn gain_focus(
        &mut self,
        tab_id: TabId,
        url: Option<&str>,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        let mut tracked = None;
        let mut eligible = false;

        if let Some(url) = url
            && let Some(host) = self.evaluable_host(url)
        {
            match self.evaluate(&host, now, events) {
                Ok(decision) => match decision.verdict.block_reason() {
                    Some(reason) => self.block(tab_id, &host, url, reason.clone(), now, events),
                    None => {
                        eligible = decision.eligible;
                        tracked = Some(host);
                    }
                },
                Err(e) => warn!(tab_id = %tab_id, host = %host, error = %e, "Failed to evaluate tab"),
            }
        }

        self.transition(
            TrackerEvent::FocusGained {
                tab_id,
                host: tracked,
                eligible,
            },
            now,
        );
    }

    /// Reconciliation loop body
    pub fn tick(&mut self, tabs: &dyn TabQuery, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        if self.rollover_due(now) {
            match self.daily_rollover(now) {
                Ok(rollover) => events.extend(rollover),
                Err(e) => warn!(error = %e, "Daily rollover failed"),
            }
        }

        let outcome = self.tracker.apply(TrackerEvent::Tick, now);
        self.bill(outcome.flushes, now);

        if let Some(tab_id) = outcome.self_heal {
            self.self_heal(tab_id, tabs, now, &mut events);
        }

        if let Err(e) = self.expire_stale_override(now, &mut events) {
            warn!(error = %e, "Failed to check temporary disable");
        }

        events.extend(self.reevaluate_all(tabs, now));
        events
    }

    /// Resume tracking of the focused tab after a restart or rollover.
    /// Blocking is left to the re-evaluation that follows.
    fn self_heal(
        &mut self,
        tab_id: TabId,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        let Some(url) = tabs.tab(tab_id).and_then(|tab| tab.url) else {
            return;
        };
        let Some(host) = self.evaluable_host(&url) else {
            return;
        };

        match self.evaluate(&host, now, events) {
            Ok(decision) if decision.eligible && !decision.verdict.is_block() => {
                debug!(tab_id = %tab_id, host = %host, "Resuming tracking");
                self.transition(
                    TrackerEvent::FocusGained {
                        tab_id,
                        host: Some(host),
                        eligible: true,
                    },
                    now,
                );
            }
            Ok(_) => {}
            Err(e) => warn!(tab_id = %tab_id, error = %e, "Failed to resume tracking"),
        }
    }

    fn rollover_due(&self, now: DateTime<Local>) -> bool {
        match self.store.last_rollover_date() {
            Ok(Some(last)) => last < now.date_naive(),
            Ok(None) => true,
            Err(e) => {
                warn!(error = %e, "Failed to read rollover date");
                false
            }
        }
    }

    /// Drop expired usage and clear the timers; a no-op if today already rolled over
    pub fn daily_rollover(&mut self, now: DateTime<Local>) -> EngineResult<Vec<CoreEvent>> {
        let today = now.date_naive();
        if self.store.last_rollover_date()? == Some(today) {
            debug!(date = %today, "Rollover already done");
            return Ok(Vec::new());
        }

        self.tracker.clear();
        let removed_keys = self.ledger.rollover(today, self.settings.rollover)?;
        self.store.set_last_rollover_date(today)?;

        info!(
            date = %today,
            policy = %self.settings.rollover,
            removed = removed_keys.len(),
            "Daily rollover"
        );
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::DailyRollover {
            date: today,
            removed_keys: removed_keys.clone(),
        }));

        Ok(vec![CoreEvent::DailyRollover {
            date: today,
            removed_keys,
        }])
    }

    /// Evaluate every open tab and block the ones that are no longer allowed
    pub fn reevaluate_all(&mut self, tabs: &dyn TabQuery, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();

        for tab in tabs.open_tabs() {
            let Some(url) = tab.url.as_deref() else {
                continue;
            };
            let Some(host) = self.evaluable_host(url) else {
                continue;
            };

            match self.evaluate(&host, now, &mut events) {
                Ok(decision) => {
                    if let Some(reason) = decision.verdict.block_reason() {
                        self.block(tab.tab_id, &host, url, reason.clone(), now, &mut events);
                    }
                }
                Err(e) => {
                    warn!(tab_id = %tab.tab_id, host = %host, error = %e, "Failed to evaluate tab");
                }
            }
        }

        events
    }

    /// Create or replace the rule for `host`
    pub fn set_rule(
        &mut self,
        host: HostName,
        rule: SiteRule,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<Vec<CoreEvent>> {
        let errors = validate_site_rule(&host, &rule);
        if !errors.is_empty() {
            return Err(EngineError::InvalidRule { errors });
        }

        let mut rules = self.store.rules()?;
        rules.insert(host.clone(), rule);
        self.store.set_rules(&rules)?;

        info!(host = %host, "Rule set");
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::RuleChanged {
            host: host.clone(),
            removed: false,
        }));

        let mut events = vec![CoreEvent::RulesChanged {
            host,
            removed: false,
        }];
        events.extend(self.reevaluate_all(tabs, now));
        Ok(events)
    }

    /// Remove the rule for `host`; returns whether one existed
    pub fn remove_rule(
        &mut self,
        host: &HostName,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<(bool, Vec<CoreEvent>)> {
        let mut rules = self.store.rules()?;
        if rules.remove(host).is_none() {
            return Ok((false, Vec::new()));
        }
        self.store.set_rules(&rules)?;

        info!(host = %host, "Rule removed");
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::RuleChanged {
            host: host.clone(),
            removed: true,
        }));

        let mut events = vec![CoreEvent::RulesChanged {
            host: host.clone(),
            removed: true,
        }];
        events.extend(self.reevaluate_all(tabs, now));
        Ok((true, events))
    }

    pub fn set_global_limits(
        &mut self,
        limits: GlobalLimits,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<Vec<CoreEvent>> {
        self.store.set_global_limits(&limits)?;

        info!(weekday = ?limits.weekday, weekend = ?limits.weekend, "Global limits set");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::GlobalLimitsChanged { limits }));

        let mut events = vec![CoreEvent::GlobalLimitsChanged { limits }];
        events.extend(self.reevaluate_all(tabs, now));
        Ok(events)
    }

    pub fn set_mode(
        &mut self,
        mode: OperationMode,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<Vec<CoreEvent>> {
        let from = self.store.operation_mode()?;
        self.store.set_operation_mode(mode)?;

        info!(from = %from, to = %mode, "Operation mode changed");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::ModeChanged { from, to: mode }));

        let mut events = vec![CoreEvent::ModeChanged { mode }];
        events.extend(self.reevaluate_all(tabs, now));
        Ok(events)
    }

    /// Suspend all blocking for `minutes`; returns the end of the window
    pub fn disable_temporarily(
        &mut self,
        minutes: u32,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<(DateTime<Local>, Vec<CoreEvent>)> {
        if minutes == 0 {
            return Err(EngineError::InvalidDuration);
        }

        let until = now + chrono::Duration::minutes(i64::from(minutes));
        self.store.set_temporary_disable(&TemporaryDisable {
            end_time: until,
            duration_minutes: minutes,
        })?;

        info!(minutes, until = %until, "Blocking temporarily disabled");
        let _ = self.store.append_audit(AuditEvent::new(
            AuditEventType::TemporaryDisableActivated { minutes, until },
        ));

        let mut events = vec![CoreEvent::TemporaryDisableStarted { until }];
        events.extend(self.reevaluate_all(tabs, now));
        Ok((until, events))
    }

    /// Remove every usage record. Running timers keep going.
    pub fn clear_usage(
        &mut self,
        tabs: &dyn TabQuery,
        now: DateTime<Local>,
    ) -> EngineResult<Vec<CoreEvent>> {
        let removed = self.ledger.clear()?;

        info!(removed = removed.len(), "Usage cleared");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::UsageCleared));

        let mut events = vec![CoreEvent::UsageCleared];
        events.extend(self.reevaluate_all(tabs, now));
        Ok(events)
    }

    pub fn status(&self, now: DateTime<Local>) -> EngineResult<StatusSnapshot> {
        Ok(StatusSnapshot {
            api_version: API_VERSION,
            mode: self.store.operation_mode()?,
            day: now.date_naive(),
            day_type: DayType::of(&now),
            rule_count: self.store.rules()?.len(),
            temporary_disable: self
                .store
                .temporary_disable()?
                .filter(|disable| disable.is_active(&now)),
            browser_focused: self.tracker.browser_focused(),
            tracking: self.tracker.tracking(),
        })
    }

    pub fn rules(&self) -> EngineResult<RuleSet> {
        Ok(self.store.rules()?)
    }

    /// Verdict for `url` as if a tab navigated there now. Only a stale
    /// override is touched.
    pub fn check_url(&self, url: &str, now: DateTime<Local>) -> EngineResult<UrlCheck> {
        let mut events = Vec::new();
        let host = self.evaluable_host(url);
        let verdict = match &host {
            Some(host) => Some(self.evaluate(host, now, &mut events)?.verdict),
            None => None,
        };

        Ok(UrlCheck {
            host,
            verdict,
            events,
        })
    }

    pub fn usage_summary(&self, date: NaiveDate) -> EngineResult<Vec<UsageEntry>> {
        let rules = self.store.rules()?;
        let day = self.ledger.usage_day(date)?;
        Ok(report::usage_summary(&rules, &day, date))
    }

    pub fn activation_report(
        &self,
        date: NaiveDate,
        resolution: ReportResolution,
        now: DateTime<Local>,
    ) -> EngineResult<ActivationReport> {
        let day = self.ledger.usage_day(date)?;
        report::activation_report(&day, date, resolution, now).ok_or(EngineError::InvalidDate)
    }

    /// Stop every timer and bill what is in flight (shutdown)
    pub fn pause_all(&mut self, now: DateTime<Local>) {
        self.transition(TrackerEvent::WindowUnfocused, now);
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub fn is_store_healthy(&self) -> bool {
        self.store.is_healthy()
    }

    fn evaluable_host(&self, url: &str) -> Option<HostName> {
        if let Some(block_page) = &self.settings.block_page_url
            && url.starts_with(block_page.as_str())
        {
            return None;
        }
        host_from_url(url)
    }

    fn evaluate(
        &self,
        host: &HostName,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) -> StoreResult<Decision> {
        let rules = self.store.rules()?;
        let usage_today = self.ledger.usage_day(now.date_naive())?;
        let tracking = self.tracker.tracking();
        let in_flight = tracking.as_ref().map(|tracking| {
            let seconds = self.tracker.in_flight_seconds(&tracking.host, now).max(0);
            (&tracking.host, seconds as u64)
        });

        let inputs = PolicyInputs {
            rules: &rules,
            global_limits: self.store.global_limits()?,
            mode: self.store.operation_mode()?,
            temporary_disable: self.store.temporary_disable()?,
            usage_today: &usage_today,
            in_flight,
        };
        let evaluation = decide(host, &now, &inputs);

        if evaluation.override_expired {
            self.expire_override(events)?;
        }

        Ok(Decision {
            eligible: !rules.get(host).is_some_and(|rule| rule.unrestricted),
            verdict: evaluation.verdict,
        })
    }

    fn expire_stale_override(&self, now: DateTime<Local>, events: &mut Vec<CoreEvent>) -> StoreResult<()> {
        match self.store.temporary_disable()? {
            Some(disable) if !disable.is_active(&now) => self.expire_override(events),
            _ => Ok(()),
        }
    }

    fn expire_override(&self, events: &mut Vec<CoreEvent>) -> StoreResult<()> {
        self.store.clear_temporary_disable()?;

        info!("Temporary disable expired");
        let _ = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::TemporaryDisableExpired));
        events.push(CoreEvent::TemporaryDisableExpired);
        Ok(())
    }

    fn block(
        &mut self,
        tab_id: TabId,
        host: &HostName,
        url: &str,
        reason: BlockReason,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        self.transition(TrackerEvent::Blocked { host: host.clone() }, now);

        info!(tab_id = %tab_id, host = %host, reason = %reason, "Blocking tab");
        let _ = self.store.append_audit(AuditEvent::new(AuditEventType::TabBlocked {
            host: host.clone(),
            reason: reason.to_string(),
        }));

        events.push(CoreEvent::BlockTab {
            tab_id,
            host: host.clone(),
            url: url.to_string(),
            reason,
        });
    }

    fn record_visited(&self, url: &str, now: DateTime<Local>) {
        if let Err(e) = self.ledger.record_visited(url, now) {
            warn!(error = %e, "Failed to record visited tab");
        }
    }

    fn transition(&mut self, event: TrackerEvent, now: DateTime<Local>) {
        let outcome = self.tracker.apply(event, now);
        self.bill(outcome.flushes, now);
    }

    fn bill(&self, flushes: Vec<Flush>, now: DateTime<Local>) {
        for flush in flushes {
            if let Err(e) = self.ledger.record_time_spent(&flush.host, flush.seconds, now) {
                warn!(host = %flush.host, seconds = flush.seconds, error = %e, "Failed to record time");
            }
        }
    }
}
