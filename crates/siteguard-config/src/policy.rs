//! Validated policy structures

use crate::schema::{RawConfig, RawGlobalLimits, RawServiceConfig};
use crate::validation::convert_site_rule;
use siteguard_api::{GlobalLimits, OperationMode, RuleSet};
use siteguard_util::{HostName, data_dir_without_env, socket_path_without_env};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default reconciliation tick
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(60);

/// Default delay after midnight before the daily rollover
pub const DEFAULT_ROLLOVER_BUFFER: Duration = Duration::from_secs(5);

/// Validated policy ready for use by the core engine
#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Service configuration
    pub service: ServiceConfig,

    /// Install-time global limits
    pub global_limits: GlobalLimits,

    /// Install-time site rules
    pub sites: RuleSet,
}

impl Policy {
    /// Convert from raw config (after validation)
    pub fn from_raw(raw: RawConfig) -> Self {
        let sites = raw
            .sites
            .iter()
            .filter_map(|(host, site)| {
                convert_site_rule(site)
                    .ok()
                    .map(|rule| (HostName::new(host), rule))
            })
            .collect();

        Self {
            service: ServiceConfig::from_raw(raw.service),
            global_limits: raw
                .global_limits
                .map(convert_global_limits)
                .unwrap_or_default(),
            sites,
        }
    }
}

fn convert_global_limits(raw: RawGlobalLimits) -> GlobalLimits {
    GlobalLimits {
        weekday: raw.weekday,
        weekend: raw.weekend,
    }
}

/// What the daily rollover removes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RolloverPolicy {
    /// Remove usage of every earlier day, keep today's
    #[default]
    DropPrevious,
    /// Remove all usage, today's included
    ResetAll,
}

impl fmt::Display for RolloverPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RolloverPolicy::DropPrevious => write!(f, "drop_previous"),
            RolloverPolicy::ResetAll => write!(f, "reset_all"),
        }
    }
}

impl FromStr for RolloverPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop_previous" => Ok(RolloverPolicy::DropPrevious),
            "reset_all" => Ok(RolloverPolicy::ResetAll),
            other => Err(format!("Unknown rollover policy: {}", other)),
        }
    }
}

/// Service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub socket_path: PathBuf,
    pub data_dir: PathBuf,
    /// Seeds `operationMode` when the store has none
    pub mode: OperationMode,
    pub tick_interval: Duration,
    pub rollover: RolloverPolicy,
    pub rollover_buffer: Duration,
    pub block_page_url: Option<String>,
}

impl ServiceConfig {
    fn from_raw(raw: RawServiceConfig) -> Self {
        let defaults = Self::default();
        Self {
            socket_path: raw.socket_path.unwrap_or(defaults.socket_path),
            data_dir: raw.data_dir.unwrap_or(defaults.data_dir),
            mode: raw
                .mode
                .and_then(|m| m.parse().ok())
                .unwrap_or(defaults.mode),
            tick_interval: raw
                .tick_interval_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.tick_interval),
            rollover: raw
                .rollover
                .and_then(|r| r.parse().ok())
                .unwrap_or(defaults.rollover),
            rollover_buffer: raw
                .rollover_buffer_seconds
                .map(Duration::from_secs)
                .unwrap_or(defaults.rollover_buffer),
            block_page_url: raw.block_page_url,
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            socket_path: socket_path_without_env(),
            data_dir: data_dir_without_env(),
            mode: OperationMode::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            rollover: RolloverPolicy::default(),
            rollover_buffer: DEFAULT_ROLLOVER_BUFFER,
            block_page_url: None,
        }
    }
}
