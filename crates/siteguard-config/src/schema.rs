//! Raw configuration schema (as parsed from TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Raw configuration as parsed from TOML
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawConfig {
    /// Config schema version
    pub config_version: u32,

    /// Service-level settings
    #[serde(default)]
    pub service: RawServiceConfig,

    /// Install-time global limits
    #[serde(default)]
    pub global_limits: Option<RawGlobalLimits>,

    /// Install-time site rules, keyed by host
    #[serde(default)]
    pub sites: BTreeMap<String, RawSiteRule>,
}

/// Service-level settings
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawServiceConfig {
    /// IPC socket path (default: $XDG_RUNTIME_DIR/siteguard/siteguardd.sock)
    pub socket_path: Option<PathBuf>,

    /// Data directory for the store
    pub data_dir: Option<PathBuf>,

    /// Install-time operation mode: "monitoring", "permissive" or "strict"
    pub mode: Option<String>,

    /// Reconciliation tick interval (default: 60)
    pub tick_interval_seconds: Option<u64>,

    /// "drop_previous" (default) or "reset_all"
    pub rollover: Option<String>,

    /// Delay after local midnight before the daily rollover runs (default: 5)
    pub rollover_buffer_seconds: Option<u64>,

    /// Page blocked tabs are redirected to
    pub block_page_url: Option<String>,
}

/// Global limits in minutes
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawGlobalLimits {
    pub weekday: Option<u32>,
    pub weekend: Option<u32>,
}

/// Raw site rule
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSiteRule {
    /// Never blocked, never billed
    #[serde(default)]
    pub unrestricted: bool,

    pub weekday: Option<RawSchedule>,

    pub weekend: Option<RawSchedule>,
}

/// Schedule for one day type
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawSchedule {
    pub daily_limit_minutes: Option<u32>,

    /// Absent means allowed all day
    pub time_ranges: Option<Vec<RawTimeRange>>,
}

/// Allowed clock window
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RawTimeRange {
    /// Start time (HH:MM format)
    pub start: String,

    /// End time (HH:MM format); earlier than `start` wraps past midnight
    pub end: String,

    pub limit_minutes: Option<u32>,
}
