//! Core events emitted by the engine

use chrono::{DateTime, Local, NaiveDate};
use siteguard_api::{BlockReason, GlobalLimits, OperationMode};
use siteguard_util::{HostName, TabId};

/// Events emitted by the core engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreEvent {
    /// A tab must be redirected to the block page
    BlockTab {
        tab_id: TabId,
        host: HostName,
        url: String,
        reason: BlockReason,
    },

    TemporaryDisableStarted {
        until: DateTime<Local>,
    },

    /// A stale override window was found and cleared
    TemporaryDisableExpired,

    ModeChanged {
        mode: OperationMode,
    },

    RulesChanged {
        host: HostName,
        removed: bool,
    },

    GlobalLimitsChanged {
        limits: GlobalLimits,
    },

    UsageCleared,

    DailyRollover {
        date: NaiveDate,
        removed_keys: Vec<String>,
    },
}
