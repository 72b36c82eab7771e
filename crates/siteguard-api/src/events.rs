//! Browser events (bridge -> siteguardd) and pushed events (siteguardd -> clients)

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use siteguard_util::{HostName, TabId, WindowId};

use crate::{BlockReason, GlobalLimits, LoadState, OperationMode, TabInfo, API_VERSION};

/// Raw tab/window notifications from the browser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BrowserEvent {
    /// A tab became the active tab of its window
    TabActivated { tab_id: TabId, window_id: WindowId },

    /// A tab started or finished loading
    TabUpdated {
        tab_id: TabId,
        #[serde(default)]
        window_id: Option<WindowId>,
        #[serde(default)]
        url: Option<String>,
        active: bool,
        status: LoadState,
    },

    /// A tab was closed
    TabRemoved { tab_id: TabId },

    /// Browser focus moved to a window, or away from the browser (`None`)
    WindowFocusChanged { window_id: Option<WindowId> },

    /// Full list of open tabs, sent by the bridge after connecting
    TabsSnapshot {
        tabs: Vec<TabInfo>,
        #[serde(default)]
        focused_window: Option<WindowId>,
    },
}

/// Event envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub api_version: u32,
    pub timestamp: DateTime<Local>,
    pub payload: EventPayload,
}

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            api_version: API_VERSION,
            timestamp: siteguard_util::now(),
            payload,
        }
    }
}

/// All possible events from the service to clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    /// Redirect a tab to the block page
    BlockTab {
        tab_id: TabId,
        host: HostName,
        url: String,
        reason: BlockReason,
        reason_text: String,
        /// Block page URL carrying the original URL, reason and host
        redirect_url: Option<String>,
    },

    ModeChanged { mode: OperationMode },

    RulesChanged { host: HostName, removed: bool },

    GlobalLimitsChanged { limits: GlobalLimits },

    TemporaryDisableStarted { until: DateTime<Local> },

    TemporaryDisableExpired,

    UsageCleared,

    DailyRollover { date: NaiveDate },

    /// Service is shutting down
    Shutdown,
}
