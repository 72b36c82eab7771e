//! Command types for the siteguardd protocol

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use siteguard_util::{ClientId, HostName};

use crate::{
    API_VERSION, ActivationReport, BrowserEvent, ClientRole, GlobalLimits, HealthStatus,
    OperationMode, ReportResolution, RuleSet, SiteRule, StatusSnapshot, UsageEntry, Verdict,
};

/// Request wrapper with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Request ID for correlation
    pub request_id: u64,
    pub api_version: u32,
    pub command: Command,
}

impl Request {
    pub fn new(request_id: u64, command: Command) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            command,
        }
    }
}

/// Response wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub api_version: u32,
    pub result: ResponseResult,
}

impl Response {
    pub fn success(request_id: u64, payload: ResponsePayload) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Ok(payload),
        }
    }

    pub fn error(request_id: u64, error: ErrorInfo) -> Self {
        Self {
            request_id,
            api_version: API_VERSION,
            result: ResponseResult::Err(error),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseResult {
    Ok(ResponsePayload),
    Err(ErrorInfo),
}

/// Error information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Error codes for the protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    InvalidRequest,
    InvalidRule,
    PermissionDenied,
    StoreError,
    InternalError,
}

/// All possible commands from clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Raw tab/window notification from the browser bridge
    Browser { event: BrowserEvent },

    GetStatus,

    GetRules,

    // Admin commands

    /// Create or replace the rule for a host
    SetRule { host: HostName, rule: SiteRule },

    RemoveRule { host: HostName },

    SetGlobalLimits { limits: GlobalLimits },

    SetMode { mode: OperationMode },

    /// Suspend all blocking for the given number of minutes
    DisableTemporarily { minutes: u32 },

    /// Drop all usage records and the visited-tabs log
    ClearUsage,

    // Reports

    /// Usage summary for a date (default: today)
    GetUsage {
        #[serde(default)]
        date: Option<NaiveDate>,
    },

    GetActivationReport {
        #[serde(default)]
        date: Option<NaiveDate>,
        resolution: ReportResolution,
    },

    /// Preview the verdict for a URL without blocking anything
    CheckUrl { url: String },

    GetHealth,

    /// Subscribe to events (returns immediately, events stream separately)
    SubscribeEvents,

    UnsubscribeEvents,

    Ping,
}

impl Command {
    /// Whether this command changes configuration or usage data
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Command::SetRule { .. }
                | Command::RemoveRule { .. }
                | Command::SetGlobalLimits { .. }
                | Command::SetMode { .. }
                | Command::DisableTemporarily { .. }
                | Command::ClearUsage
        )
    }
}

/// Response payloads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponsePayload {
    /// Browser event accepted; `blocked` counts block requests it caused
    Accepted { blocked: usize },
    Status(StatusSnapshot),
    Rules { rules: RuleSet },
    RuleSaved,
    RuleRemoved { existed: bool },
    GlobalLimitsSet,
    ModeSet,
    TemporarilyDisabled { until: DateTime<Local> },
    UsageCleared,
    Usage { entries: Vec<UsageEntry> },
    ActivationReport(ActivationReport),
    /// `None` when the URL has no evaluable host
    UrlVerdict {
        host: Option<HostName>,
        verdict: Option<Verdict>,
    },
    Health(HealthStatus),
    Subscribed { client_id: ClientId },
    Unsubscribed,
    Pong,
}

/// Client connection info (set by IPC layer)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientInfo {
    pub client_id: ClientId,
    pub role: ClientRole,
    /// Unix UID if available
    pub uid: Option<u32>,
}

impl ClientInfo {
    pub fn new(role: ClientRole) -> Self {
        Self {
            client_id: ClientId::new(),
            role,
            uid: None,
        }
    }

    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }
}
