//! Audit event types

use chrono::{DateTime, Local, NaiveDate};
use serde::{Deserialize, Serialize};
use siteguard_api::{GlobalLimits, OperationMode};
use siteguard_util::HostName;

/// Types of audit events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Install-time defaults written for keys that were absent
    DefaultsSeeded { keys: Vec<String> },

    /// A tab was redirected to the block page
    TabBlocked { host: HostName, reason: String },

    /// A site rule was created, replaced or removed
    RuleChanged { host: HostName, removed: bool },

    GlobalLimitsChanged { limits: GlobalLimits },

    ModeChanged {
        from: OperationMode,
        to: OperationMode,
    },

    TemporaryDisableActivated {
        minutes: u32,
        until: DateTime<Local>,
    },

    TemporaryDisableExpired,

    /// All usage records were removed on request
    UsageCleared,

    /// Daily rollover ran for `date`
    DailyRollover {
        date: NaiveDate,
        removed_keys: Vec<String>,
    },

    /// Client connected
    ClientConnected {
        client_id: String,
        role: String,
        uid: Option<u32>,
    },

    /// Client disconnected
    ClientDisconnected { client_id: String },
}

/// Full audit event with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique event ID
    pub id: i64,

    /// Event timestamp
    pub timestamp: DateTime<Local>,

    /// Event type and details
    pub event: AuditEventType,
}

impl AuditEvent {
    pub fn new(event: AuditEventType) -> Self {
        Self {
            id: 0, // Will be set by store
            timestamp: siteguard_util::now(),
            event,
        }
    }
}
