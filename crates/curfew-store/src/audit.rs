//! Audit event types

use chrono::{DateTime, Local};
use curfew_util::{LockReason, LockWindow, SessionId};
use serde::{Deserialize, Serialize};

/// How a lock session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReleasePath {
    /// The presentation process exited (user authenticated, crash or kill)
    ChildExit,
    /// An authenticated unlock request
    Admin,
    /// The scheduler saw the lock window end
    WindowEnded,
    /// The service is shutting down
    Shutdown,
}

impl ReleasePath {
    /// Whether a person proved the password to get out. Releasing a
    /// scheduled lock this way turns the schedule off.
    pub fn is_escape(&self) -> bool {
        matches!(self, ReleasePath::ChildExit | ReleasePath::Admin)
    }
}

/// Privileged actions that require the password
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Lock,
    Unlock,
    SetSchedule,
    SetPassword,
    SetApiConfig,
}

/// Types of audit events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuditEventType {
    /// Service started
    ServiceStarted,

    /// Service stopped
    ServiceStopped,

    /// Lock engaged
    LockEngaged {
        session_id: SessionId,
        reason: LockReason,
        window: Option<LockWindow>,
    },

    /// Lock could not be engaged
    LockFailed { reason: LockReason, error: String },

    /// Lock released
    LockReleased {
        session_id: SessionId,
        reason: LockReason,
        path: ReleasePath,
    },

    /// Schedule turned off because a scheduled lock was escaped
    ScheduleDisabledAfterEscape { session_id: SessionId },

    /// Pre-lock warning shown
    WarningIssued { minutes_remaining: u32 },

    /// Password check failed for a privileged action
    AuthFailed { action: ControlAction },

    /// Schedule changed
    ScheduleChanged {
        enabled: bool,
        window: LockWindow,
    },

    /// Password set or rotated
    PasswordChanged,

    /// API settings changed
    ApiConfigChanged { enabled: bool, host: String, port: u16 },
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
            // Set by the store
            id: 0,
            timestamp: curfew_util::now(),
            event,
        }
    }
}
