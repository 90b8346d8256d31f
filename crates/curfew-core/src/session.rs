//! Lock session record and lifecycle outcomes

use chrono::{DateTime, Local};
use curfew_config::{ConfigError, CredentialError};
use curfew_host_api::{ChildHandle, HostError, SurfaceError};
use curfew_store::StoreError;
use curfew_util::{LockReason, LockWindow, SessionId};
use serde::Serialize;
use thiserror::Error;

/// Errors from lock transitions and control actions
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Isolated surface unavailable: {0}")]
    Surface(#[from] SurfaceError),

    #[error("Presentation process could not start: {0}")]
    Spawn(#[from] HostError),

    #[error("Authentication failed")]
    AuthFailed,

    #[error("Invalid credential input: {0}")]
    InvalidCredentialInput(#[from] CredentialError),

    #[error("Invalid setting: {0}")]
    InvalidSetting(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

pub type LockResult<T> = Result<T, LockError>;

/// The active lock. At most one exists at a time and it lives only inside
/// the orchestrator's state gate; everyone else sees a [`LockSnapshot`].
#[derive(Debug)]
pub struct LockSession {
    pub session_id: SessionId,
    pub reason: LockReason,

    /// Window bounds, only for scheduled locks
    pub window: Option<LockWindow>,

    /// Supervised presentation process
    pub child: ChildHandle,

    /// Mute state found before we muted, restored on release. `None` if the
    /// audio state could not be read.
    pub audio_muted_by_us: Option<bool>,

    pub started_at: DateTime<Local>,
}

impl LockSession {
    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot {
            session_id: self.session_id.clone(),
            reason: self.reason,
            window: self.window,
            started_at: self.started_at,
            pid: self.child.payload().pid(),
        }
    }
}

/// Read-only view of a lock session
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LockSnapshot {
    pub session_id: SessionId,
    pub reason: LockReason,
    pub window: Option<LockWindow>,
    pub started_at: DateTime<Local>,
    pub pid: Option<u32>,
}

/// Result of a lock request
#[derive(Debug, Clone)]
pub enum LockDecision {
    /// A new session was engaged
    Engaged(LockSnapshot),
    /// A session was already active; nothing changed
    AlreadyLocked(LockSnapshot),
}

impl LockDecision {
    pub fn snapshot(&self) -> &LockSnapshot {
        match self {
            LockDecision::Engaged(s) | LockDecision::AlreadyLocked(s) => s,
        }
    }

    pub fn is_engaged(&self) -> bool {
        matches!(self, LockDecision::Engaged(_))
    }
}

/// Result of an unlock request
#[derive(Debug, Clone)]
pub enum UnlockDecision {
    Released(LockSnapshot),
    NotLocked,
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_host_api::{ExitWatch, HandlePayload};

    #[test]
    fn snapshot_carries_session_fields() {
        let (_reporter, watch) = ExitWatch::channel();
        let session_id = SessionId::new();
        let window = LockWindow::new("22:00".parse().unwrap(), "07:00".parse().unwrap());
        let session = LockSession {
            session_id: session_id.clone(),
            reason: LockReason::Scheduled,
            window: Some(window),
            child: ChildHandle::new(
                session_id.clone(),
                HandlePayload::Linux { pid: 42, pgid: 42 },
                watch,
            ),
            audio_muted_by_us: Some(false),
            started_at: curfew_util::now(),
        };

        let snap = session.snapshot();
        assert_eq!(snap.session_id, session_id);
        assert_eq!(snap.reason, LockReason::Scheduled);
        assert_eq!(snap.window, Some(window));
        assert_eq!(snap.pid, Some(42));

        let decision = LockDecision::AlreadyLocked(snap);
        assert!(!decision.is_engaged());
    }

    #[test]
    fn surface_error_keeps_os_code() {
        let err: LockError = SurfaceError::os("VT_ACTIVATE", 5).into();
        assert!(matches!(&err, LockError::Surface(e) if e.code() == Some(5)));
    }
}
