//! Events emitted by the scheduler

use curfew_util::{LockWindow, SessionId};

/// What a scheduler tick did
#[derive(Debug, Clone, PartialEq)]
pub enum CoreEvent {
    /// Pre-lock warning issued for this threshold
    Warning { minutes_remaining: u32 },

    /// The window opened and a scheduled lock engaged
    LockEngaged {
        session_id: SessionId,
        window: LockWindow,
    },

    /// The window opened but the lock could not engage
    LockFailed { error: String },

    /// The window closed and the scheduled lock was released
    LockReleased { session_id: SessionId },

    /// Stored window bounds do not parse; the tick was skipped
    ScheduleUnusable { start: String, end: String },
}
