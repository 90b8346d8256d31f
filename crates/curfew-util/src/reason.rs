//! Why a lock session exists

use serde::{Deserialize, Serialize};
use std::fmt;

/// What engaged the current lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LockReason {
    /// Explicit request (CLI, tray, API)
    Manual,
    /// The daily lock window started
    Scheduled,
}

impl LockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockReason::Manual => "manual",
            LockReason::Scheduled => "schedule",
        }
    }
}

impl fmt::Display for LockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
