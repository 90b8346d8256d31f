//! What a process host can do

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostCapabilities {
    /// Can ask a child to exit before killing it (e.g., SIGTERM)
    pub can_graceful_stop: bool,

    /// Spawns each child in its own process group, so stopping it also
    /// stops anything it started
    pub can_group_process_tree: bool,
}

impl HostCapabilities {
    /// Kill-only host
    pub fn minimal() -> Self {
        Self {
            can_graceful_stop: false,
            can_group_process_tree: false,
        }
    }

    pub fn linux_full() -> Self {
        Self {
            can_graceful_stop: true,
            can_group_process_tree: true,
        }
    }
}

impl Default for HostCapabilities {
    fn default() -> Self {
        Self::minimal()
    }
}
