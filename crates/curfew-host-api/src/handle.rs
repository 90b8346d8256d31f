//! Child process handle abstraction

use curfew_util::SessionId;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

/// Opaque handle to the supervised presentation process
///
/// Created by the host adapter when the child is spawned. Cloning is cheap;
/// every clone observes the same exit signal.
#[derive(Debug, Clone)]
pub struct ChildHandle {
    /// Lock session this child belongs to
    pub session_id: SessionId,

    /// Platform-specific payload (opaque to core)
    payload: HandlePayload,

    exit: ExitWatch,
}

impl ChildHandle {
    pub fn new(session_id: SessionId, payload: HandlePayload, exit: ExitWatch) -> Self {
        Self {
            session_id,
            payload,
            exit,
        }
    }

    pub fn payload(&self) -> &HandlePayload {
        &self.payload
    }

    pub fn exit_watch(&self) -> &ExitWatch {
        &self.exit
    }
}

/// Platform-specific handle payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum HandlePayload {
    /// Linux: process group ID
    Linux { pid: u32, pgid: u32 },

    /// Mock for testing
    Mock { id: u64 },
}

impl HandlePayload {
    /// Get the process ID if applicable
    pub fn pid(&self) -> Option<u32> {
        match self {
            HandlePayload::Linux { pid, .. } => Some(*pid),
            HandlePayload::Mock { .. } => None,
        }
    }
}

/// Exit status of the presentation process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitStatus {
    /// Exit code if the process exited normally
    pub code: Option<i32>,

    /// Whether the process was signaled
    pub signaled: bool,

    /// Signal number if signaled (Unix)
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success() -> Self {
        Self {
            code: Some(0),
            signaled: false,
            signal: None,
        }
    }

    pub fn with_code(code: i32) -> Self {
        Self {
            code: Some(code),
            signaled: false,
            signal: None,
        }
    }

    pub fn signaled(signal: i32) -> Self {
        Self {
            code: None,
            signaled: true,
            signal: Some(signal),
        }
    }

    /// The exit was observed but its cause could not be determined
    pub fn unknown() -> Self {
        Self {
            code: None,
            signaled: false,
            signal: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Sending half of a child's exit signal. Owned by whatever task reaps the
/// process; the first reported status wins.
#[derive(Debug)]
pub struct ExitReporter {
    tx: watch::Sender<Option<ExitStatus>>,
}

impl ExitReporter {
    /// Record the exit. Later reports are ignored.
    pub fn report(&self, status: ExitStatus) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(status);
                true
            } else {
                false
            }
        });
    }
}

/// Receiving half of a child's exit signal
#[derive(Debug, Clone)]
pub struct ExitWatch {
    rx: watch::Receiver<Option<ExitStatus>>,
}

impl ExitWatch {
    pub fn channel() -> (ExitReporter, ExitWatch) {
        let (tx, rx) = watch::channel(None);
        (ExitReporter { tx }, ExitWatch { rx })
    }

    /// Whether the child has terminated. A reporter that went away without
    /// reporting counts as terminated.
    pub fn has_exited(&self) -> bool {
        self.rx.borrow().is_some() || self.rx.has_changed().is_err()
    }

    /// Resolve once the child has terminated, for any reason
    pub async fn wait(&self) -> ExitStatus {
        let mut rx = self.rx.clone();
        match rx.wait_for(|status| status.is_some()).await {
            Ok(status) => (*status).clone().unwrap_or_else(ExitStatus::unknown),
            Err(_) => ExitStatus::unknown(),
        }
    }
}
