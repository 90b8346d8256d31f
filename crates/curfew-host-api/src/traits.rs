//! Process host traits

use async_trait::async_trait;
use curfew_util::SessionId;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::{ChildHandle, ExitStatus, HostCapabilities};

/// Errors from process host operations
#[derive(Debug, Error)]
pub enum HostError {
    #[error("Spawn failed: {0}")]
    SpawnFailed(String),

    #[error("Stop failed: {0}")]
    StopFailed(String),

    #[error("Process not found")]
    ProcessNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type HostResult<T> = Result<T, HostError>;

/// Stop mode for child termination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMode {
    /// Signal the child, poll `attempts` times `interval` apart, then force
    Graceful { attempts: u32, interval: Duration },
    /// Force immediate termination
    Force,
}

impl Default for StopMode {
    fn default() -> Self {
        Self::Graceful {
            attempts: 20,
            interval: Duration::from_millis(100),
        }
    }
}

/// Options for spawning the presentation process
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Extra environment for the child
    pub env: HashMap<String, String>,

    /// Append child stdout/stderr to this file instead of discarding it
    pub log_path: Option<PathBuf>,
}

/// Process host trait - implemented by platform-specific adapters
///
/// Every spawned child must be placed in its own process group (or the
/// platform equivalent) so that termination signals aimed at it never
/// reach the service.
#[async_trait]
pub trait ProcessHost: Send + Sync {
    /// Get the capabilities of this host adapter
    fn capabilities(&self) -> &HostCapabilities;

    /// Spawn a child process
    async fn spawn(
        &self,
        session_id: SessionId,
        argv: &[String],
        options: SpawnOptions,
    ) -> HostResult<ChildHandle>;

    /// Ask the child to exit (e.g. SIGTERM to its process group)
    async fn signal_stop(&self, handle: &ChildHandle) -> HostResult<()>;

    /// Terminate the child immediately
    async fn kill(&self, handle: &ChildHandle) -> HostResult<()>;

    /// Whether the child is still alive
    fn is_running(&self, handle: &ChildHandle) -> bool {
        !handle.exit_watch().has_exited()
    }

    /// Resolve once the child has terminated, for any reason
    async fn wait_exit(&self, handle: &ChildHandle) -> ExitStatus {
        handle.exit_watch().wait().await
    }
}
