//! Linux process host implementation

use async_trait::async_trait;
use curfew_host_api::{
    ChildHandle, ExitWatch, HandlePayload, HostCapabilities, HostError, HostResult, ProcessHost,
    SpawnOptions,
};
use curfew_util::SessionId;
use tracing::{info, warn};

use crate::process::{ManagedProcess, exit_status_from};

/// Linux process host
///
/// Each spawned child gets a reaper task that owns the tokio `Child` and
/// reports its exit through the handle's [`ExitWatch`]. Nothing polls.
pub struct LinuxHost {
    capabilities: HostCapabilities,
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            capabilities: HostCapabilities::linux_full(),
        }
    }

    fn managed(handle: &ChildHandle) -> HostResult<ManagedProcess> {
        match handle.payload() {
            HandlePayload::Linux { pid, pgid } => Ok(ManagedProcess {
                pid: *pid,
                pgid: *pgid,
            }),
            _ => Err(HostError::ProcessNotFound),
        }
    }
}

impl Default for LinuxHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessHost for LinuxHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    async fn spawn(
        &self,
        session_id: SessionId,
        argv: &[String],
        options: SpawnOptions,
    ) -> HostResult<ChildHandle> {
        let (proc, mut child) =
            ManagedProcess::spawn(argv, &options.env, options.log_path.as_deref())?;

        let (reporter, watch) = ExitWatch::channel();
        let pid = proc.pid;
        let reaper_session = session_id.clone();
        tokio::spawn(async move {
            let status = match child.wait().await {
                Ok(status) => exit_status_from(status),
                Err(e) => {
                    warn!(pid = pid, error = %e, "Failed to reap child");
                    curfew_host_api::ExitStatus::unknown()
                }
            };
            info!(pid = pid, session_id = %reaper_session, status = ?status, "Child exited");
            reporter.report(status);
        });

        info!(pid = proc.pid, pgid = proc.pgid, session_id = %session_id, "Spawned process");

        Ok(ChildHandle::new(
            session_id,
            HandlePayload::Linux {
                pid: proc.pid,
                pgid: proc.pgid,
            },
            watch,
        ))
    }

    async fn signal_stop(&self, handle: &ChildHandle) -> HostResult<()> {
        // Once reaped the pgid may belong to someone else
        if handle.exit_watch().has_exited() {
            return Ok(());
        }
        Self::managed(handle)?.terminate()
    }

    async fn kill(&self, handle: &ChildHandle) -> HostResult<()> {
        if handle.exit_watch().has_exited() {
            return Ok(());
        }
        Self::managed(handle)?.kill()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_host_api::ExitStatus;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn spawn_and_exit() {
        let host = LinuxHost::new();

        let handle = host
            .spawn(SessionId::new(), &argv(&["true"]), SpawnOptions::default())
            .await
            .unwrap();

        assert!(host.wait_exit(&handle).await.is_success());
        assert!(!host.is_running(&handle));
    }

    #[tokio::test]
    async fn spawn_and_stop() {
        let host = LinuxHost::new();

        let handle = host
            .spawn(SessionId::new(), &argv(&["sleep", "60"]), SpawnOptions::default())
            .await
            .unwrap();
        assert!(host.is_running(&handle));

        host.signal_stop(&handle).await.unwrap();
        assert_eq!(host.wait_exit(&handle).await, ExitStatus::signaled(15));
    }

    #[tokio::test]
    async fn kill_takes_down_whole_group() {
        let host = LinuxHost::new();

        let handle = host
            .spawn(
                SessionId::new(),
                &argv(&["sh", "-c", "sleep 60 & wait"]),
                SpawnOptions::default(),
            )
            .await
            .unwrap();

        host.kill(&handle).await.unwrap();
        assert_eq!(host.wait_exit(&handle).await, ExitStatus::signaled(9));
    }

    #[tokio::test]
    async fn signals_after_exit_are_noops() {
        let host = LinuxHost::new();

        let handle = host
            .spawn(SessionId::new(), &argv(&["true"]), SpawnOptions::default())
            .await
            .unwrap();
        host.wait_exit(&handle).await;

        host.signal_stop(&handle).await.unwrap();
        host.kill(&handle).await.unwrap();
    }

    #[tokio::test]
    async fn mock_handle_rejected() {
        let host = LinuxHost::new();
        let (_reporter, watch) = ExitWatch::channel();
        let handle = ChildHandle::new(SessionId::new(), HandlePayload::Mock { id: 1 }, watch);

        assert!(matches!(
            host.signal_stop(&handle).await,
            Err(HostError::ProcessNotFound)
        ));
    }
}
