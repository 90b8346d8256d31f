//! Presentation process supervision

use curfew_config::PresentationConfig;
use curfew_host_api::{
    ChildHandle, ExitStatus, HostResult, ProcessHost, SpawnOptions, StopMode, SurfaceHandle,
};
use curfew_util::{LockReason, LockWindow, SessionId};
use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const ENV_SURFACE: &str = "CURFEW_SURFACE";
pub const ENV_SURFACE_INDEX: &str = "CURFEW_SURFACE_INDEX";
pub const ENV_REASON: &str = "CURFEW_REASON";
pub const ENV_HOTKEY: &str = "CURFEW_HOTKEY";
pub const ENV_WINDOW_START: &str = "CURFEW_WINDOW_START";
pub const ENV_WINDOW_END: &str = "CURFEW_WINDOW_END";

/// Launches the lock screen onto the isolated surface and watches it
pub struct Supervisor {
    host: Arc<dyn ProcessHost>,
    argv: Vec<String>,
    hotkey: String,
    stop_mode: StopMode,
    extra_env: HashMap<String, String>,
    log_path: Option<PathBuf>,
}

impl Supervisor {
    pub fn new(host: Arc<dyn ProcessHost>, presentation: &PresentationConfig, hotkey: impl Into<String>) -> Self {
        Self {
            host,
            argv: presentation.argv.clone(),
            hotkey: hotkey.into(),
            stop_mode: StopMode::default(),
            extra_env: HashMap::new(),
            log_path: None,
        }
    }

    pub fn with_stop_mode(mut self, stop_mode: StopMode) -> Self {
        self.stop_mode = stop_mode;
        self
    }

    /// Extra environment for every presentation process (e.g. the config path)
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra_env.insert(key.into(), value.into());
        self
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Full command line for a lock screen on `surface`
    pub fn presentation_argv(
        &self,
        surface: &SurfaceHandle,
        reason: LockReason,
        window: Option<LockWindow>,
    ) -> Vec<String> {
        let mut argv = self.argv.clone();
        argv.extend([
            "--surface-name".to_string(),
            surface.name().to_string(),
            "--reason".to_string(),
            reason.as_str().to_string(),
        ]);
        if let Some(window) = window {
            argv.extend([
                "--window-start".to_string(),
                window.start.to_string(),
                "--window-end".to_string(),
                window.end.to_string(),
            ]);
        }
        argv
    }

    fn presentation_env(
        &self,
        surface: &SurfaceHandle,
        reason: LockReason,
        window: Option<LockWindow>,
    ) -> HashMap<String, String> {
        let mut env = self.extra_env.clone();
        env.insert(ENV_SURFACE.into(), surface.name().into());
        env.insert(ENV_SURFACE_INDEX.into(), surface.index().to_string());
        env.insert(ENV_REASON.into(), reason.as_str().into());
        env.insert(ENV_HOTKEY.into(), self.hotkey.clone());
        if let Some(window) = window {
            env.insert(ENV_WINDOW_START.into(), window.start.to_string());
            env.insert(ENV_WINDOW_END.into(), window.end.to_string());
        }
        env
    }

    /// Start the presentation process in its own process group
    pub async fn spawn_presentation(
        &self,
        session_id: SessionId,
        surface: &SurfaceHandle,
        reason: LockReason,
        window: Option<LockWindow>,
    ) -> HostResult<ChildHandle> {
        let argv = self.presentation_argv(surface, reason, window);
        let options = SpawnOptions {
            env: self.presentation_env(surface, reason, window),
            log_path: self.log_path.clone(),
        };

        if !self.host.capabilities().can_group_process_tree {
            warn!("Host cannot isolate the lock screen's process tree; stray children may outlive it");
        }

        let handle = self.host.spawn(session_id, &argv, options).await?;
        info!(
            session_id = %handle.session_id,
            pid = ?handle.payload().pid(),
            surface = %surface.name(),
            reason = %reason,
            "Presentation process started"
        );
        Ok(handle)
    }

    /// Run `on_exit` once the child has terminated, for any reason. Returns
    /// immediately; the wait happens on its own task.
    pub fn watch<F, Fut>(&self, handle: &ChildHandle, on_exit: F) -> JoinHandle<()>
    where
        F: FnOnce(ExitStatus) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let host = self.host.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let status = host.wait_exit(&handle).await;
            debug!(session_id = %handle.session_id, status = ?status, "Presentation process exited");
            on_exit(status).await;
        })
    }

    /// Stop the child: ask politely, poll for a bounded time, then kill.
    /// Never fails; errors are logged.
    pub async fn stop(&self, handle: &ChildHandle) {
        if !self.host.is_running(handle) {
            return;
        }

        // Hosts without a polite stop go straight to kill
        let mode = if self.host.capabilities().can_graceful_stop {
            self.stop_mode
        } else {
            StopMode::Force
        };

        match mode {
            StopMode::Graceful { attempts, interval } => {
                if let Err(e) = self.host.signal_stop(handle).await {
                    warn!(session_id = %handle.session_id, error = %e, "Failed to signal presentation process");
                }
                for _ in 0..attempts {
                    if !self.host.is_running(handle) {
                        debug!(session_id = %handle.session_id, "Presentation process stopped");
                        return;
                    }
                    tokio::time::sleep(interval).await;
                }
                if !self.host.is_running(handle) {
                    return;
                }
                warn!(session_id = %handle.session_id, "Presentation process ignored stop, killing");
            }
            StopMode::Force => {}
        }

        if let Err(e) = self.host.kill(handle).await {
            warn!(session_id = %handle.session_id, error = %e, "Failed to kill presentation process");
        }
    }
}
