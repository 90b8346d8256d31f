//! Process management utilities

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::Path;
use std::process::Stdio;
use tokio::process::{Child, Command};
use tracing::debug;

use curfew_host_api::{ExitStatus, HostError, HostResult};

/// Variables passed through from the service environment. Everything else
/// is cleared so the presentation process starts from a known state.
const INHERITED_ENV: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LANG",
    "DISPLAY",
    "WAYLAND_DISPLAY",
    "XDG_RUNTIME_DIR",
    "DBUS_SESSION_BUS_ADDRESS",
];

/// Child process running as leader of its own process group
#[derive(Debug, Clone, Copy)]
pub struct ManagedProcess {
    pub pid: u32,
    pub pgid: u32,
}

impl ManagedProcess {
    /// Spawn a new process in its own session and process group.
    ///
    /// Returns the tokio `Child` separately so the caller can hand it to the
    /// task that reaps it.
    pub fn spawn(
        argv: &[String],
        env: &HashMap<String, String>,
        log_path: Option<&Path>,
    ) -> HostResult<(Self, Child)> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| HostError::SpawnFailed("Empty argv".into()))?;

        let mut cmd = Command::new(program);
        cmd.args(args);

        cmd.env_clear();
        for key in INHERITED_ENV {
            if let Ok(value) = std::env::var(key) {
                cmd.env(key, value);
            }
        }
        cmd.envs(env);

        match log_path {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                cmd.stdout(Stdio::from(file.try_clone()?));
                cmd.stderr(Stdio::from(file));
            }
            None => {
                cmd.stdout(Stdio::null());
                cmd.stderr(Stdio::null());
            }
        }
        cmd.stdin(Stdio::null());

        // SAFETY: setsid is async-signal-safe and touches no parent state
        unsafe {
            cmd.pre_exec(|| {
                nix::unistd::setsid().map_err(std::io::Error::from)?;
                Ok(())
            });
        }

        let child = cmd.spawn().map_err(|e| {
            HostError::SpawnFailed(format!("Failed to spawn {}: {}", program, e))
        })?;

        let pid = child
            .id()
            .ok_or_else(|| HostError::SpawnFailed(format!("{} exited during spawn", program)))?;
        // After setsid, pid == pgid
        let pgid = pid;

        debug!(pid = pid, pgid = pgid, program = %program, "Process spawned");

        Ok((Self { pid, pgid }, child))
    }

    /// Send SIGTERM to the process group
    pub fn terminate(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGTERM)
    }

    /// Send SIGKILL to the process group
    pub fn kill(&self) -> HostResult<()> {
        self.signal_group(Signal::SIGKILL)
    }

    fn signal_group(&self, sig: Signal) -> HostResult<()> {
        // Negative pid addresses the whole group
        let target = Pid::from_raw(-(self.pgid as i32));

        match signal::kill(target, sig) {
            Ok(()) => {
                debug!(pgid = self.pgid, signal = ?sig, "Signalled process group");
                Ok(())
            }
            // Already gone
            Err(nix::errno::Errno::ESRCH) => Ok(()),
            Err(e) => Err(HostError::StopFailed(format!("Failed to send {}: {}", sig, e))),
        }
    }
}

/// Convert a reaped status into the host-neutral form
pub fn exit_status_from(status: std::process::ExitStatus) -> ExitStatus {
    use std::os::unix::process::ExitStatusExt;

    if let Some(code) = status.code() {
        ExitStatus::with_code(code)
    } else if let Some(sig) = status.signal() {
        ExitStatus::signaled(sig)
    } else {
        ExitStatus::unknown()
    }
}
