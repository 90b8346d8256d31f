//! Virtual terminal surfaces
//!
//! On Linux the isolated surface is a spare virtual terminal. Locking
//! allocates a free VT, switches the console to it and runs the
//! presentation process there. Unlocking switches back to whichever VT was
//! active when the first surface was created.
//!
//! The VT ioctls need access to the console device, which normally means
//! root or membership of the `tty` group.

use curfew_host_api::{SurfaceError, SurfaceHandle, SurfaceManager, SurfaceResult};
use nix::errno::Errno;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing::{debug, info, warn};

mod ioctl {
    use nix::libc::c_int;

    /// `struct vt_stat` from linux/vt.h
    #[repr(C)]
    #[derive(Debug, Default, Clone, Copy)]
    pub struct VtStat {
        pub v_active: u16,
        pub v_signal: u16,
        pub v_state: u16,
    }

    nix::ioctl_read_bad!(vt_openqry, 0x5600, c_int);
    nix::ioctl_read_bad!(vt_getstate, 0x5603, VtStat);
    nix::ioctl_write_int_bad!(vt_activate, 0x5606);
    nix::ioctl_write_int_bad!(vt_waitactive, 0x5607);
    nix::ioctl_write_int_bad!(tiocsctty, nix::libc::TIOCSCTTY);
}

const DEFAULT_CONSOLE_PATHS: &[&str] = &["/dev/tty0", "/dev/console"];

struct VtSurface {
    index: u32,
    /// Held open so the kernel keeps the VT allocated
    tty: File,
}

#[derive(Default)]
struct VtState {
    console: Option<File>,
    default_vt: Option<u16>,
    surfaces: HashMap<String, VtSurface>,
}

/// Surface manager backed by Linux virtual terminals
///
/// Surfaces live for the lifetime of the manager. They are never
/// deallocated while the service runs.
pub struct VtSurfaceManager {
    console_paths: Vec<PathBuf>,
    state: Mutex<VtState>,
}

impl VtSurfaceManager {
    pub fn new() -> Self {
        Self::with_console_paths(DEFAULT_CONSOLE_PATHS.iter().map(PathBuf::from).collect())
    }

    pub fn with_console_paths(console_paths: Vec<PathBuf>) -> Self {
        Self {
            console_paths,
            state: Mutex::new(VtState::default()),
        }
    }

    fn open_console(&self) -> SurfaceResult<File> {
        for path in &self.console_paths {
            match OpenOptions::new().read(true).write(true).open(path) {
                Ok(file) => {
                    debug!(path = %path.display(), "Opened console");
                    return Ok(file);
                }
                Err(e) => debug!(path = %path.display(), error = %e, "Console not usable"),
            }
        }
        Err(SurfaceError::NotAvailable(
            "no accessible console device".into(),
        ))
    }

    fn lock_state(&self) -> SurfaceResult<std::sync::MutexGuard<'_, VtState>> {
        self.state
            .lock()
            .map_err(|_| SurfaceError::NotAvailable("surface state poisoned".into()))
    }
}

impl Default for VtSurfaceManager {
    fn default() -> Self {
        Self::new()
    }
}

fn os_err(op: &'static str, errno: Errno) -> SurfaceError {
    SurfaceError::os(op, errno as i32)
}

fn activate(console: &File, index: u32) -> SurfaceResult<()> {
    let fd = console.as_raw_fd();
    let vt = index as nix::libc::c_int;
    // SAFETY: fd is an open console; both requests take the VT number by value
    unsafe {
        ioctl::vt_activate(fd, vt).map_err(|e| os_err("VT_ACTIVATE", e))?;
        ioctl::vt_waitactive(fd, vt).map_err(|e| os_err("VT_WAITACTIVE", e))?;
    }
    Ok(())
}

impl SurfaceManager for VtSurfaceManager {
    fn create_or_open(&self, name: &str) -> SurfaceResult<SurfaceHandle> {
        let mut state = self.lock_state()?;

        if let Some(surface) = state.surfaces.get(name) {
            return Ok(SurfaceHandle::new(name, surface.index));
        }

        if state.console.is_none() {
            state.console = Some(self.open_console()?);
        }
        let fd = match state.console.as_ref() {
            Some(console) => console.as_raw_fd(),
            None => return Err(SurfaceError::NotAvailable("console closed".into())),
        };

        if state.default_vt.is_none() {
            let mut stat = ioctl::VtStat::default();
            // SAFETY: fd is an open console and stat matches struct vt_stat
            unsafe { ioctl::vt_getstate(fd, &mut stat) }
                .map_err(|e| os_err("VT_GETSTATE", e))?;
            info!(vt = stat.v_active, "Recorded default VT");
            state.default_vt = Some(stat.v_active);
        }

        let mut free: nix::libc::c_int = 0;
        // SAFETY: fd is an open console and free is a valid int
        unsafe { ioctl::vt_openqry(fd, &mut free) }.map_err(|e| os_err("VT_OPENQRY", e))?;
        if free <= 0 {
            return Err(SurfaceError::NotAvailable("no free virtual terminal".into()));
        }
        let index = free as u32;

        let tty_path = format!("/dev/tty{}", index);
        let tty = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&tty_path)
            .map_err(|e| SurfaceError::os("open", e.raw_os_error().unwrap_or(0)))?;

        info!(name = %name, vt = index, "Created surface");
        state
            .surfaces
            .insert(name.to_string(), VtSurface { index, tty });

        Ok(SurfaceHandle::new(name, index))
    }

    fn switch_active(&self, handle: &SurfaceHandle) -> SurfaceResult<()> {
        let state = self.lock_state()?;
        let console = state
            .console
            .as_ref()
            .ok_or_else(|| SurfaceError::NotAvailable("surface was never created".into()))?;

        activate(console, handle.index())?;
        info!(name = %handle.name(), vt = handle.index(), "Switched to surface");
        Ok(())
    }

    fn bind_calling_thread(&self, handle: &SurfaceHandle) -> SurfaceResult<()> {
        let state = self.lock_state()?;
        let owned;
        let tty = match state.surfaces.get(handle.name()) {
            Some(surface) => &surface.tty,
            None => {
                owned = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .open(format!("/dev/tty{}", handle.index()))
                    .map_err(|e| SurfaceError::os("open", e.raw_os_error().unwrap_or(0)))?;
                &owned
            }
        };

        // Only a session leader without a controlling terminal can take one
        // SAFETY: tty is an open terminal; 0 means do not steal
        unsafe { ioctl::tiocsctty(tty.as_raw_fd(), 0) }.map_err(|e| os_err("TIOCSCTTY", e))?;
        debug!(vt = handle.index(), "Bound caller to surface");
        Ok(())
    }

    fn restore_default(&self) {
        let state = match self.lock_state() {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Cannot restore default surface");
                return;
            }
        };

        let (Some(console), Some(default_vt)) = (state.console.as_ref(), state.default_vt) else {
            debug!("No surface switch to undo");
            return;
        };

        match activate(console, default_vt as u32) {
            Ok(()) => info!(vt = default_vt, "Restored default VT"),
            Err(e) => warn!(vt = default_vt, error = %e, "Failed to restore default VT"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_console_is_not_available() {
        let manager =
            VtSurfaceManager::with_console_paths(vec![PathBuf::from("/nonexistent/tty0")]);

        let err = manager.create_or_open("curfew-lock").unwrap_err();
        assert!(matches!(err, SurfaceError::NotAvailable(_)));
        assert_eq!(err.code(), None);
    }

    #[test]
    fn switch_before_create_fails() {
        let manager =
            VtSurfaceManager::with_console_paths(vec![PathBuf::from("/nonexistent/tty0")]);
        let handle = SurfaceHandle::new("curfew-lock", 8);
        assert!(manager.switch_active(&handle).is_err());
    }

    #[test]
    fn restore_without_switch_is_noop() {
        let manager =
            VtSurfaceManager::with_console_paths(vec![PathBuf::from("/nonexistent/tty0")]);
        manager.restore_default();
        manager.restore_default();
    }

    #[test]
    fn vt_stat_layout() {
        assert_eq!(std::mem::size_of::<ioctl::VtStat>(), 6);
    }
}
