//! Isolated session surface interfaces
//!
//! A surface is an OS input/display context separate from the normal
//! interactive session (a secondary desktop, a virtual terminal). Switching
//! the active surface is the lock mechanism itself: nothing on the default
//! surface can receive input until it is restored.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from surface operations
#[derive(Debug, Error)]
pub enum SurfaceError {
    #[error("{op} failed with OS error {code}")]
    Os { op: &'static str, code: i32 },

    #[error("Surface not available: {0}")]
    NotAvailable(String),
}

impl SurfaceError {
    pub fn os(op: &'static str, code: i32) -> Self {
        Self::Os { op, code }
    }

    /// The OS error code, when the failure came from the OS
    pub fn code(&self) -> Option<i32> {
        match self {
            SurfaceError::Os { code, .. } => Some(*code),
            SurfaceError::NotAvailable(_) => None,
        }
    }
}

pub type SurfaceResult<T> = Result<T, SurfaceError>;

/// Opaque handle to an isolated surface.
///
/// Handles are process-lifetime: the manager keeps the underlying OS
/// resource open until the process exits and never closes it mid-run, since
/// the presentation process may still be attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SurfaceHandle {
    name: String,
    index: u32,
}

impl SurfaceHandle {
    pub fn new(name: impl Into<String>, index: u32) -> Self {
        Self {
            name: name.into(),
            index,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Platform index of the surface (VT number, desktop slot)
    pub fn index(&self) -> u32 {
        self.index
    }
}

/// Surface manager trait - implemented by platform-specific adapters
pub trait SurfaceManager: Send + Sync {
    /// Create the named surface, or open it if this process already created
    /// it. Idempotent for the lifetime of the process.
    fn create_or_open(&self, name: &str) -> SurfaceResult<SurfaceHandle>;

    /// Make the surface the one receiving user input
    fn switch_active(&self, handle: &SurfaceHandle) -> SurfaceResult<()>;

    /// Attach the calling thread to the surface.
    ///
    /// Caller contract: this must run before the thread creates any
    /// presentation windows. Calling it afterwards is undefined and is not
    /// checked here.
    fn bind_calling_thread(&self, handle: &SurfaceHandle) -> SurfaceResult<()>;

    /// Switch input back to the default surface. Best-effort: failures are
    /// logged and swallowed so they can never block unlock or exit.
    fn restore_default(&self);
}
