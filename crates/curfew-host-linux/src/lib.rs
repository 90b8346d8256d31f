//! Linux host adapters for curfew
//!
//! Provides:
//! - Process spawning with process group isolation
//! - Graceful (SIGTERM) and forceful (SIGKILL) termination
//! - Event-driven exit observation
//! - Virtual terminal surfaces for the lock screen
//! - Per-user secret protection via a private key file
//! - Audio mute with auto-detection of sound systems
//! - Desktop notifications

mod adapter;
mod notify;
mod process;
mod protect;
mod volume;
mod vt;

pub use adapter::*;
pub use notify::*;
pub use process::*;
pub use protect::*;
pub use volume::*;
pub use vt::*;
