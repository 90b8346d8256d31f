//! Host adapter trait interfaces for curfew
//!
//! This crate defines the capability-based interface between the lock
//! orchestrator and platform-specific implementations: isolated session
//! surfaces, supervised child processes, audio mute, per-user secret
//! protection and user notifications. It contains no platform code itself.

mod audio;
mod capabilities;
mod handle;
mod mock;
mod notify;
mod protect;
mod surface;
mod traits;

pub use audio::*;
pub use capabilities::*;
pub use handle::*;
pub use mock::*;
pub use notify::*;
pub use protect::*;
pub use surface::*;
pub use traits::*;
