//! Shared utilities for curfew
//!
//! This crate provides:
//! - ID types (SessionId) and the lock reason
//! - Wall-clock helpers for daily lock windows
//! - Error types
//! - Default paths for config and data directories

mod error;
mod ids;
mod paths;
mod reason;
mod time;

pub use error::*;
pub use ids::*;
pub use paths::*;
pub use reason::*;
pub use time::*;
