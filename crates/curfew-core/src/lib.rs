//! Core lock orchestration for curfew
//!
//! This crate is the authoritative owner of the lock lifecycle:
//! - Lock session state machine (lock/unlock, one session at a time)
//! - Presentation process supervision
//! - Daily window scheduling and pre-lock warnings
//! - Password-gated control actions

mod control;
mod engine;
mod events;
mod scheduler;
mod session;
mod supervisor;

pub use control::*;
pub use engine::*;
pub use events::*;
pub use scheduler::*;
pub use session::*;
pub use supervisor::*;
