//! Error types for curfew

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CurfewError {
    #[error("Invalid time of day '{0}', expected HH:MM")]
    InvalidTimeOfDay(String),
}
