//! Audio control trait interfaces
//!
//! The orchestrator only needs to read and set the mute state of the default
//! output so it can silence the machine while locked and put things back
//! afterwards.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from audio control operations
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Audio control not available: {0}")]
    NotAvailable(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AudioResult<T> = Result<T, AudioError>;

/// Output status of the default sink
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeStatus {
    pub muted: bool,
}

/// Audio capabilities
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AudioCapabilities {
    /// Whether audio control is available
    pub available: bool,
    /// The detected sound backend (e.g., "pipewire", "pulseaudio", "alsa")
    pub backend: Option<String>,
}

/// Audio controller trait - implemented by platform-specific adapters
#[async_trait]
pub trait AudioController: Send + Sync {
    /// Get the capabilities of this controller
    fn capabilities(&self) -> &AudioCapabilities;

    /// Get current output status
    async fn get_status(&self) -> AudioResult<VolumeStatus>;

    /// Set mute state explicitly
    async fn set_mute(&self, muted: bool) -> AudioResult<()>;
}
