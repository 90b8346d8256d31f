//! Linux audio mute control
//!
//! Auto-detects the sound system and drives its command-line tool:
//! - PipeWire (via `wpctl`)
//! - PulseAudio (via `pactl`)
//! - ALSA (via `amixer`)

use async_trait::async_trait;
use curfew_host_api::{AudioCapabilities, AudioController, AudioError, AudioResult, VolumeStatus};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Detected sound backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoundBackend {
    /// PipeWire with WirePlumber
    PipeWire,
    /// PulseAudio
    PulseAudio,
    /// ALSA (direct)
    Alsa,
}

impl SoundBackend {
    /// Detect the best available sound backend
    pub async fn detect() -> Option<Self> {
        for backend in [Self::PipeWire, Self::PulseAudio, Self::Alsa] {
            if backend.is_available().await {
                info!(backend = backend.name(), "Detected sound backend");
                return Some(backend);
            }
        }

        warn!("No sound backend detected");
        None
    }

    async fn is_available(&self) -> bool {
        let (program, args): (&str, &[&str]) = match self {
            Self::PipeWire => ("wpctl", &["status"]),
            Self::PulseAudio => ("pactl", &["info"]),
            Self::Alsa => ("amixer", &["sget", "Master"]),
        };
        Command::new(program)
            .args(args)
            .output()
            .await
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PipeWire => "pipewire",
            Self::PulseAudio => "pulseaudio",
            Self::Alsa => "alsa",
        }
    }
}

/// Parse `wpctl get-volume` output: `Volume: 0.50` or `Volume: 0.50 [MUTED]`
fn parse_wpctl(stdout: &str) -> VolumeStatus {
    VolumeStatus {
        muted: stdout.contains("[MUTED]"),
    }
}

/// Parse `pactl get-sink-mute` output: `Mute: yes`
fn parse_pactl(mute_out: &str) -> VolumeStatus {
    VolumeStatus {
        muted: mute_out
            .split(':')
            .nth(1)
            .is_some_and(|v| v.trim() == "yes"),
    }
}

/// Parse `amixer sget Master` output, e.g.
/// `Front Left: Playback 65536 [100%] [on]`. The first playback channel wins.
fn parse_amixer(stdout: &str) -> VolumeStatus {
    let muted = stdout
        .lines()
        .find(|l| l.contains("Playback") && (l.contains("[on]") || l.contains("[off]")))
        .is_some_and(|l| l.contains("[off]"));
    VolumeStatus { muted }
}

async fn run(program: &str, args: &[&str]) -> AudioResult<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|e| AudioError::Backend(format!("{}: {}", program, e)))?;

    if !output.status.success() {
        return Err(AudioError::Backend(format!(
            "{} exited with {}",
            program, output.status
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    debug!(program = program, output = %stdout.trim(), "Audio command output");
    Ok(stdout)
}

/// Linux audio controller with auto-detection
pub struct LinuxAudioController {
    capabilities: AudioCapabilities,
    backend: Option<SoundBackend>,
}

impl LinuxAudioController {
    /// Create a new controller, probing for a sound backend
    pub async fn detect() -> Self {
        Self::with_backend(SoundBackend::detect().await)
    }

    pub fn with_backend(backend: Option<SoundBackend>) -> Self {
        Self {
            capabilities: AudioCapabilities {
                available: backend.is_some(),
                backend: backend.map(|b| b.name().to_string()),
            },
            backend,
        }
    }

    fn backend(&self) -> AudioResult<SoundBackend> {
        self.backend
            .ok_or_else(|| AudioError::NotAvailable("No sound backend available".into()))
    }
}

#[async_trait]
impl AudioController for LinuxAudioController {
    fn capabilities(&self) -> &AudioCapabilities {
        &self.capabilities
    }

    async fn get_status(&self) -> AudioResult<VolumeStatus> {
        match self.backend()? {
            SoundBackend::PipeWire => {
                let out = run("wpctl", &["get-volume", "@DEFAULT_AUDIO_SINK@"]).await?;
                Ok(parse_wpctl(&out))
            }
            SoundBackend::PulseAudio => {
                let mute = run("pactl", &["get-sink-mute", "@DEFAULT_SINK@"]).await?;
                Ok(parse_pactl(&mute))
            }
            SoundBackend::Alsa => {
                let out = run("amixer", &["sget", "Master"]).await?;
                Ok(parse_amixer(&out))
            }
        }
    }

    async fn set_mute(&self, muted: bool) -> AudioResult<()> {
        let flag = if muted { "1" } else { "0" };
        match self.backend()? {
            SoundBackend::PipeWire => {
                run("wpctl", &["set-mute", "@DEFAULT_AUDIO_SINK@", flag]).await?;
            }
            SoundBackend::PulseAudio => {
                run("pactl", &["set-sink-mute", "@DEFAULT_SINK@", flag]).await?;
            }
            SoundBackend::Alsa => {
                let state = if muted { "mute" } else { "unmute" };
                run("amixer", &["sset", "Master", state]).await?;
            }
        }
        debug!(muted = muted, "Set mute");
        Ok(())
    }
}
