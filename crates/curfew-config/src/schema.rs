//! Configuration schema (as parsed from TOML)
//!
//! Every section and field has a default, so a partial file merges with the
//! defaults key by key.

use serde::{Deserialize, Serialize};

use crate::credential::{ALGO_PBKDF2_SHA256, DEFAULT_ITERATIONS};

/// Current supported config version
pub const CURRENT_CONFIG_VERSION: u32 = 1;

/// Plaintext service configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct CurfewConfig {
    /// Config schema version
    pub config_version: u32,

    /// Unlock hotkey, passed through to the presentation process
    pub hotkey: String,

    pub password: PasswordConfig,

    pub api: ApiConfig,

    pub presentation: PresentationConfig,

    pub scheduler: SchedulerConfig,
}

impl Default for CurfewConfig {
    fn default() -> Self {
        Self {
            config_version: CURRENT_CONFIG_VERSION,
            hotkey: "ctrl+alt+u".into(),
            password: PasswordConfig::default(),
            api: ApiConfig::default(),
            presentation: PresentationConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

/// Stored credential. `salt` and `hash` are hex; both absent means no
/// password has been set yet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PasswordConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub salt: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,

    pub iterations: u32,

    pub algo: String,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            salt: None,
            hash: None,
            iterations: DEFAULT_ITERATIONS,
            algo: ALGO_PBKDF2_SHA256.into(),
        }
    }
}

impl PasswordConfig {
    pub fn is_configured(&self) -> bool {
        self.salt.is_some() && self.hash.is_some()
    }
}

/// Loopback control API settings. The server itself is a separate program;
/// these are only persisted here.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 8765,
        }
    }
}

/// How to launch the lock screen
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct PresentationConfig {
    /// Program and arguments of the presentation process
    pub argv: Vec<String>,

    /// Name of the isolated surface it runs on
    pub surface_name: String,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            argv: vec!["curfew-lockscreen".into()],
            surface_name: "curfew-lock".into(),
        }
    }
}

/// Scheduler and supervisor timing
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_millis: u64,

    /// How many times to poll for exit after asking the child to stop
    pub stop_poll_attempts: u32,

    pub stop_poll_millis: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_millis: 1000,
            stop_poll_attempts: 20,
            stop_poll_millis: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_is_all_defaults() {
        let config: CurfewConfig = toml::from_str("").unwrap();
        assert_eq!(config, CurfewConfig::default());
        assert!(!config.password.is_configured());
    }

    #[test]
    fn partial_sections_merge_with_defaults() {
        let toml_str = r#"
            hotkey = "ctrl+alt+l"

            [api]
            port = 9000

            [presentation]
            argv = ["/usr/bin/lockscreen", "--fullscreen"]
        "#;

        let config: CurfewConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.hotkey, "ctrl+alt+l");
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "127.0.0.1");
        assert!(!config.api.enabled);
        assert_eq!(config.presentation.argv.len(), 2);
        assert_eq!(config.presentation.surface_name, "curfew-lock");
        assert_eq!(config.password.iterations, 200_000);
        assert_eq!(config.scheduler.tick_millis, 1000);
    }

    #[test]
    fn unset_credential_is_not_written() {
        let text = toml::to_string(&CurfewConfig::default()).unwrap();
        assert!(!text.contains("salt"));
        assert!(text.contains("iterations = 200000"));
    }
}
