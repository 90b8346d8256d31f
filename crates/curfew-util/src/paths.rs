//! Default paths for curfew components
//!
//! Paths are user-writable (no root required):
//! - Config: `$XDG_CONFIG_HOME/curfew/config.toml` or `~/.config/curfew/config.toml`
//! - Data: `$XDG_DATA_HOME/curfew` or `~/.local/share/curfew`

use std::path::PathBuf;

/// Environment variable for overriding the config file path
pub const CURFEW_CONFIG_ENV: &str = "CURFEW_CONFIG";

/// Environment variable for overriding the data directory
pub const CURFEW_DATA_DIR_ENV: &str = "CURFEW_DATA_DIR";

/// Application subdirectory name
const APP_DIR: &str = "curfew";

/// Config filename within the config directory
const CONFIG_FILENAME: &str = "config.toml";

/// Encrypted schedule blob within the data directory
pub const SCHEDULE_FILENAME: &str = "schedule.dat";

/// Per-user protection key within the data directory
pub const USER_KEY_FILENAME: &str = "user.key";

/// Audit database within the data directory
pub const AUDIT_DB_FILENAME: &str = "audit.db";

/// Get the default config file path.
///
/// Order of precedence:
/// 1. `$CURFEW_CONFIG` environment variable (if set)
/// 2. `$XDG_CONFIG_HOME/curfew/config.toml` (if XDG_CONFIG_HOME is set)
/// 3. `~/.config/curfew/config.toml` (fallback)
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = std::env::var(CURFEW_CONFIG_ENV) {
        return PathBuf::from(path);
    }

    config_dir_without_env().join(CONFIG_FILENAME)
}

fn config_dir_without_env() -> PathBuf {
    if let Ok(config_home) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(config_home).join(APP_DIR);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".config").join(APP_DIR);
    }

    // Last resort
    PathBuf::from("/tmp").join(APP_DIR).join("config")
}

/// Get the default data directory.
///
/// Order of precedence:
/// 1. `$CURFEW_DATA_DIR` environment variable (if set)
/// 2. `$XDG_DATA_HOME/curfew` (if XDG_DATA_HOME is set)
/// 3. `~/.local/share/curfew` (fallback)
pub fn default_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var(CURFEW_DATA_DIR_ENV) {
        return PathBuf::from(path);
    }

    data_dir_without_env()
}

/// Get the data directory without checking CURFEW_DATA_DIR env var.
pub fn data_dir_without_env() -> PathBuf {
    if let Ok(data_home) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(data_home).join(APP_DIR);
    }

    if let Some(home) = dirs::home_dir() {
        return home.join(".local").join("share").join(APP_DIR);
    }

    PathBuf::from("/tmp").join(APP_DIR).join("data")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_dir_contains_curfew() {
        let path = config_dir_without_env();
        assert!(path.to_string_lossy().contains("curfew"));
    }

    #[test]
    fn data_dir_contains_curfew() {
        let path = data_dir_without_env();
        assert!(path.to_string_lossy().contains("curfew"));
    }
}
