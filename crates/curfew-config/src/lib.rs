//! Configuration and credentials for curfew
//!
//! Supports TOML configuration with:
//! - Versioned schema with per-key defaults
//! - Salted PBKDF2 password credential
//! - Loopback API settings
//! - Validation with clear error messages

mod credential;
mod schema;
mod validation;

pub use credential::*;
pub use schema::*;
pub use validation::*;

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    SerializeError(#[from] toml::ser::Error),

    #[error("Validation failed: {errors:?}")]
    ValidationFailed { errors: Vec<ValidationError> },

    #[error("Unsupported config version: {0}")]
    UnsupportedVersion(u32),

    #[error("Refusing to overwrite {0}: it is not valid TOML, fix or remove it first")]
    WouldOverwriteUnparseable(PathBuf),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Load and validate configuration from a TOML file
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<CurfewConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string
pub fn parse_config(content: &str) -> ConfigResult<CurfewConfig> {
    let config: CurfewConfig = toml::from_str(content)?;

    if config.config_version != CURRENT_CONFIG_VERSION {
        return Err(ConfigError::UnsupportedVersion(config.config_version));
    }

    let errors = validate_config(&config);
    if !errors.is_empty() {
        return Err(ConfigError::ValidationFailed { errors });
    }

    Ok(config)
}

/// Load the service configuration, creating it on first run.
///
/// - absent file: defaults are written and returned
/// - unreadable TOML: defaults are returned and the file is left alone, so
///   a hand-edit typo is not clobbered. `save_config` refuses to replace it
///   until it is fixed.
/// - present but invalid: the validation errors are returned
pub fn load_or_init_config(path: impl AsRef<Path>) -> ConfigResult<CurfewConfig> {
    let path = path.as_ref();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            let config = CurfewConfig::default();
            save_config(path, &config)?;
            info!(path = %path.display(), "Wrote default configuration");
            return Ok(config);
        }
        Err(e) => return Err(e.into()),
    };

    match parse_config(&content) {
        Err(ConfigError::ParseError(e)) => {
            warn!(
                path = %path.display(),
                error = %e,
                "Config is not valid TOML, using defaults; changes will not be saved until it is fixed"
            );
            Ok(CurfewConfig::default())
        }
        other => other,
    }
}

/// Write the configuration, replacing the file atomically. An existing file
/// that is not valid TOML is never replaced.
pub fn save_config(path: impl AsRef<Path>, config: &CurfewConfig) -> ConfigResult<()> {
    let path = path.as_ref();
    match std::fs::read_to_string(path) {
        Ok(existing) if toml::from_str::<toml::Table>(&existing).is_err() => {
            return Err(ConfigError::WouldOverwriteUnparseable(path.to_path_buf()));
        }
        Ok(_) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let text = toml::to_string_pretty(config)?;
    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, text)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
