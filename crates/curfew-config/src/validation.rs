//! Configuration validation

use crate::credential::{ALGO_PBKDF2_SHA256, DEFAULT_ITERATIONS, HASH_LEN};
use crate::schema::CurfewConfig;
use std::net::IpAddr;
use thiserror::Error;

/// Validation error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("API host '{0}' is not a loopback address")]
    NonLoopbackHost(String),

    #[error("API port must be non-zero")]
    InvalidPort,

    #[error("Password iterations {iterations} below minimum {min}")]
    TooFewIterations { iterations: u32, min: u32 },

    #[error("Unsupported password algorithm '{0}'")]
    UnknownAlgorithm(String),

    #[error("Password {field} is not valid hex: {message}")]
    InvalidHex { field: &'static str, message: String },

    #[error("Password salt and hash must be set together")]
    PartialCredential,

    #[error("Presentation argv cannot be empty")]
    EmptyPresentationArgv,

    #[error("Surface name cannot be empty")]
    EmptySurfaceName,

    #[error("Scheduler tick must be non-zero")]
    InvalidTick,
}

/// Whether `host` names the local machine only
pub fn is_loopback_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.parse::<IpAddr>().map(|ip| ip.is_loopback()).unwrap_or(false)
}

/// Validate a configuration, reporting every problem found
pub fn validate_config(config: &CurfewConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if !is_loopback_host(&config.api.host) {
        errors.push(ValidationError::NonLoopbackHost(config.api.host.clone()));
    }
    if config.api.port == 0 {
        errors.push(ValidationError::InvalidPort);
    }

    let pw = &config.password;
    if pw.iterations < DEFAULT_ITERATIONS {
        errors.push(ValidationError::TooFewIterations {
            iterations: pw.iterations,
            min: DEFAULT_ITERATIONS,
        });
    }
    if pw.algo != ALGO_PBKDF2_SHA256 {
        errors.push(ValidationError::UnknownAlgorithm(pw.algo.clone()));
    }
    if pw.salt.is_some() != pw.hash.is_some() {
        errors.push(ValidationError::PartialCredential);
    }
    if let Some(salt) = &pw.salt {
        if let Err(e) = hex::decode(salt) {
            errors.push(ValidationError::InvalidHex {
                field: "salt",
                message: e.to_string(),
            });
        }
    }
    if let Some(hash) = &pw.hash {
        match hex::decode(hash) {
            Ok(bytes) if bytes.len() != HASH_LEN => errors.push(ValidationError::InvalidHex {
                field: "hash",
                message: format!("expected {} bytes, got {}", HASH_LEN, bytes.len()),
            }),
            Ok(_) => {}
            Err(e) => errors.push(ValidationError::InvalidHex {
                field: "hash",
                message: e.to_string(),
            }),
        }
    }

    if config.presentation.argv.first().is_none_or(|p| p.is_empty()) {
        errors.push(ValidationError::EmptyPresentationArgv);
    }
    if config.presentation.surface_name.is_empty() {
        errors.push(ValidationError::EmptySurfaceName);
    }

    if config.scheduler.tick_millis == 0 {
        errors.push(ValidationError::InvalidTick);
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(validate_config(&CurfewConfig::default()).is_empty());
    }

    #[test]
    fn loopback_hosts() {
        assert!(is_loopback_host("127.0.0.1"));
        assert!(is_loopback_host("127.8.0.1"));
        assert!(is_loopback_host("::1"));
        assert!(is_loopback_host("LOCALHOST"));

        assert!(!is_loopback_host("0.0.0.0"));
        assert!(!is_loopback_host("192.168.1.10"));
        assert!(!is_loopback_host("example.com"));
    }

    #[test]
    fn reports_all_errors_at_once() {
        let mut config = CurfewConfig::default();
        config.api.host = "0.0.0.0".into();
        config.api.port = 0;
        config.password.iterations = 1000;
        config.presentation.argv.clear();
        config.scheduler.tick_millis = 0;

        let errors = validate_config(&config);
        assert_eq!(errors.len(), 5);
        assert!(errors.contains(&ValidationError::InvalidPort));
        assert!(errors.contains(&ValidationError::EmptyPresentationArgv));
        assert!(errors.contains(&ValidationError::InvalidTick));
    }

    #[test]
    fn malformed_credential_fields() {
        let mut config = CurfewConfig::default();
        config.password.salt = Some("xyz".into());
        config.password.hash = Some("abcd".into());

        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidHex { field: "salt", .. })));
        assert!(errors.iter().any(|e| matches!(e, ValidationError::InvalidHex { field: "hash", .. })));
    }

    #[test]
    fn half_set_credential() {
        let mut config = CurfewConfig::default();
        config.password.salt = Some("00".repeat(16));

        assert_eq!(validate_config(&config), vec![ValidationError::PartialCredential]);
    }
}
