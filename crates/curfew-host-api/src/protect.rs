//! Per-user secret protection
//!
//! Models a DPAPI-like primitive: `protect` binds ciphertext to the invoking
//! user account so the blob is unreadable from any other account, and
//! `unprotect` reverses it. Integrity is whatever the primitive provides;
//! callers treat any `unprotect` failure as "no data".

use thiserror::Error;

/// Errors from the protection primitive
#[derive(Debug, Error)]
pub enum ProtectError {
    #[error("Protection primitive unavailable: {0}")]
    Unavailable(String),

    #[error("Encryption failed: {0}")]
    Encrypt(String),

    #[error("Decryption failed: {0}")]
    Decrypt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ProtectResult<T> = Result<T, ProtectError>;

pub trait SecretProtector: Send + Sync {
    fn protect(&self, plaintext: &[u8]) -> ProtectResult<Vec<u8>>;

    fn unprotect(&self, blob: &[u8]) -> ProtectResult<Vec<u8>>;
}
