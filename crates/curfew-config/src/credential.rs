//! Password credential: salted PBKDF2-HMAC-SHA256
//!
//! Verification is fail-closed. Anything missing or undecodable in the
//! stored credential makes every candidate fail, including the right one.

use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;
use tracing::{debug, warn};

use crate::schema::PasswordConfig;

pub const MIN_PASSWORD_LEN: usize = 4;
pub const DEFAULT_ITERATIONS: u32 = 200_000;
pub const SALT_LEN: usize = 16;
pub const HASH_LEN: usize = 32;
pub const ALGO_PBKDF2_SHA256: &str = "pbkdf2_sha256";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("Password must be at least {min} characters")]
    TooShort { min: usize },

    #[error("Passwords do not match")]
    Mismatch,
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// A derived password hash with the parameters needed to reproduce it
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    salt: Vec<u8>,
    hash: [u8; HASH_LEN],
    iterations: u32,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl Credential {
    /// Hash `password` with the given salt and iteration count
    pub fn derive(password: &str, salt: &[u8], iterations: u32) -> Self {
        let mut hash = [0u8; HASH_LEN];
        pbkdf2::pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut hash);
        Self {
            salt: salt.to_vec(),
            hash,
            iterations,
        }
    }

    /// New credential for `new_password` with a fresh random salt
    pub fn rotate(new_password: &str) -> CredentialResult<Self> {
        Self::rotate_with_iterations(new_password, DEFAULT_ITERATIONS)
    }

    pub fn rotate_with_iterations(new_password: &str, iterations: u32) -> CredentialResult<Self> {
        check_new_password(new_password)?;
        let salt: [u8; SALT_LEN] = rand::random();
        Ok(Self::derive(new_password, &salt, iterations.max(DEFAULT_ITERATIONS)))
    }

    /// Compare the full digest in constant time
    pub fn verify(&self, candidate: &str) -> bool {
        let computed = Self::derive(candidate, &self.salt, self.iterations);
        computed.hash[..].ct_eq(&self.hash[..]).into()
    }

    pub fn iterations(&self) -> u32 {
        self.iterations
    }
}

/// Reject passwords that are too short to be set
pub fn check_new_password(password: &str) -> CredentialResult<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::TooShort {
            min: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// Check a new password and its confirmation before anything is persisted
pub fn check_confirmation(password: &str, confirmation: &str) -> CredentialResult<()> {
    check_new_password(password)?;
    if password != confirmation {
        return Err(CredentialError::Mismatch);
    }
    Ok(())
}

impl PasswordConfig {
    pub fn from_credential(credential: &Credential) -> Self {
        Self {
            salt: Some(hex::encode(&credential.salt)),
            hash: Some(hex::encode(credential.hash)),
            iterations: credential.iterations,
            algo: ALGO_PBKDF2_SHA256.into(),
        }
    }

    /// Decode the stored credential, or `None` if it is absent or damaged
    pub fn to_credential(&self) -> Option<Credential> {
        let (Some(salt_hex), Some(hash_hex)) = (&self.salt, &self.hash) else {
            debug!("No credential configured");
            return None;
        };
        if self.algo != ALGO_PBKDF2_SHA256 {
            warn!(algo = %self.algo, "Unsupported credential algorithm");
            return None;
        }
        if self.iterations == 0 {
            warn!("Credential has zero iterations");
            return None;
        }

        let salt = hex::decode(salt_hex).ok().filter(|s| !s.is_empty());
        let hash: Option<[u8; HASH_LEN]> = hex::decode(hash_hex)
            .ok()
            .and_then(|h| h.try_into().ok());

        match (salt, hash) {
            (Some(salt), Some(hash)) => Some(Credential {
                salt,
                hash,
                iterations: self.iterations,
            }),
            _ => {
                warn!("Stored credential is malformed");
                None
            }
        }
    }
}

/// Verify `candidate` against the stored credential. Never errors; any
/// problem with the stored data is a failed verification.
pub fn verify_password(config: &PasswordConfig, candidate: &str) -> bool {
    match config.to_credential() {
        Some(credential) => credential.verify(candidate),
        None => false,
    }
}
