//! Per-user secret protection backed by a private key file
//!
//! The key file holds 32 random bytes and is created `0600` on first use.
//! A per-user encryption key is derived from it with HKDF-SHA256, salted
//! with the numeric uid, so a copied blob does not decrypt under another
//! account even if the key file comes along with it.
//!
//! Blob layout: `nonce (24 bytes) || XChaCha20-Poly1305 ciphertext`.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{XChaCha20Poly1305, XNonce};
use curfew_host_api::{ProtectError, ProtectResult, SecretProtector};
use hkdf::Hkdf;
use sha2::Sha256;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use zeroize::Zeroizing;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const HKDF_INFO: &[u8] = b"curfew-schedule";

pub struct UserKeyProtector {
    key_path: PathBuf,
    uid: u32,
}

impl UserKeyProtector {
    pub fn new(key_path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: key_path.into(),
            uid: nix::unistd::getuid().as_raw(),
        }
    }

    #[cfg(test)]
    fn with_uid(key_path: impl Into<PathBuf>, uid: u32) -> Self {
        Self {
            key_path: key_path.into(),
            uid,
        }
    }

    fn cipher(&self) -> ProtectResult<XChaCha20Poly1305> {
        let master = load_or_create_key(&self.key_path)?;

        let hk = Hkdf::<Sha256>::new(Some(&self.uid.to_le_bytes()), master.as_slice());
        let mut okm = Zeroizing::new([0u8; KEY_LEN]);
        hk.expand(HKDF_INFO, &mut okm[..])
            .map_err(|e| ProtectError::Unavailable(format!("key derivation: {}", e)))?;

        XChaCha20Poly1305::new_from_slice(&okm[..])
            .map_err(|e| ProtectError::Unavailable(format!("cipher init: {}", e)))
    }
}

fn load_or_create_key(path: &Path) -> ProtectResult<Zeroizing<Vec<u8>>> {
    match OpenOptions::new().read(true).open(path) {
        Ok(mut file) => {
            let mut key = Zeroizing::new(Vec::with_capacity(KEY_LEN));
            file.read_to_end(&mut key)?;
            if key.len() != KEY_LEN {
                return Err(ProtectError::Unavailable(format!(
                    "key file {} has wrong length",
                    path.display()
                )));
            }
            debug!(path = %path.display(), "Loaded user key");
            Ok(key)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let key = Zeroizing::new(rand::random::<[u8; KEY_LEN]>().to_vec());

            let mut file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .mode(0o600)
                .open(path)?;
            file.write_all(&key)?;
            file.sync_all()?;

            info!(path = %path.display(), "Created user key");
            Ok(key)
        }
        Err(e) => Err(e.into()),
    }
}

impl SecretProtector for UserKeyProtector {
    fn protect(&self, plaintext: &[u8]) -> ProtectResult<Vec<u8>> {
        let cipher = self.cipher()?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = XNonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ProtectError::Encrypt(e.to_string()))?;

        let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        blob.extend_from_slice(&nonce_bytes);
        blob.extend_from_slice(&ciphertext);
        Ok(blob)
    }

    fn unprotect(&self, blob: &[u8]) -> ProtectResult<Vec<u8>> {
        if blob.len() < NONCE_LEN {
            return Err(ProtectError::Decrypt("blob too short".into()));
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);

        self.cipher()?
            .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|e| ProtectError::Decrypt(e.to_string()))
    }
}
