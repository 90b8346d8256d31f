//! Encrypted-at-rest lock schedule
//!
//! The schedule file is a protected blob whose plaintext is JSON:
//! `{"enabled":true,"start":"22:00","end":"07:00","notify_minutes":[1,5]}`.
//!
//! Reads never fail. A missing, undecryptable or malformed file reads as the
//! default schedule, which is disabled, so a damaged store can never lock
//! the machine on its own.

use curfew_host_api::SecretProtector;
use curfew_util::{CurfewError, LockWindow, WallClock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::{StoreError, StoreResult};

/// Daily lock schedule
///
/// `start` and `end` are kept as the stored text and parsed on use, so a
/// bad value only makes the schedule unusable until fixed instead of
/// discarding the whole record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub start: String,
    pub end: String,
    /// Minutes before the window starts at which to warn
    pub notify_minutes: BTreeSet<u32>,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            start: "22:00".into(),
            end: "07:00".into(),
            notify_minutes: BTreeSet::from([5, 1]),
        }
    }
}

impl ScheduleConfig {
    pub fn new(enabled: bool, window: LockWindow, notify_minutes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            enabled,
            start: window.start.to_string(),
            end: window.end.to_string(),
            notify_minutes: notify_minutes.into_iter().collect(),
        }
    }

    /// Parse the stored window bounds
    pub fn window(&self) -> Result<LockWindow, CurfewError> {
        let start: WallClock = self.start.parse()?;
        let end: WallClock = self.end.parse()?;
        Ok(LockWindow::new(start, end))
    }
}

/// Schedule persistence through a per-user [`SecretProtector`]
///
/// Clones share one write lock, so writers in this process are serialized.
/// Each write goes through its own temp file and a rename, so a writer in
/// another process never sees or clobbers a half-written file.
#[derive(Clone)]
pub struct SecureScheduleStore {
    path: PathBuf,
    protector: Arc<dyn SecretProtector>,
    write_lock: Arc<Mutex<()>>,
}

impl SecureScheduleStore {
    pub fn new(path: impl Into<PathBuf>, protector: Arc<dyn SecretProtector>) -> Self {
        Self {
            path: path.into(),
            protector,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    fn lock_writes(&self) -> MutexGuard<'_, ()> {
        // Guards no data; a panicked writer leaves nothing to repair
        self.write_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the schedule, falling back to the disabled default on any error
    pub fn read(&self) -> ScheduleConfig {
        match self.try_read() {
            Ok(Some(config)) => config,
            Ok(None) => {
                debug!(path = %self.path.display(), "No schedule stored, using default");
                ScheduleConfig::default()
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Schedule store unreadable, treating as disabled");
                ScheduleConfig::default()
            }
        }
    }

    fn try_read(&self) -> StoreResult<Option<ScheduleConfig>> {
        let blob = match std::fs::read(&self.path) {
            Ok(blob) => blob,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let plaintext = self
            .protector
            .unprotect(&blob)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let config = serde_json::from_slice(&plaintext)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        Ok(Some(config))
    }

    /// Protect and store the full schedule, replacing any previous file
    pub fn write(&self, config: &ScheduleConfig) -> StoreResult<()> {
        let _guard = self.lock_writes();
        self.write_unlocked(config)
    }

    fn write_unlocked(&self, config: &ScheduleConfig) -> StoreResult<()> {
        let plaintext = serde_json::to_vec(config)?;
        let blob = self
            .protector
            .protect(&plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        // Created 0600 with a unique name next to the target
        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(&blob)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;

        debug!(path = %self.path.display(), enabled = config.enabled, "Schedule written");
        Ok(())
    }

    /// Turn the schedule off, keeping the window and thresholds
    pub fn disable(&self) -> StoreResult<ScheduleConfig> {
        let _guard = self.lock_writes();
        let mut config = self.read();
        config.enabled = false;
        self.write_unlocked(&config)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_host_api::MockProtector;

    fn store_in(dir: &Path) -> (SecureScheduleStore, Arc<MockProtector>) {
        let protector = Arc::new(MockProtector::new());
        let store = SecureScheduleStore::new(dir.join("schedule.dat"), protector.clone());
        (store, protector)
    }

    #[test]
    fn missing_file_reads_default() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());

        let config = store.read();
        assert_eq!(config, ScheduleConfig::default());
        assert!(!config.enabled);
        assert_eq!(config.notify_minutes, BTreeSet::from([1, 5]));
        assert!(!store.path().exists());
    }

    #[test]
    fn write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());

        let window = LockWindow::new("21:30".parse().unwrap(), "06:45".parse().unwrap());
        let config = ScheduleConfig::new(true, window, [10, 1]);
        store.write(&config).unwrap();

        assert_eq!(store.read(), config);
        assert_eq!(store.read().window().unwrap(), window);
    }

    #[test]
    fn file_is_not_plaintext() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());
        store.write(&ScheduleConfig::default()).unwrap();

        let raw = std::fs::read(store.path()).unwrap();
        assert!(!String::from_utf8_lossy(&raw).contains("22:00"));
    }

    #[test]
    fn corrupt_file_reads_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());

        let mut enabled = ScheduleConfig::default();
        enabled.enabled = true;
        store.write(&enabled).unwrap();
        std::fs::write(store.path(), b"garbage").unwrap();

        assert!(!store.read().enabled);
    }

    #[test]
    fn undecodable_plaintext_reads_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let (store, protector) = store_in(dir.path());

        let blob = protector.protect(b"{not json").unwrap();
        std::fs::write(store.path(), blob).unwrap();

        assert_eq!(store.read(), ScheduleConfig::default());
    }

    #[test]
    fn missing_keys_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (store, protector) = store_in(dir.path());

        let blob = protector.protect(br#"{"enabled":true,"start":"20:00"}"#).unwrap();
        std::fs::write(store.path(), blob).unwrap();

        let config = store.read();
        assert!(config.enabled);
        assert_eq!(config.start, "20:00");
        assert_eq!(config.end, "07:00");
    }

    #[test]
    fn unavailable_protector_fails_write_and_keeps_old_file() {
        let dir = tempfile::tempdir().unwrap();
        let (store, protector) = store_in(dir.path());

        let original = ScheduleConfig::default();
        store.write(&original).unwrap();

        *protector.unavailable.lock().unwrap() = true;
        let mut changed = original.clone();
        changed.enabled = true;
        assert!(matches!(store.write(&changed), Err(StoreError::Encryption(_))));

        *protector.unavailable.lock().unwrap() = false;
        assert_eq!(store.read(), original);
    }

    #[test]
    fn malformed_time_survives_read() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());

        let config = ScheduleConfig {
            enabled: true,
            start: "25:99".into(),
            ..ScheduleConfig::default()
        };
        store.write(&config).unwrap();

        let read = store.read();
        assert!(read.enabled);
        assert!(read.window().is_err());
    }

    #[test]
    fn concurrent_writers_all_succeed() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());
        let window = LockWindow::new("22:00".parse().unwrap(), "07:00".parse().unwrap());

        let writers: Vec<_> = [true, false]
            .into_iter()
            .map(|enabled| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let config = ScheduleConfig::new(enabled, window, [5, 1]);
                    (0..200).filter(|_| store.write(&config).is_err()).count()
                })
            })
            .collect();
        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(failures, 0);
        assert_eq!(store.read().window().unwrap(), window);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1, "only schedule.dat should remain");
    }

    #[test]
    fn separate_handles_do_not_collide() {
        let dir = tempfile::tempdir().unwrap();
        let protector = Arc::new(MockProtector::new());
        let path = dir.path().join("schedule.dat");

        // Two independent stores stand in for two processes
        let writers: Vec<_> = [true, false]
            .into_iter()
            .map(|enabled| {
                let store = SecureScheduleStore::new(&path, protector.clone());
                std::thread::spawn(move || {
                    let mut config = ScheduleConfig::default();
                    config.enabled = enabled;
                    (0..200).filter(|_| store.write(&config).is_err()).count()
                })
            })
            .collect();
        let failures: usize = writers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(failures, 0);
        let store = SecureScheduleStore::new(&path, protector);
        assert_eq!(store.read().start, "22:00");
    }

    #[test]
    fn disable_interleaved_with_writes_never_fails() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());
        let window = LockWindow::new("22:00".parse().unwrap(), "07:00".parse().unwrap());
        store.write(&ScheduleConfig::new(true, window, [5])).unwrap();

        let writer = {
            let store = store.clone();
            std::thread::spawn(move || {
                let config = ScheduleConfig::new(true, window, [5]);
                for _ in 0..100 {
                    store.write(&config).unwrap();
                }
            })
        };
        for _ in 0..100 {
            store.disable().unwrap();
        }
        writer.join().unwrap();

        store.disable().unwrap();
        assert!(!store.read().enabled);
    }

    #[test]
    fn disable_keeps_window() {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = store_in(dir.path());

        let window = LockWindow::new("20:00".parse().unwrap(), "06:00".parse().unwrap());
        store.write(&ScheduleConfig::new(true, window, [5])).unwrap();

        let disabled = store.disable().unwrap();
        assert!(!disabled.enabled);
        assert_eq!(store.read().window().unwrap(), window);
    }
}
