//! Mock host adapters for testing

use async_trait::async_trait;
use curfew_util::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::{
    AudioCapabilities, AudioController, AudioError, AudioResult, ChildHandle, ExitReporter,
    ExitStatus, ExitWatch, HandlePayload, HostCapabilities, HostError, HostResult, LockNotice,
    NotificationSink, ProcessHost, ProtectError, ProtectResult, SecretProtector, SpawnOptions,
    SurfaceError, SurfaceHandle, SurfaceManager, SurfaceResult, VolumeStatus,
};

struct MockChild {
    session_id: SessionId,
    argv: Vec<String>,
    reporter: ExitReporter,
}

/// Signal delivered to a mock child
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockSignal {
    Stop,
    Kill,
}

/// Mock process host for unit/integration testing
pub struct MockHost {
    capabilities: HostCapabilities,
    next_id: AtomicU64,
    children: Mutex<HashMap<u64, MockChild>>,
    signals: Mutex<Vec<(u64, MockSignal)>>,

    /// Configure spawn to fail
    pub fail_spawn: Arc<Mutex<bool>>,

    /// Configure children to ignore the polite stop signal
    pub ignore_stop: Arc<Mutex<bool>>,
}

impl MockHost {
    pub fn new() -> Self {
        Self {
            capabilities: HostCapabilities::linux_full(),
            next_id: AtomicU64::new(1),
            children: Mutex::new(HashMap::new()),
            signals: Mutex::new(Vec::new()),
            fail_spawn: Arc::new(Mutex::new(false)),
            ignore_stop: Arc::new(Mutex::new(false)),
        }
    }

    pub fn with_capabilities(mut self, caps: HostCapabilities) -> Self {
        self.capabilities = caps;
        self
    }

    /// Total number of successful spawns
    pub fn spawn_count(&self) -> usize {
        self.children.lock().unwrap().len()
    }

    /// Argv of the most recent spawn
    pub fn last_argv(&self) -> Option<Vec<String>> {
        let children = self.children.lock().unwrap();
        children
            .iter()
            .max_by_key(|(id, _)| **id)
            .map(|(_, c)| c.argv.clone())
    }

    /// Signals delivered so far, in order
    pub fn signals(&self) -> Vec<MockSignal> {
        self.signals.lock().unwrap().iter().map(|(_, s)| *s).collect()
    }

    /// Simulate the child of `session_id` exiting on its own
    pub fn simulate_exit(&self, session_id: &SessionId, status: ExitStatus) {
        let children = self.children.lock().unwrap();
        for child in children.values().filter(|c| &c.session_id == session_id) {
            child.reporter.report(status.clone());
        }
    }

    fn mock_id(handle: &ChildHandle) -> HostResult<u64> {
        match handle.payload() {
            HandlePayload::Mock { id } => Ok(*id),
            _ => Err(HostError::ProcessNotFound),
        }
    }
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessHost for MockHost {
    fn capabilities(&self) -> &HostCapabilities {
        &self.capabilities
    }

    async fn spawn(
        &self,
        session_id: SessionId,
        argv: &[String],
        _options: SpawnOptions,
    ) -> HostResult<ChildHandle> {
        if *self.fail_spawn.lock().unwrap() {
            return Err(HostError::SpawnFailed("Mock spawn failure".into()));
        }
        if argv.is_empty() {
            return Err(HostError::SpawnFailed("Empty argv".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (reporter, watch) = ExitWatch::channel();

        self.children.lock().unwrap().insert(
            id,
            MockChild {
                session_id: session_id.clone(),
                argv: argv.to_vec(),
                reporter,
            },
        );

        Ok(ChildHandle::new(session_id, HandlePayload::Mock { id }, watch))
    }

    async fn signal_stop(&self, handle: &ChildHandle) -> HostResult<()> {
        let id = Self::mock_id(handle)?;
        self.signals.lock().unwrap().push((id, MockSignal::Stop));

        if !*self.ignore_stop.lock().unwrap() {
            if let Some(child) = self.children.lock().unwrap().get(&id) {
                child.reporter.report(ExitStatus::signaled(15));
            }
        }
        Ok(())
    }

    async fn kill(&self, handle: &ChildHandle) -> HostResult<()> {
        let id = Self::mock_id(handle)?;
        self.signals.lock().unwrap().push((id, MockSignal::Kill));

        if let Some(child) = self.children.lock().unwrap().get(&id) {
            child.reporter.report(ExitStatus::signaled(9));
        }
        Ok(())
    }
}

/// Call recorded by [`MockSurfaces`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    CreateOrOpen(String),
    SwitchActive(String),
    Bind(String),
    RestoreDefault,
}

/// Mock surface manager. Tracks which surface is active; `None` means the
/// default surface.
#[derive(Default)]
pub struct MockSurfaces {
    calls: Mutex<Vec<SurfaceCall>>,
    active: Mutex<Option<String>>,

    pub fail_create: Arc<Mutex<bool>>,
    pub fail_switch: Arc<Mutex<bool>>,
}

impl MockSurfaces {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Name of the active surface, or `None` if input is on the default one
    pub fn active(&self) -> Option<String> {
        self.active.lock().unwrap().clone()
    }
}

impl SurfaceManager for MockSurfaces {
    fn create_or_open(&self, name: &str) -> SurfaceResult<SurfaceHandle> {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::CreateOrOpen(name.to_string()));
        if *self.fail_create.lock().unwrap() {
            return Err(SurfaceError::os("CreateDesktop", 5));
        }
        Ok(SurfaceHandle::new(name, 8))
    }

    fn switch_active(&self, handle: &SurfaceHandle) -> SurfaceResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::SwitchActive(handle.name().to_string()));
        if *self.fail_switch.lock().unwrap() {
            return Err(SurfaceError::os("SwitchDesktop", 5));
        }
        *self.active.lock().unwrap() = Some(handle.name().to_string());
        Ok(())
    }

    fn bind_calling_thread(&self, handle: &SurfaceHandle) -> SurfaceResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(SurfaceCall::Bind(handle.name().to_string()));
        Ok(())
    }

    fn restore_default(&self) {
        self.calls.lock().unwrap().push(SurfaceCall::RestoreDefault);
        *self.active.lock().unwrap() = None;
    }
}

/// Mock audio controller holding a single output status
pub struct MockAudio {
    capabilities: AudioCapabilities,
    status: Mutex<VolumeStatus>,
    pub fail: Arc<Mutex<bool>>,
}

impl MockAudio {
    pub fn new(initially_muted: bool) -> Self {
        Self {
            capabilities: AudioCapabilities {
                available: true,
                backend: Some("mock".into()),
            },
            status: Mutex::new(VolumeStatus {
                muted: initially_muted,
            }),
            fail: Arc::new(Mutex::new(false)),
        }
    }

    pub fn is_muted(&self) -> bool {
        self.status.lock().unwrap().muted
    }
}

impl Default for MockAudio {
    fn default() -> Self {
        Self::new(false)
    }
}

#[async_trait]
impl AudioController for MockAudio {
    fn capabilities(&self) -> &AudioCapabilities {
        &self.capabilities
    }

    async fn get_status(&self) -> AudioResult<VolumeStatus> {
        if *self.fail.lock().unwrap() {
            return Err(AudioError::Backend("Mock audio failure".into()));
        }
        Ok(self.status.lock().unwrap().clone())
    }

    async fn set_mute(&self, muted: bool) -> AudioResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(AudioError::Backend("Mock audio failure".into()));
        }
        self.status.lock().unwrap().muted = muted;
        Ok(())
    }
}

const MOCK_PROTECT_PREFIX: &[u8] = b"MOCK";

/// Reversible stand-in for a per-user protection primitive
#[derive(Default)]
pub struct MockProtector {
    pub unavailable: Arc<Mutex<bool>>,
}

impl MockProtector {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SecretProtector for MockProtector {
    fn protect(&self, plaintext: &[u8]) -> ProtectResult<Vec<u8>> {
        if *self.unavailable.lock().unwrap() {
            return Err(ProtectError::Unavailable("mock".into()));
        }
        let mut blob = MOCK_PROTECT_PREFIX.to_vec();
        blob.extend(plaintext.iter().rev());
        Ok(blob)
    }

    fn unprotect(&self, blob: &[u8]) -> ProtectResult<Vec<u8>> {
        if *self.unavailable.lock().unwrap() {
            return Err(ProtectError::Unavailable("mock".into()));
        }
        let body = blob
            .strip_prefix(MOCK_PROTECT_PREFIX)
            .ok_or_else(|| ProtectError::Decrypt("bad mock blob".into()))?;
        Ok(body.iter().rev().copied().collect())
    }
}

/// Notification sink that records everything it is given
#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<LockNotice>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<LockNotice> {
        self.notices.lock().unwrap().clone()
    }

    pub fn warnings(&self) -> Vec<u32> {
        self.notices()
            .into_iter()
            .filter_map(|n| match n {
                LockNotice::Warning { minutes_remaining } => Some(minutes_remaining),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.notices.lock().unwrap().clear();
    }
}

impl NotificationSink for RecordingNotifier {
    fn notify(&self, notice: LockNotice) {
        self.notices.lock().unwrap().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv() -> Vec<String> {
        vec!["lockscreen".into()]
    }

    #[tokio::test]
    async fn mock_spawn_and_stop() {
        let host = MockHost::new();
        let session_id = SessionId::new();

        let handle = host
            .spawn(session_id.clone(), &argv(), SpawnOptions::default())
            .await
            .unwrap();

        assert_eq!(host.spawn_count(), 1);
        assert!(host.is_running(&handle));

        host.signal_stop(&handle).await.unwrap();

        assert!(!host.is_running(&handle));
        assert_eq!(host.wait_exit(&handle).await, ExitStatus::signaled(15));
    }

    #[tokio::test]
    async fn mock_spawn_failure() {
        let host = MockHost::new();
        *host.fail_spawn.lock().unwrap() = true;

        let result = host
            .spawn(SessionId::new(), &argv(), SpawnOptions::default())
            .await;

        assert!(result.is_err());
        assert_eq!(host.spawn_count(), 0);
    }

    #[tokio::test]
    async fn stubborn_child_needs_kill() {
        let host = MockHost::new();
        *host.ignore_stop.lock().unwrap() = true;

        let handle = host
            .spawn(SessionId::new(), &argv(), SpawnOptions::default())
            .await
            .unwrap();

        host.signal_stop(&handle).await.unwrap();
        assert!(host.is_running(&handle));

        host.kill(&handle).await.unwrap();
        assert!(!host.is_running(&handle));
        assert_eq!(host.signals(), vec![MockSignal::Stop, MockSignal::Kill]);
    }

    #[tokio::test]
    async fn simulated_exit_reaches_waiter() {
        let host = MockHost::new();
        let session_id = SessionId::new();
        let handle = host
            .spawn(session_id.clone(), &argv(), SpawnOptions::default())
            .await
            .unwrap();

        let waiter = {
            let watch = handle.exit_watch().clone();
            tokio::spawn(async move { watch.wait().await })
        };

        host.simulate_exit(&session_id, ExitStatus::success());
        assert!(waiter.await.unwrap().is_success());
    }

    #[test]
    fn mock_surfaces_track_active() {
        let surfaces = MockSurfaces::new();
        let handle = surfaces.create_or_open("lock").unwrap();
        surfaces.switch_active(&handle).unwrap();
        assert_eq!(surfaces.active().as_deref(), Some("lock"));

        surfaces.restore_default();
        assert_eq!(surfaces.active(), None);
    }

    #[test]
    fn mock_protector_rejects_foreign_blob() {
        let protector = MockProtector::new();
        let blob = protector.protect(b"abc").unwrap();
        assert_ne!(&blob[..], b"abc");
        assert_eq!(protector.unprotect(&blob).unwrap(), b"abc");
        assert!(protector.unprotect(b"garbage").is_err());
    }
}
