//! Lock session state machine
//!
//! `LockOrchestrator` is the only owner of the [`LockSession`] record. Every
//! transition (lock, admin unlock, scheduled unlock, child exit) runs to
//! completion while holding one async mutex, so the `Idle -> Locking ->
//! Locked -> Unlocking -> Idle` steps are never interleaved.

use curfew_host_api::{
    AudioController, ExitStatus, LockNotice, NotificationSink, SurfaceHandle, SurfaceManager,
};
use curfew_store::{AuditEvent, AuditEventType, ReleasePath, SecureScheduleStore, Store};
use curfew_util::{LockReason, LockWindow, SessionId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::{LockDecision, LockError, LockResult, LockSession, LockSnapshot, Supervisor, UnlockDecision};

/// Everything guarded by the transition gate
#[derive(Default)]
struct LockState {
    session: Option<LockSession>,

    /// Isolated surface, acquired on first lock and kept for the life of
    /// the process. Never closed: a presentation process may still be
    /// using it after its session ends.
    surface: Option<SurfaceHandle>,
}

/// The lock orchestrator
pub struct LockOrchestrator {
    surfaces: Arc<dyn SurfaceManager>,
    supervisor: Supervisor,
    audio: Option<Arc<dyn AudioController>>,
    schedule: SecureScheduleStore,
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
    surface_name: String,
    state: Mutex<LockState>,

    /// Bumped on every engage and release
    epoch: AtomicU64,

    this: Weak<LockOrchestrator>,
}

impl LockOrchestrator {
    pub fn new(
        surfaces: Arc<dyn SurfaceManager>,
        supervisor: Supervisor,
        schedule: SecureScheduleStore,
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationSink>,
        surface_name: impl Into<String>,
    ) -> Arc<Self> {
        Self::with_audio(surfaces, supervisor, None, schedule, store, notifier, surface_name)
    }

    pub fn with_audio(
        surfaces: Arc<dyn SurfaceManager>,
        supervisor: Supervisor,
        audio: Option<Arc<dyn AudioController>>,
        schedule: SecureScheduleStore,
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationSink>,
        surface_name: impl Into<String>,
    ) -> Arc<Self> {
        let surface_name = surface_name.into();
        Arc::new_cyclic(|this| Self {
            surfaces,
            supervisor,
            audio,
            schedule,
            store,
            notifier,
            surface_name,
            state: Mutex::new(LockState::default()),
            epoch: AtomicU64::new(0),
            this: this.clone(),
        })
    }

    /// Transition counter. Changes whenever a lock engages or releases.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    pub async fn is_locked(&self) -> bool {
        self.state.lock().await.session.is_some()
    }

    /// Snapshot of the active session, if any
    pub async fn current(&self) -> Option<LockSnapshot> {
        self.state.lock().await.session.as_ref().map(LockSession::snapshot)
    }

    /// Engage a lock. A no-op if one is already active.
    ///
    /// Steps run in order: mute audio, acquire and switch to the isolated
    /// surface, spawn the presentation process, record the session, start
    /// watching the child. If the surface or the child cannot be set up,
    /// whatever was done is rolled back, no session is recorded and the
    /// error is returned unreported.
    pub async fn lock(&self, reason: LockReason, window: Option<LockWindow>) -> LockResult<LockDecision> {
        let mut state = self.state.lock().await;

        if let Some(session) = &state.session {
            debug!(session_id = %session.session_id, "Already locked");
            return Ok(LockDecision::AlreadyLocked(session.snapshot()));
        }

        let window = match reason {
            LockReason::Scheduled => window,
            LockReason::Manual => None,
        };
        let session_id = SessionId::new();

        let prior_muted = self.mute_audio().await;

        let surface = match self.enter_surface(&mut state) {
            Ok(surface) => surface,
            Err(e) => {
                self.restore_audio(prior_muted).await;
                return Err(self.lock_failed(reason, e));
            }
        };

        let child = match self
            .supervisor
            .spawn_presentation(session_id.clone(), &surface, reason, window)
            .await
        {
            Ok(child) => child,
            Err(e) => {
                self.surfaces.restore_default();
                self.restore_audio(prior_muted).await;
                return Err(self.lock_failed(reason, e.into()));
            }
        };

        let session = LockSession {
            session_id: session_id.clone(),
            reason,
            window,
            child,
            audio_muted_by_us: prior_muted,
            started_at: curfew_util::now(),
        };
        let snapshot = session.snapshot();

        let this = self.this.clone();
        let exited_id = session_id.clone();
        self.supervisor.watch(&session.child, move |status| async move {
            if let Some(orchestrator) = this.upgrade() {
                orchestrator.on_child_exit(&exited_id, status).await;
            }
        });

        state.session = Some(session);
        self.epoch.fetch_add(1, Ordering::SeqCst);
        drop(state);

        self.audit(AuditEventType::LockEngaged {
            session_id: session_id.clone(),
            reason,
            window,
        });
        self.notifier.notify(LockNotice::Engaged {
            scheduled: reason == LockReason::Scheduled,
        });

        match window {
            Some(window) => info!(session_id = %session_id, reason = %reason, window = %window, "Lock engaged"),
            None => info!(session_id = %session_id, reason = %reason, "Lock engaged"),
        }

        Ok(LockDecision::Engaged(snapshot))
    }

    /// Release the active lock. A no-op if nothing is locked.
    ///
    /// `path` records who asked. `Admin` is an authenticated request and,
    /// like escaping through the lock screen, turns a scheduled lock's
    /// schedule off. `WindowEnded` and `Shutdown` do not.
    pub async fn unlock(&self, path: ReleasePath) -> UnlockDecision {
        self.release_if(path, |_| true).await
    }

    /// Release the active lock only if the schedule engaged it. Manual locks
    /// are left alone.
    pub async fn unlock_scheduled(&self) -> UnlockDecision {
        self.release_if(ReleasePath::WindowEnded, |s| s.reason == LockReason::Scheduled)
            .await
    }

    /// Called by the watcher when a presentation process terminates. Stale
    /// exits (the session was already released) are ignored.
    pub(crate) async fn on_child_exit(&self, session_id: &SessionId, status: ExitStatus) {
        let mut state = self.state.lock().await;

        let Some(session) = state.session.take_if(|s| &s.session_id == session_id) else {
            debug!(session_id = %session_id, "Exit of a session that is no longer active");
            return;
        };

        info!(session_id = %session_id, status = ?status, "Presentation process exited, releasing lock");
        self.release(session, ReleasePath::ChildExit).await;
        drop(state);
    }

    async fn release_if(&self, path: ReleasePath, filter: impl FnOnce(&LockSession) -> bool) -> UnlockDecision {
        let mut state = self.state.lock().await;

        let Some(session) = state.session.take_if(|s| filter(s)) else {
            debug!(path = ?path, "Nothing to unlock");
            return UnlockDecision::NotLocked;
        };

        info!(session_id = %session.session_id, path = ?path, "Unlocking");
        let snapshot = session.snapshot();
        self.release(session, path).await;
        drop(state);

        UnlockDecision::Released(snapshot)
    }

    /// Tear down a session that has already been taken out of the state.
    /// Every step is best-effort: a half-restored desktop beats a stuck lock.
    async fn release(&self, session: LockSession, path: ReleasePath) {
        self.surfaces.restore_default();

        if path != ReleasePath::ChildExit {
            self.supervisor.stop(&session.child).await;
        }

        self.restore_audio(session.audio_muted_by_us).await;
        self.epoch.fetch_add(1, Ordering::SeqCst);

        self.audit(AuditEventType::LockReleased {
            session_id: session.session_id.clone(),
            reason: session.reason,
            path,
        });

        if session.reason == LockReason::Scheduled && path.is_escape() {
            self.disable_schedule_after_escape(&session.session_id);
        }

        self.notifier.notify(LockNotice::Released);
        info!(session_id = %session.session_id, path = ?path, "Lock released");
    }

    /// Without this the scheduler would re-lock on the next tick, since the
    /// window is still open.
    fn disable_schedule_after_escape(&self, session_id: &SessionId) {
        match self.schedule.disable() {
            Ok(_) => {
                info!(session_id = %session_id, "Schedule disabled after scheduled lock was released");
                self.audit(AuditEventType::ScheduleDisabledAfterEscape {
                    session_id: session_id.clone(),
                });
            }
            Err(e) => {
                error!(session_id = %session_id, error = %e, "Failed to disable schedule");
            }
        }
    }

    fn enter_surface(&self, state: &mut LockState) -> LockResult<SurfaceHandle> {
        let surface = match &state.surface {
            Some(surface) => surface.clone(),
            None => {
                let surface = self.surfaces.create_or_open(&self.surface_name)?;
                debug!(surface = %surface.name(), index = surface.index(), "Isolated surface acquired");
                state.surface = Some(surface.clone());
                surface
            }
        };
        self.surfaces.switch_active(&surface)?;
        Ok(surface)
    }

    /// Reporting is left to the caller, which knows whether this is a new
    /// failure or another retry of the same one
    fn lock_failed(&self, reason: LockReason, e: LockError) -> LockError {
        debug!(reason = %reason, error = %e, "Lock attempt rolled back");
        e
    }

    /// Mute output, returning the previous mute state if it could be read
    async fn mute_audio(&self) -> Option<bool> {
        let audio = self.audio.as_ref()?;

        let prior = match audio.get_status().await {
            Ok(status) => status.muted,
            Err(e) => {
                warn!(error = %e, "Could not read audio state, leaving it alone");
                return None;
            }
        };
        if !prior && let Err(e) = audio.set_mute(true).await {
            warn!(error = %e, "Failed to mute audio");
        }
        Some(prior)
    }

    async fn restore_audio(&self, prior_muted: Option<bool>) {
        let (Some(audio), Some(prior)) = (self.audio.as_ref(), prior_muted) else {
            return;
        };
        if let Err(e) = audio.set_mute(prior).await {
            warn!(error = %e, "Failed to restore audio mute state");
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curfew_config::PresentationConfig;
    use curfew_host_api::{
        MockAudio, MockHost, MockProtector, MockSignal, MockSurfaces, RecordingNotifier, StopMode,
        SurfaceCall,
    };
    use curfew_store::{ScheduleConfig, SqliteStore};
    use std::time::Duration;

    struct Harness {
        host: Arc<MockHost>,
        surfaces: Arc<MockSurfaces>,
        audio: Arc<MockAudio>,
        schedule: SecureScheduleStore,
        store: Arc<SqliteStore>,
        notifier: Arc<RecordingNotifier>,
        orchestrator: Arc<LockOrchestrator>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(MockHost::new());
        let surfaces = Arc::new(MockSurfaces::new());
        let audio = Arc::new(MockAudio::new(false));
        let schedule = SecureScheduleStore::new(dir.path().join("schedule.dat"), Arc::new(MockProtector::new()));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let notifier = Arc::new(RecordingNotifier::new());

        let supervisor = Supervisor::new(host.clone(), &PresentationConfig::default(), "ctrl+alt+u")
            .with_stop_mode(StopMode::Graceful {
                attempts: 3,
                interval: Duration::from_millis(5),
            });
        let orchestrator = LockOrchestrator::with_audio(
            surfaces.clone(),
            supervisor,
            Some(audio.clone() as Arc<dyn AudioController>),
            schedule.clone(),
            store.clone(),
            notifier.clone(),
            "curfew-lock",
        );

        Harness {
            host,
            surfaces,
            audio,
            schedule,
            store,
            notifier,
            orchestrator,
            _dir: dir,
        }
    }

    fn window() -> LockWindow {
        LockWindow::new("22:00".parse().unwrap(), "07:00".parse().unwrap())
    }

    async fn wait_unlocked(orchestrator: &LockOrchestrator) {
        for _ in 0..200 {
            if !orchestrator.is_locked().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("lock was not released");
    }

    #[tokio::test]
    async fn lock_steps_run_in_order() {
        let h = harness();

        let decision = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        assert!(decision.is_engaged());
        assert!(h.orchestrator.is_locked().await);
        assert!(h.audio.is_muted());
        assert_eq!(h.surfaces.active().as_deref(), Some("curfew-lock"));
        assert_eq!(
            h.surfaces.calls(),
            vec![
                SurfaceCall::CreateOrOpen("curfew-lock".into()),
                SurfaceCall::SwitchActive("curfew-lock".into()),
            ]
        );
        assert_eq!(h.host.spawn_count(), 1);
        assert_eq!(h.notifier.notices(), vec![LockNotice::Engaged { scheduled: false }]);
    }

    #[tokio::test]
    async fn lock_is_idempotent() {
        let h = harness();

        let first = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        let second = h
            .orchestrator
            .lock(LockReason::Scheduled, Some(window()))
            .await
            .unwrap();

        assert!(!second.is_engaged());
        assert_eq!(first.snapshot().session_id, second.snapshot().session_id);
        assert_eq!(second.snapshot().reason, LockReason::Manual);
        assert_eq!(h.host.spawn_count(), 1);
    }

    #[tokio::test]
    async fn manual_lock_drops_window() {
        let h = harness();
        let decision = h.orchestrator.lock(LockReason::Manual, Some(window())).await.unwrap();
        assert_eq!(decision.snapshot().window, None);
    }

    #[tokio::test]
    async fn unlock_restores_everything() {
        let h = harness();
        h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        let epoch = h.orchestrator.epoch();

        let decision = h.orchestrator.unlock(ReleasePath::Admin).await;
        assert!(matches!(decision, UnlockDecision::Released(_)));
        assert!(!h.orchestrator.is_locked().await);
        assert!(!h.audio.is_muted());
        assert_eq!(h.surfaces.active(), None);
        assert_eq!(h.host.signals(), vec![MockSignal::Stop]);
        assert!(h.orchestrator.epoch() > epoch);

        assert!(matches!(
            h.orchestrator.unlock(ReleasePath::Admin).await,
            UnlockDecision::NotLocked
        ));
        assert_eq!(h.host.signals().len(), 1);
    }

    #[tokio::test]
    async fn audio_already_muted_stays_muted() {
        let h = harness();
        h.audio.set_mute(true).await.unwrap();

        h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        h.orchestrator.unlock(ReleasePath::Admin).await;
        assert!(h.audio.is_muted());
    }

    #[tokio::test]
    async fn audio_failure_does_not_block_lock() {
        let h = harness();
        *h.audio.fail.lock().unwrap() = true;

        let decision = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        assert!(decision.is_engaged());
        h.orchestrator.unlock(ReleasePath::Admin).await;
        assert!(!h.orchestrator.is_locked().await);
    }

    #[tokio::test]
    async fn surface_failure_leaves_machine_usable() {
        let h = harness();
        *h.surfaces.fail_create.lock().unwrap() = true;

        let err = h.orchestrator.lock(LockReason::Manual, None).await.unwrap_err();
        assert!(matches!(&err, LockError::Surface(e) if e.code() == Some(5)));
        assert!(!h.orchestrator.is_locked().await);
        assert!(!h.audio.is_muted());
        assert_eq!(h.host.spawn_count(), 0);

        // The caller decides whether to report it
        assert!(h.store.get_recent_audits(10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn switch_failure_is_retried_on_next_lock() {
        let h = harness();
        *h.surfaces.fail_switch.lock().unwrap() = true;
        assert!(h.orchestrator.lock(LockReason::Manual, None).await.is_err());

        *h.surfaces.fail_switch.lock().unwrap() = false;
        assert!(h.orchestrator.lock(LockReason::Manual, None).await.is_ok());

        // The surface is created once per process
        let creates = h
            .surfaces
            .calls()
            .into_iter()
            .filter(|c| matches!(c, SurfaceCall::CreateOrOpen(_)))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn spawn_failure_switches_back() {
        let h = harness();
        *h.host.fail_spawn.lock().unwrap() = true;

        let err = h.orchestrator.lock(LockReason::Manual, None).await.unwrap_err();
        assert!(matches!(err, LockError::Spawn(_)));
        assert!(!h.orchestrator.is_locked().await);
        assert_eq!(h.surfaces.active(), None);
        assert!(!h.audio.is_muted());
        assert!(h.notifier.notices().is_empty());
    }

    #[tokio::test]
    async fn child_exit_releases_lock() {
        let h = harness();
        let decision = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();

        h.host
            .simulate_exit(&decision.snapshot().session_id, ExitStatus::success());
        wait_unlocked(&h.orchestrator).await;

        assert_eq!(h.surfaces.active(), None);
        assert!(!h.audio.is_muted());
        // The child is already gone; nothing to signal
        assert!(h.host.signals().is_empty());
        assert_eq!(h.notifier.notices().last(), Some(&LockNotice::Released));
    }

    #[tokio::test]
    async fn scheduled_lock_escape_disables_schedule() {
        let h = harness();
        h.schedule.write(&ScheduleConfig::new(true, window(), [5, 1])).unwrap();

        let decision = h
            .orchestrator
            .lock(LockReason::Scheduled, Some(window()))
            .await
            .unwrap();
        h.host
            .simulate_exit(&decision.snapshot().session_id, ExitStatus::success());
        wait_unlocked(&h.orchestrator).await;

        let schedule = h.schedule.read();
        assert!(!schedule.enabled);
        assert_eq!(schedule.start, "22:00");

        let audits = h.store.get_recent_audits(10).unwrap();
        assert!(audits
            .iter()
            .any(|a| matches!(a.event, AuditEventType::ScheduleDisabledAfterEscape { .. })));
    }

    #[tokio::test]
    async fn manual_lock_escape_keeps_schedule() {
        let h = harness();
        h.schedule.write(&ScheduleConfig::new(true, window(), [5, 1])).unwrap();

        let decision = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        h.host
            .simulate_exit(&decision.snapshot().session_id, ExitStatus::success());
        wait_unlocked(&h.orchestrator).await;

        assert!(h.schedule.read().enabled);
    }

    #[tokio::test]
    async fn admin_unlock_of_scheduled_lock_disables_schedule() {
        let h = harness();
        h.schedule.write(&ScheduleConfig::new(true, window(), [5, 1])).unwrap();

        h.orchestrator
            .lock(LockReason::Scheduled, Some(window()))
            .await
            .unwrap();
        h.orchestrator.unlock(ReleasePath::Admin).await;

        assert!(!h.schedule.read().enabled);
    }

    #[tokio::test]
    async fn window_end_keeps_schedule_and_spares_manual_locks() {
        let h = harness();
        h.schedule.write(&ScheduleConfig::new(true, window(), [5, 1])).unwrap();

        h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        assert!(matches!(
            h.orchestrator.unlock_scheduled().await,
            UnlockDecision::NotLocked
        ));
        assert!(h.orchestrator.is_locked().await);
        h.orchestrator.unlock(ReleasePath::Admin).await;

        h.orchestrator
            .lock(LockReason::Scheduled, Some(window()))
            .await
            .unwrap();
        assert!(matches!(
            h.orchestrator.unlock_scheduled().await,
            UnlockDecision::Released(_)
        ));
        assert!(h.schedule.read().enabled);
    }

    #[tokio::test]
    async fn exit_during_admin_unlock_is_not_double_released() {
        let h = harness();
        h.orchestrator.lock(LockReason::Manual, None).await.unwrap();

        // Stopping the child fires the watcher too; only one release happens
        h.orchestrator.unlock(ReleasePath::Admin).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let releases = h
            .store
            .get_recent_audits(20)
            .unwrap()
            .into_iter()
            .filter(|a| matches!(a.event, AuditEventType::LockReleased { .. }))
            .count();
        assert_eq!(releases, 1);
    }

    #[tokio::test]
    async fn relock_after_release_gets_new_session() {
        let h = harness();
        let first = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();
        h.orchestrator.unlock(ReleasePath::Admin).await;
        let second = h.orchestrator.lock(LockReason::Manual, None).await.unwrap();

        assert!(second.is_engaged());
        assert_ne!(first.snapshot().session_id, second.snapshot().session_id);
        assert_eq!(h.host.spawn_count(), 2);
    }
}
