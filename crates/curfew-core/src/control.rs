//! Password-gated control actions
//!
//! Every privileged action verifies the password before touching anything.
//! A failed check is audited and changes nothing. The one exception is
//! setting the very first password, which has nothing to verify against.

use curfew_config::{
    ApiConfig, Credential, CurfewConfig, PasswordConfig, check_confirmation, is_loopback_host,
    save_config, verify_password,
};
use curfew_store::{
    AuditEvent, AuditEventType, ControlAction, ReleasePath, ScheduleConfig, SecureScheduleStore,
    Store,
};
use curfew_util::{LockReason, LockWindow};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{error, info, warn};

use crate::{LockDecision, LockError, LockOrchestrator, LockResult, UnlockDecision};

/// Outcome of saving a schedule
#[derive(Debug, Clone)]
pub struct ScheduleApplied {
    pub schedule: ScheduleConfig,

    /// Set when the new window was already open and a lock engaged at once
    pub lock: Option<LockDecision>,
}

/// Control gate in front of the orchestrator and the stores
pub struct Control {
    orchestrator: Arc<LockOrchestrator>,
    schedule: SecureScheduleStore,
    store: Arc<dyn Store>,
    config: Mutex<CurfewConfig>,

    /// Where to persist credential and API changes. `None` keeps them in
    /// memory only.
    config_path: Option<PathBuf>,
}

impl Control {
    pub fn new(
        orchestrator: Arc<LockOrchestrator>,
        schedule: SecureScheduleStore,
        store: Arc<dyn Store>,
        config: CurfewConfig,
        config_path: Option<PathBuf>,
    ) -> Self {
        Self {
            orchestrator,
            schedule,
            store,
            config: Mutex::new(config),
            config_path,
        }
    }

    /// Current configuration (holds no plaintext secrets)
    pub fn config(&self) -> CurfewConfig {
        self.config_guard().clone()
    }

    pub fn has_password(&self) -> bool {
        self.config_guard().password.is_configured()
    }

    fn config_guard(&self) -> MutexGuard<'_, CurfewConfig> {
        // Plain data; a panic elsewhere cannot leave it half-updated
        self.config.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn authorize(&self, action: ControlAction, password: &str) -> LockResult<()> {
        let password_config = self.config_guard().password.clone();
        if verify_password(&password_config, password) {
            return Ok(());
        }

        warn!(action = ?action, "Authentication failed");
        self.audit(AuditEventType::AuthFailed { action });
        Err(LockError::AuthFailed)
    }

    pub async fn lock(&self, password: &str) -> LockResult<LockDecision> {
        self.authorize(ControlAction::Lock, password)?;
        self.orchestrator
            .lock(LockReason::Manual, None)
            .await
            .map_err(|e| self.lock_failed(LockReason::Manual, e))
    }

    /// Release the lock. Releasing a scheduled lock this way also turns the
    /// schedule off, the same as escaping through the lock screen.
    pub async fn unlock(&self, password: &str) -> LockResult<UnlockDecision> {
        self.authorize(ControlAction::Unlock, password)?;
        Ok(self.orchestrator.unlock(ReleasePath::Admin).await)
    }

    /// Replace the stored schedule. If it is enabled and the window is open
    /// right now, the lock engages immediately.
    pub async fn set_schedule(&self, password: &str, schedule: ScheduleConfig) -> LockResult<ScheduleApplied> {
        let window = self.save_schedule(password, &schedule)?;

        let lock = if schedule.enabled && window.contains(&curfew_util::now()) {
            let decision = self
                .orchestrator
                .lock(LockReason::Scheduled, Some(window))
                .await
                .map_err(|e| self.lock_failed(LockReason::Scheduled, e))?;
            Some(decision)
        } else {
            None
        };

        Ok(ScheduleApplied { schedule, lock })
    }

    /// Replace the stored schedule without engaging a lock. For callers in
    /// another process than the scheduler, which picks it up on its next
    /// tick.
    pub fn save_schedule(&self, password: &str, schedule: &ScheduleConfig) -> LockResult<LockWindow> {
        self.authorize(ControlAction::SetSchedule, password)?;

        let window = schedule
            .window()
            .map_err(|e| LockError::InvalidSetting(e.to_string()))?;
        self.schedule.write(schedule)?;

        info!(enabled = schedule.enabled, window = %window, "Schedule updated");
        self.audit(AuditEventType::ScheduleChanged {
            enabled: schedule.enabled,
            window,
        });
        Ok(window)
    }

    /// Set or rotate the password. `current` is required once a password
    /// exists. The new password must be long enough and match its
    /// confirmation; nothing is stored otherwise.
    pub fn set_password(&self, current: Option<&str>, new: &str, confirmation: &str) -> LockResult<()> {
        if self.has_password() {
            self.authorize(ControlAction::SetPassword, current.unwrap_or_default())?;
        }
        check_confirmation(new, confirmation)?;

        let iterations = self.config_guard().password.iterations;
        let credential = Credential::rotate_with_iterations(new, iterations)?;

        self.update_config(|config| {
            config.password = PasswordConfig::from_credential(&credential);
        })?;

        info!("Password changed");
        self.audit(AuditEventType::PasswordChanged);
        Ok(())
    }

    pub fn set_api_config(&self, password: &str, api: ApiConfig) -> LockResult<()> {
        self.authorize(ControlAction::SetApiConfig, password)?;

        if !is_loopback_host(&api.host) {
            return Err(LockError::InvalidSetting(format!(
                "API host '{}' is not a loopback address",
                api.host
            )));
        }
        if api.port == 0 {
            return Err(LockError::InvalidSetting("API port must be non-zero".into()));
        }

        let (enabled, host, port) = (api.enabled, api.host.clone(), api.port);
        self.update_config(|config| config.api = api)?;

        info!(enabled, host = %host, port, "API settings changed");
        self.audit(AuditEventType::ApiConfigChanged { enabled, host, port });
        Ok(())
    }

    /// Apply `change` and persist it. The in-memory copy is only replaced
    /// once the file write succeeded.
    fn update_config(&self, change: impl FnOnce(&mut CurfewConfig)) -> LockResult<()> {
        let mut guard = self.config_guard();
        let mut updated = guard.clone();
        change(&mut updated);

        if let Some(path) = &self.config_path {
            save_config(path, &updated)?;
        }
        *guard = updated;
        Ok(())
    }

    fn lock_failed(&self, reason: LockReason, e: LockError) -> LockError {
        error!(reason = %reason, error = %e, "Lock failed, staying unlocked");
        self.audit(AuditEventType::LockFailed {
            reason,
            error: e.to_string(),
        });
        e
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }
}
