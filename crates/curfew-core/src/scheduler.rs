//! Daily window scheduler
//!
//! Evaluates the stored schedule once per tick against the wall clock:
//! locks when the window opens, releases a scheduled lock when it closes,
//! and issues pre-lock warnings while approaching the window.

use chrono::{DateTime, Local};
use curfew_host_api::{LockNotice, NotificationSink};
use curfew_store::{AuditEvent, AuditEventType, ScheduleConfig, SecureScheduleStore, Store};
use curfew_util::{LockReason, LockWindow, minutes_until};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::{CoreEvent, LockDecision, LockOrchestrator, UnlockDecision};

/// Warning thresholds already issued during the current approach to a lock
///
/// Tied to the orchestrator's transition epoch: any lock or unlock starts a
/// new approach period and forgets what was issued.
#[derive(Debug, Default)]
pub struct NotificationTracker {
    issued: BTreeSet<u32>,
    epoch: u64,
}

impl NotificationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget issued thresholds if a lock transition happened since the
    /// last call
    pub fn sync_epoch(&mut self, epoch: u64) {
        if epoch != self.epoch {
            self.issued.clear();
            self.epoch = epoch;
        }
    }

    pub fn clear(&mut self) {
        self.issued.clear();
    }

    pub fn was_issued(&self, threshold: u32) -> bool {
        self.issued.contains(&threshold)
    }

    /// Thresholds that should warn now, recorded as issued. A threshold is
    /// due once `minutes_until` has dropped to or below it.
    pub fn due(&mut self, thresholds: &BTreeSet<u32>, minutes_until: u32) -> Vec<u32> {
        let due: Vec<u32> = thresholds
            .iter()
            .rev()
            .copied()
            .filter(|t| *t >= minutes_until && !self.issued.contains(t))
            .collect();
        self.issued.extend(due.iter().copied());
        due
    }
}

/// Longest wait between scheduled lock attempts while they keep failing
const MAX_LOCK_RETRY_SECS: i64 = 60;

/// Consecutive scheduled lock failures inside one open window
#[derive(Debug, Clone, PartialEq, Eq)]
struct LockFailureStreak {
    error: String,
    failures: u32,
    retry_at: DateTime<Local>,
}

impl LockFailureStreak {
    /// Wait before the next attempt: 1s, doubling per failure, capped
    fn backoff(failures: u32) -> chrono::Duration {
        let secs = (1i64 << failures.saturating_sub(1).min(6)).min(MAX_LOCK_RETRY_SECS);
        chrono::Duration::seconds(secs)
    }
}

/// Periodic schedule evaluator
pub struct SchedulerEngine {
    orchestrator: Arc<LockOrchestrator>,
    schedule: SecureScheduleStore,
    store: Arc<dyn Store>,
    notifier: Arc<dyn NotificationSink>,
    tick_interval: Duration,
    tracker: NotificationTracker,

    /// Last unparseable (start, end), so it is logged once rather than
    /// every tick
    last_unusable: Option<(String, String)>,

    /// Set while scheduled locks keep failing. Each retry restores audio and
    /// the surface, so attempts back off and only a new error is reported.
    lock_failure: Option<LockFailureStreak>,
}

impl SchedulerEngine {
    pub fn new(
        orchestrator: Arc<LockOrchestrator>,
        schedule: SecureScheduleStore,
        store: Arc<dyn Store>,
        notifier: Arc<dyn NotificationSink>,
        tick_interval: Duration,
    ) -> Self {
        Self {
            orchestrator,
            schedule,
            store,
            notifier,
            tick_interval,
            tracker: NotificationTracker::new(),
            last_unusable: None,
            lock_failure: None,
        }
    }

    pub fn tracker(&self) -> &NotificationTracker {
        &self.tracker
    }

    /// Evaluate the schedule once at `now`
    pub async fn tick(&mut self, now: DateTime<Local>) -> Vec<CoreEvent> {
        let mut events = Vec::new();
        self.tracker.sync_epoch(self.orchestrator.epoch());

        // Read fresh every tick so edits by other processes apply
        let config = self.schedule.read();
        if !config.enabled {
            self.tracker.clear();
            self.lock_failure = None;
            return events;
        }

        let Some(window) = self.usable_window(&config, &mut events) else {
            self.lock_failure = None;
            return events;
        };

        let in_window = window.contains(&now);
        let current = self.orchestrator.current().await;

        match (in_window, current) {
            (true, None) => self.try_scheduled_lock(window, now, &mut events).await,
            (false, Some(snapshot)) if snapshot.reason == LockReason::Scheduled => {
                if let UnlockDecision::Released(snapshot) = self.orchestrator.unlock_scheduled().await {
                    info!(session_id = %snapshot.session_id, window = %window, "Lock window ended");
                    events.push(CoreEvent::LockReleased {
                        session_id: snapshot.session_id,
                    });
                }
            }
            (false, None) => {
                self.lock_failure = None;
                self.warn_if_due(&config, window, now, &mut events);
            }
            _ => self.lock_failure = None,
        }

        events
    }

    async fn try_scheduled_lock(&mut self, window: LockWindow, now: DateTime<Local>, events: &mut Vec<CoreEvent>) {
        if let Some(streak) = &self.lock_failure
            && now < streak.retry_at
        {
            return;
        }

        match self.orchestrator.lock(LockReason::Scheduled, Some(window)).await {
            Ok(LockDecision::Engaged(snapshot)) => {
                if let Some(streak) = self.lock_failure.take() {
                    info!(failures = streak.failures, "Scheduled lock engaged after earlier failures");
                }
                events.push(CoreEvent::LockEngaged {
                    session_id: snapshot.session_id,
                    window,
                });
            }
            // Something else locked between our check and the call
            Ok(LockDecision::AlreadyLocked(_)) => self.lock_failure = None,
            Err(e) => {
                let error = e.to_string();
                let failures = match self.lock_failure.take() {
                    Some(streak) if streak.error == error => {
                        debug!(error = %error, failures = streak.failures + 1, "Scheduled lock still failing");
                        streak.failures + 1
                    }
                    _ => {
                        warn!(error = %error, "Scheduled lock failed, will retry");
                        self.audit(AuditEventType::LockFailed {
                            reason: LockReason::Scheduled,
                            error: error.clone(),
                        });
                        events.push(CoreEvent::LockFailed { error: error.clone() });
                        1
                    }
                };
                self.lock_failure = Some(LockFailureStreak {
                    error,
                    failures,
                    retry_at: now + LockFailureStreak::backoff(failures),
                });
            }
        }
    }

    fn audit(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to write audit event");
        }
    }

    fn usable_window(&mut self, config: &ScheduleConfig, events: &mut Vec<CoreEvent>) -> Option<LockWindow> {
        match config.window() {
            Ok(window) => {
                self.last_unusable = None;
                Some(window)
            }
            Err(e) => {
                let bad = (config.start.clone(), config.end.clone());
                if self.last_unusable.as_ref() != Some(&bad) {
                    warn!(start = %bad.0, end = %bad.1, error = %e, "Stored schedule is unusable, skipping");
                    self.last_unusable = Some(bad.clone());
                }
                events.push(CoreEvent::ScheduleUnusable {
                    start: bad.0,
                    end: bad.1,
                });
                None
            }
        }
    }

    fn warn_if_due(
        &mut self,
        config: &ScheduleConfig,
        window: LockWindow,
        now: DateTime<Local>,
        events: &mut Vec<CoreEvent>,
    ) {
        let remaining = minutes_until(now.time(), window.start);

        for threshold in self.tracker.due(&config.notify_minutes, remaining) {
            info!(threshold, minutes_until = remaining, "Issuing lock warning");
            self.notifier.notify(LockNotice::Warning {
                minutes_remaining: threshold,
            });
            self.audit(AuditEventType::WarningIssued {
                minutes_remaining: threshold,
            });
            events.push(CoreEvent::Warning {
                minutes_remaining: threshold,
            });
        }
    }

    /// Tick until `shutdown` turns true or its sender goes away. The signal
    /// is only checked between ticks, so a transition in progress always
    /// finishes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(tick_ms = self.tick_interval.as_millis() as u64, "Scheduler running");

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = interval.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let events = self.tick(curfew_util::now()).await;
            if !events.is_empty() {
                debug!(events = ?events, "Scheduler tick");
            }
        }

        info!("Scheduler stopped");
    }
}
