//! Desktop notifications via `notify-send`

use curfew_host_api::{LockNotice, NotificationSink};
use tokio::process::Command;
use tracing::{debug, warn};

/// Sends notices to the freedesktop notification daemon
///
/// Each notice is delivered from its own task so the caller never waits on
/// the notification daemon.
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    program: String,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            program: "notify-send".into(),
        }
    }

    fn args(notice: &LockNotice) -> Vec<String> {
        let (title, body) = notice.text();
        let urgency = match notice {
            LockNotice::Warning { minutes_remaining } if *minutes_remaining <= 1 => "critical",
            _ => "normal",
        };
        vec![
            "--app-name=curfew".into(),
            format!("--urgency={}", urgency),
            title,
            body,
        ]
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl NotificationSink for DesktopNotifier {
    fn notify(&self, notice: LockNotice) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(?notice, "No runtime, dropping notification");
            return;
        };

        let program = self.program.clone();
        let args = Self::args(&notice);
        runtime.spawn(async move {
            match Command::new(&program).args(&args).status().await {
                Ok(status) if status.success() => debug!(?notice, "Notification sent"),
                Ok(status) => warn!(?notice, %status, "Notification command failed"),
                Err(e) => warn!(?notice, error = %e, "Failed to run notification command"),
            }
        });
    }
}
