//! User-facing notifications

use serde::{Deserialize, Serialize};

/// Something worth telling the person at the keyboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LockNotice {
    /// A scheduled lock starts in `minutes_remaining` minutes
    Warning { minutes_remaining: u32 },

    /// The session is now locked
    Engaged { scheduled: bool },

    /// The session is unlocked again
    Released,
}

impl LockNotice {
    /// Short title and body text for desktop notifications
    pub fn text(&self) -> (String, String) {
        match self {
            LockNotice::Warning { minutes_remaining: 0 | 1 } => (
                "Locking in 1 minute".into(),
                "Your desktop will be locked in 1 minute.".into(),
            ),
            LockNotice::Warning { minutes_remaining } => (
                format!("Locking in {} minutes", minutes_remaining),
                format!("Your desktop will be locked in {} minutes.", minutes_remaining),
            ),
            LockNotice::Engaged { .. } => ("Desktop locked".into(), "Enter your password to unlock.".into()),
            LockNotice::Released => ("Desktop unlocked".into(), "Welcome back!".into()),
        }
    }
}

/// Notification sink. Delivery is fire-and-forget: implementations must not
/// block and must swallow their own failures.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: LockNotice);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warning_text_singular_and_plural() {
        let (title, _) = LockNotice::Warning { minutes_remaining: 1 }.text();
        assert_eq!(title, "Locking in 1 minute");

        let (title, body) = LockNotice::Warning { minutes_remaining: 5 }.text();
        assert_eq!(title, "Locking in 5 minutes");
        assert!(body.contains("5 minutes"));
    }
}
