//! Notification delivery boundary.

use std::io::Write;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::Settings;


#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}


#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}


/// Platform capability that shows alerts to the user.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn is_permission_granted(&self) -> bool;

    async fn request_permission(&self) -> PermissionStatus;

    async fn send_notification(&self, title: &str, body: &str) -> Result<(), NotifyError>;
}


/// Terminal notifier: writes alerts to stderr.
///
/// Permission follows the `notifications` setting and is denied when it is off.
pub struct StderrNotifier {
    enabled: bool,
}


impl StderrNotifier {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(settings.notifications_enabled())
    }
}


#[async_trait]
impl Notifier for StderrNotifier {
    async fn is_permission_granted(&self) -> bool {
        self.enabled
    }

    async fn request_permission(&self) -> PermissionStatus {
        if self.enabled {
            PermissionStatus::Granted
        } else {
            PermissionStatus::Denied
        }
    }

    async fn send_notification(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        let mut stderr = std::io::stderr().lock();
        writeln!(stderr, "\x1b[1m\x1b[31m{title}\x1b[0m")?;
        writeln!(stderr, "{body}")?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_permission_follows_setting() {
        let mut settings = Settings::default();
        let notifier = StderrNotifier::from_settings(&settings);
        assert!(notifier.is_permission_granted().await);
        assert_eq!(notifier.request_permission().await, PermissionStatus::Granted);

        settings.extra.insert("notifications".to_string(), "off".to_string());
        let notifier = StderrNotifier::from_settings(&settings);
        assert!(!notifier.is_permission_granted().await);
        assert_eq!(notifier.request_permission().await, PermissionStatus::Denied);
    }
}
