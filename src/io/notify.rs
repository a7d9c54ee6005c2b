//! Desktop notification sink
//!
//! Notifications are fire-and-forget: the state machine spawns delivery and
//! only logs failures.

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification failed: {0}")]
    Failed(String),
    #[error("osascript error: {0}")]
    Osascript(String),
}

/// A notification to display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub subtitle: Option<String>,
    pub message: String,
}

impl Notification {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), subtitle: None, message: message.into() }
    }

    pub fn with_subtitle(mut self, subtitle: impl Into<String>) -> Self {
        self.subtitle = Some(subtitle.into());
        self
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError>;
}

/// macOS notification via osascript
#[derive(Clone, Debug, Default)]
pub struct OsascriptNotifier;

impl OsascriptNotifier {
    fn build_script(notification: &Notification) -> String {
        let mut script = format!(
            r#"display notification "{}" with title "{}""#,
            escape_applescript(&notification.message),
            escape_applescript(&notification.title),
        );
        if let Some(subtitle) = &notification.subtitle {
            script.push_str(&format!(r#" subtitle "{}""#, escape_applescript(subtitle)));
        }
        script
    }
}

#[async_trait]
impl Notifier for OsascriptNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        let script = Self::build_script(&notification);
        let output = Command::new("osascript")
            .arg("-e")
            .arg(&script)
            .output()
            .await
            .map_err(|e| NotifyError::Failed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(NotifyError::Osascript(stderr.to_string()));
        }
        debug!(title = %notification.title, "notification_sent");
        Ok(())
    }
}

/// Writes notifications to the log instead of the desktop
#[derive(Clone, Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        info!(
            title = %notification.title,
            subtitle = %notification.subtitle.as_deref().unwrap_or_default(),
            message = %notification.message,
            "notification"
        );
        Ok(())
    }
}

/// Escape special characters for AppleScript strings
fn escape_applescript(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Records notifications, for tests
#[cfg(test)]
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: std::sync::Arc<parking_lot::Mutex<Vec<Notification>>>,
}

#[cfg(test)]
impl RecordingNotifier {
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<(), NotifyError> {
        self.sent.lock().push(notification);
        Ok(())
    }
}
