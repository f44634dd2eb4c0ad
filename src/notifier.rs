//! User-facing notifications raised by the health monitor

use serde::Serialize;
use tracing::{error, info, warn};

use crate::traits::UserNotifier;

/// Severity of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Error,
}

/// What happened, from the user's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    /// Cached data was dropped and is being reloaded
    CacheRefreshed,
    /// Automatic recovery gave up; the user should reload or reauthenticate
    ReloadRequired,
}

/// A notification shown to the user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub level: NotificationLevel,
    pub title: String,
    pub message: String,
    /// Stays visible until the user acts on it
    pub persistent: bool,
}

impl Notification {
    /// Notification sent after a successful recovery pass
    #[must_use]
    pub fn cache_refreshed(attempt: u32) -> Self {
        Self {
            kind: NotificationKind::CacheRefreshed,
            level: NotificationLevel::Info,
            title: "Data refreshed".to_string(),
            message: format!(
                "Cached data was reset to recover from errors (attempt {attempt}). Fresh data is loading."
            ),
            persistent: false,
        }
    }

    /// Notification sent once automatic recovery is exhausted
    #[must_use]
    pub fn reload_required(attempts: u32) -> Self {
        Self {
            kind: NotificationKind::ReloadRequired,
            level: NotificationLevel::Error,
            title: "Connection problem".to_string(),
            message: format!(
                "Data could not be recovered after {attempts} attempts. Please reload the page or sign in again."
            ),
            persistent: true,
        }
    }
}

/// Default notifier: renders notifications as log events
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl UserNotifier for TracingNotifier {
    fn notify(&self, notification: Notification) {
        match notification.level {
            NotificationLevel::Info => {
                info!(title = %notification.title, "{}", notification.message);
            }
            NotificationLevel::Warning => {
                warn!(title = %notification.title, "{}", notification.message);
            }
            NotificationLevel::Error => {
                error!(
                    title = %notification.title,
                    persistent = notification.persistent,
                    "{}",
                    notification.message
                );
            }
        }
    }
}
