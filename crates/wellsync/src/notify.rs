//! User-facing notifications.
//!
//! Notifications are observational: they never gate a mutation, and sending
//! with no subscribers is fine.

use serde::Serialize;
use tokio::sync::broadcast;

use wellsync_core::activity::ActivityId;

use crate::error::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationLevel {
    Success,
    Error,
    Info,
}

/// An outcome described in domain terms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    /// The local operation that settled. `None` for changes made elsewhere.
    pub operation: Option<Operation>,
    pub activity_id: Option<ActivityId>,
    pub message: String,
}

/// Broadcasts notifications and mirrors them to the log.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub fn success(&self, operation: Operation, activity_id: ActivityId, message: impl Into<String>) {
        self.emit(Notification {
            level: NotificationLevel::Success,
            operation: Some(operation),
            activity_id: Some(activity_id),
            message: message.into(),
        });
    }

    pub fn error(&self, operation: Operation, activity_id: ActivityId, message: impl Into<String>) {
        self.emit(Notification {
            level: NotificationLevel::Error,
            operation: Some(operation),
            activity_id: Some(activity_id),
            message: message.into(),
        });
    }

    pub fn info(&self, activity_id: Option<ActivityId>, message: impl Into<String>) {
        self.emit(Notification {
            level: NotificationLevel::Info,
            operation: None,
            activity_id,
            message: message.into(),
        });
    }

    fn emit(&self, notification: Notification) {
        let activity_id = notification
            .activity_id
            .map(|id| id.to_string())
            .unwrap_or_default();
        match notification.level {
            NotificationLevel::Error => tracing::warn!(
                activity_id = %activity_id,
                operation = ?notification.operation,
                message = %notification.message,
                "Mutation failed"
            ),
            NotificationLevel::Success | NotificationLevel::Info => tracing::info!(
                activity_id = %activity_id,
                operation = ?notification.operation,
                message = %notification.message,
                "Notification"
            ),
        }

        // No receivers just means nobody is listening right now.
        let _ = self.tx.send(notification);
    }
}
