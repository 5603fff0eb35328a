//! Advisory notifications raised by recovery strategies.
//!
//! Sinks are fire-and-forget. A slow or failing sink never affects the
//! data path.

use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::errors::QuotaErrorKind;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A user-facing message about provider trouble.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub severity: Severity,
    pub message: String,
    pub provider: String,
    pub kind: QuotaErrorKind,
    pub raised_at: DateTime<Utc>,
}

/// Observer for recovery notifications.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notification: Notification);
}

/// Writes notifications to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingSink;

impl NotificationSink for LoggingSink {
    fn notify(&self, notification: Notification) {
        match notification.severity {
            Severity::Info => info!(
                "Notice [{}/{}]: {}",
                notification.provider, notification.kind, notification.message
            ),
            Severity::Warning | Severity::Error => warn!(
                "Notice [{}/{}]: {}",
                notification.provider, notification.kind, notification.message
            ),
        }
    }
}

/// Keeps every notification in memory.
#[derive(Debug, Default)]
pub struct CollectingSink {
    received: Mutex<Vec<Notification>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_received(&self) -> MutexGuard<'_, Vec<Notification>> {
        self.received.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock_received().clone()
    }

    pub fn len(&self) -> usize {
        self.lock_received().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for CollectingSink {
    fn notify(&self, notification: Notification) {
        self.lock_received().push(notification);
    }
}
