//! Quota error classification and recovery.
//!
//! - `classifier` - provider message patterns to typed quota errors
//! - `orchestrator` - one recovery action per (provider, error kind)
//! - `backoff` - exponential delays for the retry action
//! - `notifications` - advisory observer callbacks

mod backoff;
mod classifier;
mod notifications;
mod orchestrator;

pub use backoff::Backoff;
pub use classifier::{extract_retry_after, QuotaError, QuotaErrorClassifier};
pub use notifications::{CollectingSink, LoggingSink, Notification, NotificationSink, Severity};
pub use orchestrator::{Recovered, RecoveryAction, RecoveryOrchestrator, RecoveryStrategy};
