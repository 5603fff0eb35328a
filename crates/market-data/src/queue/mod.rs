//! Deferred retry queue.
//!
//! Requests that hit a throttle are parked here until the provider is worth
//! asking again. Items are kept sorted by due time and drained on a tick;
//! each drained item is removed before it is retried and goes back in only
//! if the retry fails and attempts remain.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::clock::{after, SharedClock};
use crate::errors::MarketDataError;
use crate::models::{FetchRequest, MarketData, Priority};
use crate::router::FallbackRouter;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryQueueConfig {
    /// How often due items are drained.
    pub tick_interval: Duration,
    /// Re-enqueue delay per failed attempt (`base_delay * attempts`).
    pub base_delay: Duration,
    /// Tries before an item is rejected for good.
    pub max_attempts: u32,
    /// Pause between items drained in one tick.
    pub item_spacing: Duration,
}

impl Default for RetryQueueConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(5),
            base_delay: Duration::from_secs(30),
            max_attempts: 3,
            item_spacing: Duration::from_millis(250),
        }
    }
}

type Responder = oneshot::Sender<Result<MarketData, MarketDataError>>;

/// A deferred request.
#[derive(Debug)]
pub struct QueuedRequest {
    pub id: Uuid,
    pub request: FetchRequest,
    /// Provider whose throttle caused the deferral.
    pub provider: Option<String>,
    pub due_at: DateTime<Utc>,
    pub attempts: u32,
    responder: Option<Responder>,
}

impl QueuedRequest {
    fn resolve(&mut self, result: Result<MarketData, MarketDataError>) {
        if let Some(responder) = self.responder.take() {
            // The caller may have stopped waiting
            let _ = responder.send(result);
        }
    }
}

/// Pending result of a queued request.
#[derive(Debug)]
pub struct RetryHandle {
    id: Uuid,
    symbol: String,
    receiver: oneshot::Receiver<Result<MarketData, MarketDataError>>,
}

impl RetryHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait until the request succeeds or is rejected.
    pub async fn wait(self) -> Result<MarketData, MarketDataError> {
        self.receiver
            .await
            .unwrap_or_else(|_| {
                Err(MarketDataError::QueueRejected {
                    symbol: self.symbol,
                    attempts: 0,
                    reason: "retry queue dropped the request".to_string(),
                })
            })
    }
}

/// Outcome of one drain.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueTickReport {
    pub processed: usize,
    pub succeeded: usize,
    pub requeued: usize,
    pub rejected: usize,
}

/// Snapshot for health reporting.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedItem {
    pub id: Uuid,
    pub symbol: String,
    pub data_type: String,
    pub provider: Option<String>,
    pub due_at: DateTime<Utc>,
    pub attempts: u32,
}

pub struct RetryQueue {
    items: Mutex<Vec<QueuedRequest>>,
    router: Arc<FallbackRouter>,
    config: RetryQueueConfig,
    clock: SharedClock,
}

impl RetryQueue {
    pub fn new(router: Arc<FallbackRouter>, config: RetryQueueConfig, clock: SharedClock) -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            router,
            config,
            clock,
        }
    }

    fn lock_items(&self) -> MutexGuard<'_, Vec<QueuedRequest>> {
        self.items.lock().unwrap_or_else(|poisoned| {
            warn!("Retry queue mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Insert keeping non-decreasing due order; equal due times stay FIFO.
    fn insert(&self, item: QueuedRequest) {
        let mut items = self.lock_items();
        let at = items.partition_point(|queued| queued.due_at <= item.due_at);
        items.insert(at, item);
    }

    /// Defer `request` for `delay`.
    pub fn enqueue(
        &self,
        request: FetchRequest,
        provider: Option<String>,
        delay: Duration,
    ) -> RetryHandle {
        let (sender, receiver) = oneshot::channel();
        let id = Uuid::new_v4();
        let due_at = after(self.clock.now(), delay);
        info!(
            "Retry queue: deferring {} {} for {}s (provider {:?})",
            request.data_type,
            request.symbol,
            delay.as_secs(),
            provider
        );
        let handle = RetryHandle {
            id,
            symbol: request.symbol.clone(),
            receiver,
        };
        self.insert(QueuedRequest {
            id,
            request,
            provider,
            due_at,
            attempts: 0,
            responder: Some(sender),
        });
        handle
    }

    pub fn len(&self) -> usize {
        self.lock_items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Due time of the earliest item.
    pub fn next_due(&self) -> Option<DateTime<Utc>> {
        self.lock_items().first().map(|item| item.due_at)
    }

    pub fn items(&self) -> Vec<QueuedItem> {
        self.lock_items()
            .iter()
            .map(|item| QueuedItem {
                id: item.id,
                symbol: item.request.symbol.clone(),
                data_type: item.request.data_type.to_string(),
                provider: item.provider.clone(),
                due_at: item.due_at,
                attempts: item.attempts,
            })
            .collect()
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }

    /// Remove every item whose due time has passed, in due order.
    fn take_due(&self, now: DateTime<Utc>) -> Vec<QueuedRequest> {
        let mut items = self.lock_items();
        let ready = items.partition_point(|item| item.due_at <= now);
        items.drain(..ready).collect()
    }

    /// Retry due items through the router at low priority, one at a time.
    pub async fn process_due(&self) -> QueueTickReport {
        let ready = self.take_due(self.clock.now());
        let mut report = QueueTickReport::default();
        if ready.is_empty() {
            return report;
        }
        debug!("Retry queue: {} items due", ready.len());

        let total = ready.len();
        for (index, mut item) in ready.into_iter().enumerate() {
            report.processed += 1;
            let request = item.request.clone().priority(Priority::Low);

            match self.router.route(&request).await {
                Ok(data) => {
                    info!(
                        "Retry queue: {} {} succeeded via '{}'",
                        request.data_type, request.symbol, data.source
                    );
                    report.succeeded += 1;
                    item.resolve(Ok(data));
                }
                Err(failure) => {
                    item.attempts += 1;
                    if item.attempts >= self.config.max_attempts {
                        warn!(
                            "Retry queue: rejecting {} {} after {} attempts",
                            request.data_type, request.symbol, item.attempts
                        );
                        report.rejected += 1;
                        let reason = failure
                            .last_error
                            .map(|e| e.to_string())
                            .unwrap_or_else(|| failure.diagnostics.summary());
                        let attempts = item.attempts;
                        item.resolve(Err(MarketDataError::QueueRejected {
                            symbol: request.symbol.clone(),
                            attempts,
                            reason,
                        }));
                    } else {
                        let delay = self.config.base_delay * item.attempts;
                        item.due_at = after(self.clock.now(), delay);
                        info!(
                            "Retry queue: re-enqueued {} {} (attempt {}) for {}s",
                            request.data_type,
                            request.symbol,
                            item.attempts,
                            delay.as_secs()
                        );
                        report.requeued += 1;
                        self.insert(item);
                    }
                }
            }

            if index + 1 < total && !self.config.item_spacing.is_zero() {
                tokio::time::sleep(self.config.item_spacing).await;
            }
        }
        report
    }
}
