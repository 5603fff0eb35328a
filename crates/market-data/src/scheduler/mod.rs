//! Background tickers.
//!
//! One task per timer: the retry queue drain, the batch window, the
//! fallback walk and the health check. A fifth task listens for completed
//! batches and writes their data through the cache. Everything is started
//! and stopped together.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::clock::SharedClock;
use crate::fallback::InvisibleFallback;
use crate::optimizer::{BatchOptimizer, OptimizerEvent};
use crate::queue::RetryQueue;
use crate::router::FallbackRouter;
use crate::service::{HealthReport, HealthStatus};

/// Components the background tasks drive.
#[derive(Clone)]
pub struct SchedulerTasks {
    pub router: Arc<FallbackRouter>,
    pub queue: Arc<RetryQueue>,
    pub optimizer: Arc<BatchOptimizer>,
    pub fallback: Arc<InvisibleFallback>,
    pub clock: SharedClock,
}

pub struct Scheduler {
    health_check_interval: Duration,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(health_check_interval: Duration) -> Self {
        Self {
            health_check_interval,
            handles: Mutex::new(Vec::new()),
        }
    }

    fn lock_handles(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.handles.lock().unwrap_or_else(|poisoned| {
            warn!("Scheduler mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    pub fn is_running(&self) -> bool {
        !self.lock_handles().is_empty()
    }

    /// Spawn every ticker. Must be called from within a tokio runtime. A
    /// second call while running is a no-op.
    pub fn start(&self, tasks: SchedulerTasks) {
        let mut handles = self.lock_handles();
        if !handles.is_empty() {
            debug!("Scheduler already running");
            return;
        }

        handles.push(spawn_queue_drain(tasks.queue.clone()));
        handles.push(spawn_batch_window(tasks.optimizer.clone()));
        handles.push(spawn_fallback_walk(tasks.fallback.clone()));
        handles.push(spawn_health_check(tasks.clone(), self.health_check_interval));
        handles.push(spawn_cache_warming(tasks.router.clone(), &tasks.optimizer));

        info!(
            "Scheduler started (queue {:?}, batch window {:?}, health {:?})",
            tasks.queue.tick_interval(),
            tasks.optimizer.window(),
            self.health_check_interval
        );
    }

    /// Abort every ticker. In-flight provider calls are dropped.
    pub fn stop(&self) {
        let handles: Vec<_> = self.lock_handles().drain(..).collect();
        if handles.is_empty() {
            return;
        }
        for handle in &handles {
            handle.abort();
        }
        info!("Scheduler stopped ({} tasks)", handles.len());
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn ticker(period: Duration) -> tokio::time::Interval {
    let mut ticker = interval(period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

fn spawn_queue_drain(queue: Arc<RetryQueue>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = ticker(queue.tick_interval());
        loop {
            ticks.tick().await;
            if queue.is_empty() {
                continue;
            }
            let report = queue.process_due().await;
            if report.processed > 0 {
                debug!(
                    "Retry queue: {} processed, {} succeeded, {} requeued, {} rejected",
                    report.processed, report.succeeded, report.requeued, report.rejected
                );
            }
        }
    })
}

fn spawn_batch_window(optimizer: Arc<BatchOptimizer>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = ticker(optimizer.window());
        loop {
            ticks.tick().await;
            if optimizer.pending() > 0 {
                optimizer.run_window().await;
            }
        }
    })
}

fn spawn_fallback_walk(fallback: Arc<InvisibleFallback>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = ticker(fallback.tick_interval());
        loop {
            ticks.tick().await;
            fallback.tick();
        }
    })
}

fn spawn_health_check(tasks: SchedulerTasks, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticks = ticker(period);
        loop {
            ticks.tick().await;
            let report = HealthReport::collect(
                &tasks.router,
                tasks.queue.len(),
                tasks.optimizer.pending(),
                tasks.clock.now(),
            );
            match report.status {
                HealthStatus::Healthy => info!("Health check: {}", report.summary()),
                HealthStatus::Degraded | HealthStatus::Fallback => {
                    warn!("Health check: {}", report.summary())
                }
            }
        }
    })
}

fn spawn_cache_warming(router: Arc<FallbackRouter>, optimizer: &BatchOptimizer) -> JoinHandle<()> {
    let mut events = optimizer.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OptimizerEvent::BatchCompleted { batch, data }) => {
                    for item in &data {
                        router.store(item);
                    }
                    debug!(
                        "Cache warmed with {} {} entries from '{}'",
                        data.len(),
                        batch.endpoint,
                        batch.provider
                    );
                }
                Ok(OptimizerEvent::BatchFailed { .. }) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Cache warming lagged, {} batch events skipped", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStore, MemoryCache};
    use crate::clock::ManualClock;
    use crate::fallback::FallbackConfig;
    use crate::models::{DataType, Priority};
    use crate::optimizer::OptimizerConfig;
    use crate::provider::{MarketDataProvider, MockProvider};
    use crate::queue::RetryQueueConfig;
    use crate::registry::{CircuitBreaker, MemoryStore, ProviderDescriptor, QuotaTracker};
    use crate::strategy::{CachePolicy, Strategy, StrategyTable};

    fn tasks() -> (SchedulerTasks, Arc<MemoryCache>) {
        let clock = Arc::new(ManualClock::default());
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let quota = Arc::new(QuotaTracker::new(
            vec![ProviderDescriptor::new("mock", &DataType::ALL, u32::MAX)
                .batch_size(100)
                .synthetic(true)],
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));
        let providers: Vec<Arc<dyn MarketDataProvider>> =
            vec![Arc::new(MockProvider::with_seed(3, clock.clone()))];
        let router = Arc::new(FallbackRouter::new(
            providers,
            StrategyTable::empty().with(
                DataType::Quote,
                Strategy::new(&["mock"], CachePolicy::Normal),
            ),
            quota,
            Arc::new(CircuitBreaker::new()),
            cache.clone(),
            clock.clone(),
        ));
        let tasks = SchedulerTasks {
            queue: Arc::new(RetryQueue::new(
                router.clone(),
                RetryQueueConfig::default(),
                clock.clone(),
            )),
            optimizer: Arc::new(BatchOptimizer::new(
                router.clone(),
                OptimizerConfig::default(),
                clock.clone(),
            )),
            fallback: Arc::new(InvisibleFallback::new(FallbackConfig::default(), clock.clone())),
            router,
            clock,
        };
        (tasks, cache)
    }

    #[tokio::test]
    async fn test_start_and_stop() {
        let (tasks, _) = tasks();
        let scheduler = Scheduler::new(Duration::from_secs(300));
        assert!(!scheduler.is_running());

        scheduler.start(tasks.clone());
        assert!(scheduler.is_running());
        // Idempotent
        scheduler.start(tasks);
        assert_eq!(scheduler.lock_handles().len(), 5);

        scheduler.stop();
        assert!(!scheduler.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_window_runs_and_warms_cache() {
        let (tasks, cache) = tasks();
        let scheduler = Scheduler::new(Duration::from_secs(300));
        scheduler.start(tasks.clone());

        let symbols = vec!["AAPL".to_string(), "MSFT".to_string()];
        let result = tasks
            .optimizer
            .add_request(DataType::Quote, &symbols, Priority::High, None)
            .await
            .unwrap();
        assert_eq!(result.data.len(), 2);

        // Let the warming task drain the event
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(cache.get("quote:AAPL", "quote").is_some());
        scheduler.stop();
    }
}
