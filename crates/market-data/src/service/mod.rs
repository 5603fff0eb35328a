//! The fetch layer's context object.
//!
//! `MarketDataService` is built once at start-up and owns every component:
//! quota tracker, circuit breaker, router, retry queue, optimizer,
//! recovery orchestrator, synthetic fallback and the background scheduler.
//! Callers only see `fetch_data` and `get_batch_quotes`.

mod health;

pub use health::{HealthReport, HealthStatus, ProviderHealth};

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::oneshot::error::TryRecvError;

use crate::cache::{CacheStore, MemoryCache};
use crate::clock::{SharedClock, SystemClock};
use crate::config::MarketDataConfig;
use crate::errors::MarketDataError;
use crate::fallback::InvisibleFallback;
use crate::models::{BatchQuotes, DataType, FetchRequest, MarketData, Payload, Priority, Quote};
use crate::optimizer::{BatchOptimizer, BatchResult};
use crate::provider::MarketDataProvider;
use crate::queue::RetryQueue;
use crate::recovery::{NotificationSink, Recovered, RecoveryOrchestrator};
use crate::registry::{
    CircuitBreaker, JsonFileStore, MemoryStore, PersistentStore, ProviderDescriptor, QuotaTracker,
};
use crate::router::FallbackRouter;
use crate::scheduler::{Scheduler, SchedulerTasks};

pub struct MarketDataService {
    router: Arc<FallbackRouter>,
    queue: Arc<RetryQueue>,
    optimizer: Arc<BatchOptimizer>,
    recovery: RecoveryOrchestrator,
    fallback: Arc<InvisibleFallback>,
    scheduler: Scheduler,
    clock: SharedClock,
    request_timeout: Duration,
}

impl MarketDataService {
    /// Build from configuration with the system clock, an in-memory cache
    /// and the configured usage store.
    pub fn new(config: MarketDataConfig) -> Self {
        let clock: SharedClock = Arc::new(SystemClock);
        let store: Arc<dyn PersistentStore> = match &config.usage_store_path {
            Some(path) => Arc::new(JsonFileStore::with_namespace(
                path.clone(),
                config.storage_namespace.clone(),
            )),
            None => Arc::new(MemoryStore::new()),
        };
        let providers = config.build_providers(&clock);
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        Self::with_parts(config, providers, store, cache, clock)
    }

    /// Build from explicit collaborators.
    pub fn with_parts(
        config: MarketDataConfig,
        providers: Vec<(Arc<dyn MarketDataProvider>, ProviderDescriptor)>,
        store: Arc<dyn PersistentStore>,
        cache: Arc<dyn CacheStore>,
        clock: SharedClock,
    ) -> Self {
        let (adapters, descriptors): (Vec<_>, Vec<_>) = providers.into_iter().unzip();
        info!(
            "Market data service: {} providers ({})",
            descriptors.len(),
            descriptors
                .iter()
                .map(|d| d.id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let quota = Arc::new(QuotaTracker::new(descriptors, store, clock.clone()));
        let breaker = Arc::new(CircuitBreaker::with_config(
            config.circuit.clone(),
            clock.clone(),
        ));
        let router = Arc::new(FallbackRouter::new(
            adapters,
            config.strategies.clone(),
            quota,
            breaker,
            cache,
            clock.clone(),
        ));
        let queue = Arc::new(RetryQueue::new(
            router.clone(),
            config.retry_queue.clone(),
            clock.clone(),
        ));
        let optimizer = Arc::new(BatchOptimizer::new(
            router.clone(),
            config.optimizer.clone(),
            clock.clone(),
        ));
        let recovery = RecoveryOrchestrator::new(router.clone(), queue.clone(), clock.clone());
        let fallback = Arc::new(InvisibleFallback::new(config.fallback.clone(), clock.clone()));

        Self {
            router,
            queue,
            optimizer,
            recovery,
            fallback,
            scheduler: Scheduler::new(config.health_check_interval),
            clock,
            request_timeout: config.request_timeout,
        }
    }

    /// Route recovery notifications to `sink`.
    pub fn with_notification_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.recovery = self.recovery.with_sink(sink);
        self
    }

    /// Replace the recovery orchestrator, e.g. to change per-provider actions.
    pub fn with_recovery(mut self, recovery: RecoveryOrchestrator) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn router(&self) -> &Arc<FallbackRouter> {
        &self.router
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    pub fn optimizer(&self) -> &Arc<BatchOptimizer> {
        &self.optimizer
    }

    pub fn fallback(&self) -> &Arc<InvisibleFallback> {
        &self.fallback
    }

    /// Start the background tickers. Requires a tokio runtime.
    pub fn start(&self) {
        self.scheduler.start(SchedulerTasks {
            router: self.router.clone(),
            queue: self.queue.clone(),
            optimizer: self.optimizer.clone(),
            fallback: self.fallback.clone(),
            clock: self.clock.clone(),
        });
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_running()
    }

    /// Fetch one dataset.
    ///
    /// Order: cache and providers through the router, then the recovery
    /// action for a quota failure, then the last cached value, then
    /// synthetic data. The last two only apply when the request accepts a
    /// fallback; otherwise the caller gets a typed error. The whole call,
    /// including a wait on a deferred retry, is bounded by the request
    /// timeout. A retry is only awaited while the scheduler drains the queue.
    pub async fn fetch_data(&self, request: FetchRequest) -> Result<MarketData, MarketDataError> {
        let deadline = tokio::time::Instant::now() + self.request_timeout;
        let timed_out = MarketDataError::RequestTimeout {
            waited: self.request_timeout,
        };
        let routed = self.route_and_recover(&request);
        let failure = match tokio::time::timeout_at(deadline, routed).await {
            Ok(Outcome::Data(data)) => return Ok(data),
            Ok(Outcome::Deferred(handle)) => {
                // A late success still lands in the cache through the queue
                return match tokio::time::timeout_at(deadline, handle.wait()).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(
                            "Deferred {} still queued after {:?}",
                            request.cache_key(),
                            self.request_timeout
                        );
                        Err(timed_out)
                    }
                };
            }
            Ok(Outcome::Failed(error)) => error,
            Err(_) => timed_out,
        };

        if !request.fallback_acceptable {
            return Err(failure);
        }
        if let Some(stale) = self.router.stale(&request) {
            debug!("Serving stale {} after: {}", request.cache_key(), failure);
            return Ok(stale);
        }
        debug!(
            "Serving synthetic {} {} after: {}",
            request.data_type, request.symbol, failure
        );
        Ok(self.fallback.generate(request.data_type, &request.symbol))
    }

    async fn route_and_recover(&self, request: &FetchRequest) -> Outcome {
        let failure = match self.router.route(request).await {
            Ok(data) => return Outcome::Data(data),
            Err(failure) => failure,
        };
        debug!(
            "Routing {} failed: {}",
            request.cache_key(),
            failure.diagnostics.summary()
        );

        if let Some(quota_error) = failure.quota_error.clone() {
            match self.recovery.recover(&quota_error, request).await {
                Ok(Recovered::Data(data)) => return Outcome::Data(data),
                // Left on the queue; its success still lands in the cache
                Ok(Recovered::Deferred(_)) if request.fallback_acceptable => {}
                Ok(Recovered::Deferred(_)) if !self.scheduler.is_running() => {
                    debug!(
                        "Retry queue is not draining, not waiting on {}",
                        request.cache_key()
                    );
                }
                Ok(Recovered::Deferred(handle)) => return Outcome::Deferred(handle),
                Err(error) => debug!("Recovery for {} failed: {}", request.cache_key(), error),
            }
        }
        Outcome::Failed(failure.into_error(request))
    }

    /// Quotes for many symbols: fresh cache entries first, then one
    /// optimizer request for the rest. Symbols whose batch could not run
    /// get synthetic quotes; symbols a provider answered without data are
    /// reported in `failed`.
    pub async fn get_batch_quotes(&self, symbols: &[String]) -> BatchQuotes {
        let mut seen = HashSet::new();
        let symbols: Vec<String> = symbols
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty() && seen.insert(s.clone()))
            .collect();

        let mut quotes: HashMap<String, Quote> = HashMap::new();
        let mut missing = Vec::new();
        for symbol in &symbols {
            let request = FetchRequest::new(symbol.clone(), DataType::Quote);
            match self.router.cached(&request).and_then(|d| d.quote().cloned()) {
                Some(quote) => {
                    quotes.insert(symbol.clone(), quote);
                }
                None => missing.push(symbol.clone()),
            }
        }

        let mut failed = Vec::new();
        if !missing.is_empty() {
            let unresolved = match self.batch(&missing).await {
                Ok(result) => {
                    failed = result.failed;
                    for (symbol, data) in result.data {
                        if let Payload::Quote(quote) = data.payload {
                            quotes.insert(symbol, quote);
                        }
                    }
                    missing
                        .into_iter()
                        .filter(|s| !quotes.contains_key(s) && !failed.contains(s))
                        .collect::<Vec<_>>()
                }
                Err(error) => {
                    warn!("Batch quotes for {} symbols failed: {}", missing.len(), error);
                    missing
                }
            };
            for symbol in unresolved {
                let quote = self.fallback.quote(&symbol);
                quotes.insert(symbol, quote);
            }
        }

        BatchQuotes {
            quotes,
            failed,
            timestamp: self.clock.now(),
        }
    }

    async fn batch(&self, symbols: &[String]) -> Result<BatchResult, MarketDataError> {
        if self.scheduler.is_running() {
            return self
                .optimizer
                .add_request(DataType::Quote, symbols, Priority::Medium, None)
                .await;
        }

        // No window ticker: run one window inline and cache what it returned
        let mut receiver = self
            .optimizer
            .submit(DataType::Quote, symbols, Priority::Medium, None);
        self.optimizer.run_window().await;
        match receiver.try_recv() {
            Ok(Ok(result)) => {
                for data in result.data.values() {
                    self.router.store(data);
                }
                Ok(result)
            }
            Ok(Err(message)) => Err(MarketDataError::BatchFailed { message }),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => {
                Err(MarketDataError::BatchFailed {
                    message: "batch not completed in this window".to_string(),
                })
            }
        }
    }

    /// Provider health, computed now.
    pub fn health(&self) -> HealthReport {
        HealthReport::collect(
            &self.router,
            self.queue.len(),
            self.optimizer.pending(),
            self.clock.now(),
        )
    }

    /// Synthetic quotes for every curated symbol.
    pub fn fallback_snapshot(&self) -> Vec<Quote> {
        self.fallback.snapshot()
    }
}

enum Outcome {
    Data(MarketData),
    Deferred(crate::queue::RetryHandle),
    Failed(MarketDataError),
}
