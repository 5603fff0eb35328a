//! Recovery orchestration after a quota failure.
//!
//! Each (provider, error kind) pair maps to one immediate action. Pairs
//! without an explicit entry use the per-kind default.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::backoff::Backoff;
use super::classifier::QuotaError;
use super::notifications::{LoggingSink, Notification, NotificationSink, Severity};
use crate::clock::SharedClock;
use crate::errors::{MarketDataError, QuotaErrorKind};
use crate::models::{
    FetchRequest, MarketData, PROVIDER_ALPHA_VANTAGE, PROVIDER_FINNHUB, PROVIDER_FMP,
    PROVIDER_TWELVE_DATA,
};
use crate::queue::{RetryHandle, RetryQueue};
use crate::router::FallbackRouter;

/// The single action a recovery strategy takes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RecoveryAction {
    /// Re-attempt the same provider with backoff.
    Retry { max_attempts: u32, backoff: Backoff },
    /// Hand the request to a named alternate provider.
    Fallback { provider: String },
    /// Serve the last cached value, tagged stale.
    Cache,
    /// Defer onto the retry queue for the error's `retry_after`.
    Queue,
}

/// Action plus an optional advisory notification.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecoveryStrategy {
    pub action: RecoveryAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notification: Option<(Severity, String)>,
}

impl RecoveryStrategy {
    pub fn new(action: RecoveryAction) -> Self {
        Self {
            action,
            notification: None,
        }
    }

    pub fn notify(mut self, severity: Severity, message: impl Into<String>) -> Self {
        self.notification = Some((severity, message.into()));
        self
    }
}

/// What a recovery produced.
#[derive(Debug)]
pub enum Recovered {
    Data(MarketData),
    /// Parked on the retry queue. The handle resolves when a retry succeeds
    /// or the item is rejected.
    Deferred(RetryHandle),
}

pub struct RecoveryOrchestrator {
    router: Arc<FallbackRouter>,
    queue: Arc<RetryQueue>,
    overrides: HashMap<(String, QuotaErrorKind), RecoveryStrategy>,
    defaults: HashMap<QuotaErrorKind, RecoveryStrategy>,
    sink: Arc<dyn NotificationSink>,
    clock: SharedClock,
}

impl RecoveryOrchestrator {
    pub fn new(router: Arc<FallbackRouter>, queue: Arc<RetryQueue>, clock: SharedClock) -> Self {
        Self {
            router,
            queue,
            overrides: default_overrides(),
            defaults: default_strategies(),
            sink: Arc::new(LoggingSink),
            clock,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Set the strategy for one provider and error kind.
    pub fn with_strategy(
        mut self,
        provider: &str,
        kind: QuotaErrorKind,
        strategy: RecoveryStrategy,
    ) -> Self {
        self.overrides.insert((provider.to_string(), kind), strategy);
        self
    }

    /// Set the fallback strategy for an error kind.
    pub fn with_default(mut self, kind: QuotaErrorKind, strategy: RecoveryStrategy) -> Self {
        self.defaults.insert(kind, strategy);
        self
    }

    pub fn strategy_for(&self, provider: &str, kind: QuotaErrorKind) -> RecoveryStrategy {
        self.overrides
            .get(&(provider.to_string(), kind))
            .or_else(|| self.defaults.get(&kind))
            .cloned()
            .unwrap_or_else(|| RecoveryStrategy::new(RecoveryAction::Cache))
    }

    /// Run the strategy for `error` without waiting on deferred work.
    pub async fn recover(
        &self,
        error: &QuotaError,
        request: &FetchRequest,
    ) -> Result<Recovered, MarketDataError> {
        let strategy = self.strategy_for(&error.provider, error.kind);
        info!(
            "Recovery: {} from '{}' for {} {}, action {:?}",
            error.kind, error.provider, request.data_type, request.symbol, strategy.action
        );

        if let Some((severity, message)) = &strategy.notification {
            self.sink.notify(Notification {
                severity: *severity,
                message: message.replace("{provider}", &error.provider),
                provider: error.provider.clone(),
                kind: error.kind,
                raised_at: self.clock.now(),
            });
        }

        match strategy.action {
            RecoveryAction::Retry {
                max_attempts,
                backoff,
            } => self
                .retry(&error.provider, request, max_attempts, &backoff)
                .await
                .map(Recovered::Data),
            RecoveryAction::Fallback { provider } => self
                .router
                .fetch_from(&provider, request)
                .await
                .map(Recovered::Data),
            RecoveryAction::Cache => self
                .router
                .stale(request)
                .map(Recovered::Data)
                .ok_or_else(|| MarketDataError::NoCachedData {
                    key: request.cache_key(),
                }),
            RecoveryAction::Queue => Ok(Recovered::Deferred(self.queue.enqueue(
                request.clone(),
                Some(error.provider.clone()),
                error.retry_after,
            ))),
        }
    }

    /// Classify `error` and recover, waiting for deferred work to resolve.
    pub async fn handle(
        &self,
        error: &MarketDataError,
        request: &FetchRequest,
    ) -> Result<MarketData, MarketDataError> {
        let Some(quota_error) = self.router.classifier().classify(error) else {
            return Err(MarketDataError::ProviderError {
                provider: error.provider().unwrap_or("unknown").to_string(),
                message: error.to_string(),
            });
        };
        match self.recover(&quota_error, request).await? {
            Recovered::Data(data) => Ok(data),
            Recovered::Deferred(handle) => handle.wait().await,
        }
    }

    async fn retry(
        &self,
        provider: &str,
        request: &FetchRequest,
        max_attempts: u32,
        backoff: &Backoff,
    ) -> Result<MarketData, MarketDataError> {
        let mut last_error = None;
        for attempt in 0..max_attempts {
            let delay = backoff.delay(attempt);
            debug!(
                "Recovery: retry {}/{} of '{}' in {:?}",
                attempt + 1,
                max_attempts,
                provider,
                delay
            );
            tokio::time::sleep(delay).await;
            match self.router.fetch_from(provider, request).await {
                Ok(data) => return Ok(data),
                Err(e) if e.retry_class().is_terminal() => return Err(e),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| MarketDataError::RateLimited {
            provider: provider.to_string(),
            retry_after: None,
        }))
    }
}

fn default_strategies() -> HashMap<QuotaErrorKind, RecoveryStrategy> {
    HashMap::from([
        (
            QuotaErrorKind::RateLimit,
            RecoveryStrategy::new(RecoveryAction::Queue)
                .notify(Severity::Info, "{provider} is throttling requests, retrying shortly"),
        ),
        (
            QuotaErrorKind::DailyLimit,
            RecoveryStrategy::new(RecoveryAction::Cache)
                .notify(Severity::Warning, "{provider} daily limit reached, showing cached data"),
        ),
        (
            QuotaErrorKind::MonthlyLimit,
            RecoveryStrategy::new(RecoveryAction::Cache)
                .notify(Severity::Warning, "{provider} monthly limit reached, showing cached data"),
        ),
        (
            QuotaErrorKind::AccountSuspended,
            RecoveryStrategy::new(RecoveryAction::Cache)
                .notify(Severity::Error, "{provider} account suspended, check the API key"),
        ),
    ])
}

fn default_overrides() -> HashMap<(String, QuotaErrorKind), RecoveryStrategy> {
    HashMap::from([
        (
            (PROVIDER_ALPHA_VANTAGE.to_string(), QuotaErrorKind::DailyLimit),
            RecoveryStrategy::new(RecoveryAction::Fallback {
                provider: PROVIDER_FMP.to_string(),
            }),
        ),
        (
            (PROVIDER_TWELVE_DATA.to_string(), QuotaErrorKind::DailyLimit),
            RecoveryStrategy::new(RecoveryAction::Fallback {
                provider: PROVIDER_FINNHUB.to_string(),
            }),
        ),
        // No minute window upstream, so a short backoff is worth a try
        (
            (PROVIDER_FMP.to_string(), QuotaErrorKind::RateLimit),
            RecoveryStrategy::new(RecoveryAction::Retry {
                max_attempts: 2,
                backoff: Backoff::default(),
            }),
        ),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::{Clock, ManualClock};
    use crate::models::{DataType, Quote};
    use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
    use crate::queue::RetryQueueConfig;
    use crate::recovery::CollectingSink;
    use crate::registry::{
        CircuitBreaker, CircuitBreakerConfig, MemoryStore, ProviderDescriptor, QuotaTracker,
    };
    use crate::strategy::{CachePolicy, Strategy, StrategyTable};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct CountingProvider {
        id: &'static str,
        fail: bool,
        call_count: AtomicUsize,
    }

    #[async_trait]
    impl MarketDataProvider for CountingProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                data_types: &[DataType::Quote],
                max_batch_size: 1,
                requires_credential: true,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }

        async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(MarketDataError::ProviderError {
                    provider: self.id.to_string(),
                    message: "Rate limit exceeded, retry in 30 seconds".to_string(),
                })
            } else {
                Ok(Quote::new(symbol, dec!(10), self.id))
            }
        }
    }

    struct Fixture {
        orchestrator: RecoveryOrchestrator,
        router: Arc<FallbackRouter>,
        queue: Arc<RetryQueue>,
        clock: Arc<ManualClock>,
        sink: Arc<CollectingSink>,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let providers: Vec<Arc<dyn MarketDataProvider>> = vec![
            Arc::new(CountingProvider {
                id: "throttled",
                fail: true,
                call_count: AtomicUsize::new(0),
            }),
            Arc::new(CountingProvider {
                id: "alternate",
                fail: false,
                call_count: AtomicUsize::new(0),
            }),
        ];
        let quota = Arc::new(QuotaTracker::new(
            vec![
                ProviderDescriptor::new("throttled", &[DataType::Quote], 100),
                ProviderDescriptor::new("alternate", &[DataType::Quote], 100),
            ],
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::with_config(
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        let router = Arc::new(FallbackRouter::new(
            providers,
            StrategyTable::empty().with(
                DataType::Quote,
                Strategy::new(&["throttled"], CachePolicy::Normal),
            ),
            quota,
            breaker,
            Arc::new(MemoryCache::with_clock(clock.clone())),
            clock.clone(),
        ));
        let queue = Arc::new(RetryQueue::new(
            router.clone(),
            RetryQueueConfig {
                item_spacing: Duration::ZERO,
                ..Default::default()
            },
            clock.clone(),
        ));
        let sink = Arc::new(CollectingSink::new());
        let orchestrator = RecoveryOrchestrator::new(router.clone(), queue.clone(), clock.clone())
            .with_sink(sink.clone());
        Fixture {
            orchestrator,
            router,
            queue,
            clock,
            sink,
        }
    }

    fn quota_error(provider: &str, kind: QuotaErrorKind, retry_after: u64) -> QuotaError {
        QuotaError {
            provider: provider.to_string(),
            kind,
            retry_after: Duration::from_secs(retry_after),
            message: "limit".to_string(),
        }
    }

    #[tokio::test]
    async fn test_queue_action_defers_for_retry_after() {
        let f = fixture();
        let request = FetchRequest::new("AAPL", DataType::Quote);
        let start = f.clock.now();

        let recovered = f
            .orchestrator
            .recover(&quota_error("throttled", QuotaErrorKind::RateLimit, 30), &request)
            .await
            .unwrap();
        assert!(matches!(recovered, Recovered::Deferred(_)));
        assert_eq!(
            f.queue.next_due(),
            Some(start + chrono::TimeDelta::milliseconds(30_000))
        );
        assert_eq!(f.sink.len(), 1);
        assert_eq!(f.sink.notifications()[0].severity, Severity::Info);
    }

    #[tokio::test]
    async fn test_cache_action_serves_stale() {
        let f = fixture();
        let request = FetchRequest::new("AAPL", DataType::Quote);
        f.router.store(&MarketData::new(
            "AAPL",
            DataType::Quote,
            "throttled",
            f.clock.now(),
            crate::models::Payload::Quote(Quote::new("AAPL", dec!(9), "throttled")),
        ));
        f.clock.advance(Duration::from_secs(7_200));

        match f
            .orchestrator
            .recover(&quota_error("throttled", QuotaErrorKind::DailyLimit, 0), &request)
            .await
            .unwrap()
        {
            Recovered::Data(data) => assert!(data.is_stale),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_cache_action_without_entry_errors() {
        let f = fixture();
        let result = f
            .orchestrator
            .recover(
                &quota_error("throttled", QuotaErrorKind::MonthlyLimit, 0),
                &FetchRequest::new("NOPE", DataType::Quote),
            )
            .await;
        assert!(matches!(result, Err(MarketDataError::NoCachedData { .. })));
    }

    #[tokio::test]
    async fn test_fallback_action_uses_named_provider() {
        let f = fixture();
        let orchestrator = f.orchestrator.with_strategy(
            "throttled",
            QuotaErrorKind::DailyLimit,
            RecoveryStrategy::new(RecoveryAction::Fallback {
                provider: "alternate".to_string(),
            }),
        );
        match orchestrator
            .recover(
                &quota_error("throttled", QuotaErrorKind::DailyLimit, 0),
                &FetchRequest::new("AAPL", DataType::Quote),
            )
            .await
            .unwrap()
        {
            Recovered::Data(data) => assert_eq!(data.source, "alternate"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_action_gives_up_after_max_attempts() {
        let f = fixture();
        let orchestrator = f.orchestrator.with_strategy(
            "throttled",
            QuotaErrorKind::RateLimit,
            RecoveryStrategy::new(RecoveryAction::Retry {
                max_attempts: 2,
                backoff: Backoff::new(Duration::from_millis(10), 2.0),
            }),
        );
        let result = orchestrator
            .recover(
                &quota_error("throttled", QuotaErrorKind::RateLimit, 0),
                &FetchRequest::new("AAPL", DataType::Quote),
            )
            .await;
        assert!(result.is_err());
    }

    #[test]
    fn test_provider_override_beats_default() {
        let f = fixture();
        assert_eq!(
            f.orchestrator
                .strategy_for(PROVIDER_ALPHA_VANTAGE, QuotaErrorKind::DailyLimit)
                .action,
            RecoveryAction::Fallback {
                provider: "fmp".to_string()
            }
        );
        assert_eq!(
            f.orchestrator
                .strategy_for("finnhub", QuotaErrorKind::DailyLimit)
                .action,
            RecoveryAction::Cache
        );
    }
}
