//! Fallback router.
//!
//! Walks a data type's strategy in order. Each provider is admitted only if
//! it is registered, serves the data type, is enabled, has a credential, has
//! quota left and its breaker lets a call through. The first success is
//! cached and returned.

use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use log::{debug, info, warn};

use crate::cache::CacheStore;
use crate::clock::{elapsed, SharedClock};
use crate::errors::MarketDataError;
use crate::models::{DataType, FetchRequest, MarketData, Quote};
use crate::provider::MarketDataProvider;
use crate::recovery::{QuotaError, QuotaErrorClassifier};
use crate::registry::{CircuitBreaker, FetchDiagnostics, QuotaTracker, SkipReason};
use crate::strategy::StrategyTable;

/// Why a routed fetch produced no data.
#[derive(Debug, Default)]
pub struct RouteFailure {
    pub diagnostics: FetchDiagnostics,
    /// Provider whose failure was seen last.
    pub last_provider: Option<String>,
    pub last_error: Option<MarketDataError>,
    /// Classification of the last failure, when quota related.
    pub quota_error: Option<QuotaError>,
    /// The last error was terminal (the request itself is invalid).
    pub terminal: bool,
}

impl RouteFailure {
    /// Typed error for a caller that does not accept synthetic data.
    pub fn into_error(self, request: &FetchRequest) -> MarketDataError {
        match self.last_error {
            Some(error) if self.terminal => error,
            _ => MarketDataError::AllProvidersExhausted {
                data_type: request.data_type,
                symbol: request.symbol.clone(),
                provider: self.last_provider,
                kind: self.quota_error.map(|q| q.kind),
            },
        }
    }
}

enum Attempt {
    Skipped(SkipReason),
    Failed(MarketDataError, Option<QuotaError>),
    Done(MarketData),
}

/// Ordered provider walk with quota and breaker gating.
pub struct FallbackRouter {
    providers: HashMap<String, Arc<dyn MarketDataProvider>>,
    strategies: StrategyTable,
    quota: Arc<QuotaTracker>,
    breaker: Arc<CircuitBreaker>,
    cache: Arc<dyn CacheStore>,
    classifier: QuotaErrorClassifier,
    clock: SharedClock,
}

impl FallbackRouter {
    pub fn new(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        strategies: StrategyTable,
        quota: Arc<QuotaTracker>,
        breaker: Arc<CircuitBreaker>,
        cache: Arc<dyn CacheStore>,
        clock: SharedClock,
    ) -> Self {
        let providers = providers
            .into_iter()
            .map(|p| (p.id().to_string(), p))
            .collect();
        Self {
            providers,
            strategies,
            quota,
            breaker,
            cache,
            classifier: QuotaErrorClassifier::new(),
            clock,
        }
    }

    pub fn with_classifier(mut self, classifier: QuotaErrorClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn strategies(&self) -> &StrategyTable {
        &self.strategies
    }

    pub fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn classifier(&self) -> &QuotaErrorClassifier {
        &self.classifier
    }

    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.providers.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Fresh cached value, honouring the strategy's read policy and the
    /// caller's `max_age`.
    pub fn cached(&self, request: &FetchRequest) -> Option<MarketData> {
        let strategy = self.strategies.get(request.data_type);
        if !strategy.cache_policy.reads_cache() {
            return None;
        }
        let data = self
            .cache
            .get(&request.cache_key(), request.data_type.as_str())?;
        if let Some(max_age) = request.max_age {
            if elapsed(data.fetched_at, self.clock.now()) > max_age {
                debug!("Router: cached '{}' older than max age", request.cache_key());
                return None;
            }
        }
        Some(data)
    }

    /// Last cached value regardless of expiry, tagged stale.
    pub fn stale(&self, request: &FetchRequest) -> Option<MarketData> {
        self.cache
            .get_stale(&request.cache_key(), request.data_type.as_str())
            .map(MarketData::stale)
    }

    /// Write `data` through the cache with its strategy's TTL.
    pub fn store(&self, data: &MarketData) {
        let ttl = self.strategies.get(data.data_type).cache_policy.ttl();
        self.cache.set(
            &data.data_type.cache_key(&data.symbol),
            data.clone(),
            data.data_type.as_str(),
            ttl,
        );
    }

    /// Cache first, then the strategy's providers in order.
    pub async fn route(&self, request: &FetchRequest) -> Result<MarketData, RouteFailure> {
        if let Some(data) = self.cached(request) {
            debug!("Router: cache hit for '{}'", request.cache_key());
            return Ok(data);
        }

        let strategy = self.strategies.get(request.data_type);
        let mut failure = RouteFailure::default();

        for provider_id in &strategy.providers {
            let id: Cow<'static, str> = Cow::Owned(provider_id.clone());
            match self.attempt(provider_id, request).await {
                Attempt::Done(data) => {
                    failure.diagnostics.record_success(id);
                    debug!(
                        "Router: {} {} served by '{}' [{}]",
                        request.data_type,
                        request.symbol,
                        provider_id,
                        failure.diagnostics.summary()
                    );
                    return Ok(data);
                }
                Attempt::Skipped(reason) => {
                    debug!("Router: skipping '{}' ({})", provider_id, reason);
                    failure.diagnostics.record_skip(id, reason);
                }
                Attempt::Failed(error, quota_error) => {
                    warn!(
                        "Router: '{}' failed for {} {}: {}",
                        provider_id, request.data_type, request.symbol, error
                    );
                    failure.diagnostics.record_error(id, error.to_string());
                    failure.last_provider = Some(provider_id.clone());
                    failure.quota_error = quota_error;
                    let terminal = error.retry_class().is_terminal();
                    failure.last_error = Some(error);
                    if terminal {
                        failure.terminal = true;
                        break;
                    }
                }
            }
        }

        info!(
            "Router: no provider served {} {} [{}]",
            request.data_type,
            request.symbol,
            failure.diagnostics.summary()
        );
        Err(failure)
    }

    /// Route and surface the outcome the way callers see it: an error when
    /// synthetic data is not acceptable, `None` when it is.
    pub async fn fetch(&self, request: &FetchRequest) -> Result<Option<MarketData>, MarketDataError> {
        match self.route(request).await {
            Ok(data) => Ok(Some(data)),
            Err(_) if request.fallback_acceptable => Ok(None),
            Err(failure) => Err(failure.into_error(request)),
        }
    }

    /// One attempt against a named provider, with the same gating as a walk.
    pub async fn fetch_from(
        &self,
        provider_id: &str,
        request: &FetchRequest,
    ) -> Result<MarketData, MarketDataError> {
        match self.attempt(provider_id, request).await {
            Attempt::Done(data) => Ok(data),
            Attempt::Failed(error, _) => Err(error),
            Attempt::Skipped(reason) => Err(skip_error(provider_id, request.data_type, reason)),
        }
    }

    /// One multi-symbol quote call against a named provider. Counts as a
    /// single call against its quota.
    pub async fn fetch_quotes_from(
        &self,
        provider_id: &str,
        symbols: &[String],
    ) -> Result<Vec<Quote>, MarketDataError> {
        let provider = self
            .admit(provider_id, DataType::Quote)
            .map_err(|reason| skip_error(provider_id, DataType::Quote, reason))?;

        let started = Instant::now();
        let result = provider.get_quotes(symbols).await;
        let latency = started.elapsed();
        match result {
            Ok(quotes) => {
                self.breaker.record_outcome(provider_id, true, latency);
                debug!(
                    "Router: '{}' returned {}/{} quotes",
                    provider_id,
                    quotes.len(),
                    symbols.len()
                );
                Ok(quotes)
            }
            Err(error) => {
                self.record_failure(provider_id, &error, latency);
                Err(error)
            }
        }
    }

    /// Gate a provider and claim its call slot.
    fn admit(
        &self,
        provider_id: &str,
        data_type: DataType,
    ) -> Result<Arc<dyn MarketDataProvider>, SkipReason> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or(SkipReason::NotRegistered)?;
        let descriptor = self
            .quota
            .descriptor(provider_id)
            .ok_or(SkipReason::NotRegistered)?;

        if !provider.capabilities().supports(data_type) || !descriptor.supports(data_type) {
            return Err(SkipReason::UnsupportedDataType);
        }
        if !descriptor.enabled {
            return Err(SkipReason::Disabled);
        }
        if !descriptor.has_credential || !provider.has_credential() {
            return Err(SkipReason::MissingCredential);
        }
        if !self.quota.can_consume(provider_id) {
            return Err(SkipReason::QuotaExhausted);
        }
        if !self.breaker.acquire(provider_id) {
            return Err(SkipReason::CircuitOpen);
        }
        if !self.quota.try_consume(provider_id) {
            self.breaker.release(provider_id);
            return Err(SkipReason::QuotaExhausted);
        }
        Ok(Arc::clone(provider))
    }

    async fn attempt(&self, provider_id: &str, request: &FetchRequest) -> Attempt {
        let provider = match self.admit(provider_id, request.data_type) {
            Ok(provider) => provider,
            Err(reason) => return Attempt::Skipped(reason),
        };

        let started = Instant::now();
        let result = provider.fetch(request.data_type, &request.symbol).await;
        let latency = started.elapsed();

        match result {
            Ok(payload) if payload.matches(request.data_type) => {
                self.breaker.record_outcome(provider_id, true, latency);
                let data = MarketData::new(
                    request.symbol.clone(),
                    request.data_type,
                    provider.id(),
                    self.clock.now(),
                    payload,
                );
                self.store(&data);
                Attempt::Done(data)
            }
            Ok(_) => {
                let error = MarketDataError::ProviderError {
                    provider: provider_id.to_string(),
                    message: format!("Unexpected payload for {}", request.data_type),
                };
                let quota_error = self.record_failure(provider_id, &error, latency);
                Attempt::Failed(error, quota_error)
            }
            Err(error) => {
                let quota_error = self.record_failure(provider_id, &error, latency);
                Attempt::Failed(error, quota_error)
            }
        }
    }

    /// Apply a failure to the breaker and, when quota related, to the
    /// provider's quota window.
    fn record_failure(
        &self,
        provider_id: &str,
        error: &MarketDataError,
        latency: std::time::Duration,
    ) -> Option<QuotaError> {
        if error.retry_class().penalizes() {
            self.breaker.record_outcome(provider_id, false, latency);
        } else {
            self.breaker.release(provider_id);
        }

        let quota_error = self.classifier.classify(error);
        if let Some(quota_error) = &quota_error {
            self.quota
                .mark_exhausted_for(provider_id, quota_error.kind, quota_error.retry_after);
        }
        quota_error
    }
}

fn skip_error(provider_id: &str, data_type: DataType, reason: SkipReason) -> MarketDataError {
    let provider = provider_id.to_string();
    match reason {
        SkipReason::CircuitOpen => MarketDataError::CircuitOpen { provider },
        SkipReason::QuotaExhausted => MarketDataError::RateLimited {
            provider,
            retry_after: None,
        },
        SkipReason::MissingCredential => MarketDataError::MissingCredential { provider },
        SkipReason::NotRegistered | SkipReason::UnsupportedDataType | SkipReason::Disabled => {
            MarketDataError::NotSupported {
                operation: data_type.to_string(),
                provider,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::clock::ManualClock;
    use crate::errors::QuotaErrorKind;
    use crate::models::{Payload, PROVIDER_MOCK};
    use crate::provider::{MockProvider, ProviderCapabilities, RateLimit};
    use crate::registry::{CircuitBreakerConfig, MemoryStore, ProviderDescriptor};
    use crate::strategy::{CachePolicy, Strategy};
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct ScriptedProvider {
        id: &'static str,
        call_count: AtomicUsize,
        failure: Option<fn(&'static str) -> MarketDataError>,
    }

    impl ScriptedProvider {
        fn ok(id: &'static str) -> Arc<Self> {
            Arc::new(Self {
                id,
                call_count: AtomicUsize::new(0),
                failure: None,
            })
        }

        fn failing(id: &'static str, failure: fn(&'static str) -> MarketDataError) -> Arc<Self> {
            Arc::new(Self {
                id,
                call_count: AtomicUsize::new(0),
                failure: Some(failure),
            })
        }

        fn calls(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl MarketDataProvider for ScriptedProvider {
        fn id(&self) -> &'static str {
            self.id
        }

        fn capabilities(&self) -> ProviderCapabilities {
            ProviderCapabilities {
                data_types: &[DataType::Quote, DataType::Realtime],
                max_batch_size: 10,
                requires_credential: true,
            }
        }

        fn rate_limit(&self) -> RateLimit {
            RateLimit::default()
        }

        async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            match self.failure {
                Some(failure) => Err(failure(self.id)),
                None => Ok(Quote::new(symbol, dec!(101.5), self.id)),
            }
        }
    }

    fn server_error(provider: &'static str) -> MarketDataError {
        MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: "HTTP 500 - boom".to_string(),
        }
    }

    fn not_found(_provider: &'static str) -> MarketDataError {
        MarketDataError::SymbolNotFound("ZZZZ".to_string())
    }

    fn limit_reached(provider: &'static str) -> MarketDataError {
        MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: "daily limit reached".to_string(),
        }
    }

    struct Fixture {
        router: FallbackRouter,
        clock: Arc<ManualClock>,
    }

    fn fixture(
        providers: Vec<Arc<dyn MarketDataProvider>>,
        order: &[&str],
        policy: CachePolicy,
    ) -> Fixture {
        let clock = Arc::new(ManualClock::default());
        let descriptors = providers
            .iter()
            .map(|p| {
                ProviderDescriptor::new(p.id(), p.capabilities().data_types, 100)
                    .has_credential(p.has_credential())
            })
            .collect();
        let quota = Arc::new(QuotaTracker::new(
            descriptors,
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::with_config(
            CircuitBreakerConfig::default(),
            clock.clone(),
        ));
        let cache = Arc::new(MemoryCache::with_clock(clock.clone()));
        let strategies =
            StrategyTable::empty().with(DataType::Quote, Strategy::new(order, policy));
        let router = FallbackRouter::new(providers, strategies, quota, breaker, cache, clock.clone());
        Fixture { router, clock }
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let primary = ScriptedProvider::ok("primary");
        let secondary = ScriptedProvider::ok("secondary");
        let f = fixture(
            vec![primary.clone(), secondary.clone()],
            &["primary", "secondary"],
            CachePolicy::Normal,
        );

        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "primary");
        assert_eq!(primary.calls(), 1);
        assert_eq!(secondary.calls(), 0);
    }

    #[tokio::test]
    async fn test_failure_moves_to_next_provider() {
        let broken = ScriptedProvider::failing("broken", server_error);
        let backup = ScriptedProvider::ok("backup");
        let f = fixture(
            vec![broken.clone(), backup.clone()],
            &["broken", "backup"],
            CachePolicy::Normal,
        );

        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "backup");
        assert_eq!(f.router.breaker().failure_count("broken"), 1);
    }

    #[tokio::test]
    async fn test_success_is_cached_and_served() {
        let primary = ScriptedProvider::ok("primary");
        let f = fixture(vec![primary.clone()], &["primary"], CachePolicy::Normal);
        let request = FetchRequest::new("AAPL", DataType::Quote);

        f.router.route(&request).await.unwrap();
        f.router.route(&request).await.unwrap();
        assert_eq!(primary.calls(), 1);

        f.clock.advance(Duration::from_secs(3_601));
        f.router.route(&request).await.unwrap();
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_minimal_policy_skips_cache_read() {
        let primary = ScriptedProvider::ok("primary");
        let f = fixture(vec![primary.clone()], &["primary"], CachePolicy::Minimal);
        let request = FetchRequest::new("AAPL", DataType::Quote);

        f.router.route(&request).await.unwrap();
        f.router.route(&request).await.unwrap();
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_max_age_rejects_older_cache() {
        let primary = ScriptedProvider::ok("primary");
        let f = fixture(vec![primary.clone()], &["primary"], CachePolicy::Normal);

        f.router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        f.clock.advance(Duration::from_secs(120));
        let request = FetchRequest::new("AAPL", DataType::Quote).max_age(Duration::from_secs(60));
        f.router.route(&request).await.unwrap();
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn test_open_circuit_is_skipped() {
        let flaky = ScriptedProvider::ok("flaky");
        let backup = ScriptedProvider::ok("backup");
        let f = fixture(
            vec![flaky.clone(), backup.clone()],
            &["flaky", "backup"],
            CachePolicy::Minimal,
        );
        for _ in 0..5 {
            f.router
                .breaker()
                .record_outcome("flaky", false, Duration::ZERO);
        }

        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "backup");
        assert_eq!(flaky.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_quota_is_skipped_without_call() {
        let spent = ScriptedProvider::ok("spent");
        let backup = ScriptedProvider::ok("backup");
        let f = fixture(
            vec![spent.clone(), backup.clone()],
            &["spent", "backup"],
            CachePolicy::Minimal,
        );
        f.router
            .quota()
            .mark_exhausted("spent", QuotaErrorKind::DailyLimit);

        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "backup");
        assert_eq!(spent.calls(), 0);
    }

    #[tokio::test]
    async fn test_symbol_not_found_stops_walk() {
        let first = ScriptedProvider::failing("first", not_found);
        let second = ScriptedProvider::ok("second");
        let f = fixture(
            vec![first.clone(), second.clone()],
            &["first", "second"],
            CachePolicy::Minimal,
        );
        let request = FetchRequest::new("ZZZZ", DataType::Quote);

        let failure = f.router.route(&request).await.unwrap_err();
        assert!(failure.terminal);
        assert_eq!(second.calls(), 0);
        assert!(matches!(
            failure.into_error(&request),
            MarketDataError::SymbolNotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_exhaustion_error_names_origin() {
        let only = ScriptedProvider::failing("only", limit_reached);
        let f = fixture(vec![only.clone()], &["only"], CachePolicy::Minimal);
        let request = FetchRequest::new("AAPL", DataType::Quote);

        match f.router.fetch(&request).await {
            Err(MarketDataError::AllProvidersExhausted { provider, kind, .. }) => {
                assert_eq!(provider.as_deref(), Some("only"));
                assert_eq!(kind, Some(QuotaErrorKind::DailyLimit));
            }
            other => panic!("unexpected: {:?}", other),
        }
        // Classified daily limit marks the provider spent
        assert!(!f.router.quota().can_consume("only"));
    }

    #[tokio::test]
    async fn test_fetch_returns_none_when_fallback_acceptable() {
        let only = ScriptedProvider::failing("only", server_error);
        let f = fixture(vec![only], &["only"], CachePolicy::Minimal);
        let request = FetchRequest::new("AAPL", DataType::Quote).fallback_acceptable(true);
        assert!(f.router.fetch(&request).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unregistered_provider_recorded_as_skip() {
        let backup = ScriptedProvider::ok("backup");
        let f = fixture(vec![backup], &["ghost", "backup"], CachePolicy::Minimal);
        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "backup");
    }

    #[tokio::test]
    async fn test_mock_serves_when_real_providers_unavailable() {
        let real = ScriptedProvider::ok("real");
        let mock: Arc<dyn MarketDataProvider> = Arc::new(MockProvider::default());
        let f = fixture(
            vec![real.clone(), mock],
            &["real", PROVIDER_MOCK],
            CachePolicy::Minimal,
        );
        f.router.quota().set_enabled("real", false);

        let data = f
            .router
            .route(&FetchRequest::new("AAPL", DataType::Quote))
            .await
            .unwrap();
        assert_eq!(data.source, "mock");
        assert!(matches!(data.payload, Payload::Quote(_)));
        assert_eq!(real.calls(), 0);
    }

    #[tokio::test]
    async fn test_stale_serves_expired_entry() {
        let primary = ScriptedProvider::ok("primary");
        let f = fixture(vec![primary], &["primary"], CachePolicy::Normal);
        let request = FetchRequest::new("AAPL", DataType::Quote);
        f.router.route(&request).await.unwrap();
        f.clock.advance(Duration::from_secs(7_200));

        assert!(f.router.cached(&request).is_none());
        let stale = f.router.stale(&request).unwrap();
        assert!(stale.is_stale);
    }

    #[tokio::test]
    async fn test_batch_quotes_consume_one_call() {
        let primary = ScriptedProvider::ok("primary");
        let f = fixture(vec![primary], &["primary"], CachePolicy::Minimal);
        let symbols = vec!["AAPL".to_string(), "MSFT".to_string(), "TSLA".to_string()];

        let quotes = f.router.fetch_quotes_from("primary", &symbols).await.unwrap();
        assert_eq!(quotes.len(), 3);
        assert_eq!(f.router.quota().status("primary").unwrap().used, 1);
    }
}
