//! End-to-end scenarios for the fetch layer.
//!
//! Every test builds a fresh `MarketDataService` over scripted providers and
//! a `ManualClock`, so time only moves when a test says so.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use alfalyzer_market_data::registry::UsageRecord;
use alfalyzer_market_data::{
    CachePolicy, CacheStore, CircuitState, Clock, DataType, FetchRequest, MarketData,
    MarketDataConfig, MarketDataError, MarketDataProvider, MarketDataService, ManualClock,
    MemoryCache, MemoryStore, MockProvider, Payload, Priority, ProviderCapabilities,
    ProviderDescriptor, Quote, QuotaErrorClassifier, QuotaErrorKind, RateLimit, Strategy,
    StrategyTable,
};
use async_trait::async_trait;
use rust_decimal_macros::dec;

// =============================================================================
// Scripted provider
// =============================================================================

enum Script {
    Succeed,
    Fail(&'static str),
}

struct ScriptedProvider {
    id: &'static str,
    script: Script,
    calls: AtomicUsize,
    batch_calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(id: &'static str, script: Script) -> Arc<Self> {
        Arc::new(Self {
            id,
            script,
            calls: AtomicUsize::new(0),
            batch_calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn batch_calls(&self) -> usize {
        self.batch_calls.load(Ordering::SeqCst)
    }

    fn answer(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        match self.script {
            Script::Succeed => Ok(Quote::new(symbol, dec!(100), self.id)),
            Script::Fail(message) => Err(MarketDataError::ProviderError {
                provider: self.id.to_string(),
                message: message.to_string(),
            }),
        }
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
            max_batch_size: 50,
            requires_credential: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::default()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.answer(symbol)
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        self.batch_calls.fetch_add(1, Ordering::SeqCst);
        symbols.iter().map(|s| self.answer(s)).collect()
    }
}

// =============================================================================
// Fixture
// =============================================================================

struct Fixture {
    service: MarketDataService,
}

fn descriptor(id: &str, daily_limit: u32) -> ProviderDescriptor {
    ProviderDescriptor::new(id, &[DataType::Quote, DataType::Realtime], daily_limit).batch_size(50)
}

fn fixture(
    providers: Vec<(Arc<ScriptedProvider>, ProviderDescriptor)>,
    with_mock: bool,
    store: MemoryStore,
    clock: Arc<ManualClock>,
) -> Fixture {
    let mut order: Vec<&str> = providers.iter().map(|(p, _)| p.id).collect();
    let mut parts: Vec<(Arc<dyn MarketDataProvider>, ProviderDescriptor)> = providers
        .into_iter()
        .map(|(p, d)| (p as Arc<dyn MarketDataProvider>, d))
        .collect();
    if with_mock {
        parts.push((
            Arc::new(MockProvider::with_seed(7, clock.clone())),
            ProviderDescriptor::new("mock", &DataType::ALL, u32::MAX)
                .batch_size(100)
                .synthetic(true),
        ));
        order.push("mock");
    }

    let config = MarketDataConfig {
        strategies: StrategyTable::empty()
            .with(DataType::Quote, Strategy::new(&order, CachePolicy::Normal)),
        ..Default::default()
    };
    let service = MarketDataService::with_parts(
        config,
        parts,
        Arc::new(store),
        Arc::new(MemoryCache::with_clock(clock.clone())),
        clock.clone(),
    );
    Fixture { service }
}

fn aapl() -> FetchRequest {
    FetchRequest::new("AAPL", DataType::Quote)
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn test_open_circuit_and_spent_quota_select_mock() {
    let clock = Arc::new(ManualClock::default());
    let finnhub = ScriptedProvider::new("finnhub", Script::Succeed);
    let rotation = ScriptedProvider::new("rotation", Script::Succeed);
    let f = fixture(
        vec![
            (finnhub.clone(), descriptor("finnhub", 1000)),
            (rotation.clone(), descriptor("rotation", 0)),
        ],
        true,
        MemoryStore::new(),
        clock,
    );

    let breaker = f.service.router().breaker();
    for _ in 0..5 {
        breaker.record_outcome("finnhub", false, Duration::from_millis(10));
    }
    assert!(breaker.is_open("finnhub"));
    assert_eq!(f.service.router().quota().remaining("rotation"), 0);

    let data = f.service.fetch_data(aapl()).await.unwrap();
    assert_eq!(data.source, "mock");
    assert_eq!(data.symbol, "AAPL");
    assert_eq!(finnhub.calls(), 0);
    assert_eq!(rotation.calls(), 0);
}

#[tokio::test]
async fn test_persisted_full_daily_usage_excludes_provider() {
    let clock = Arc::new(ManualClock::default());
    let store = MemoryStore::with_snapshot(
        [(
            "finnhub".to_string(),
            UsageRecord {
                current_usage: 250,
                last_reset: clock.now().timestamp_millis(),
            },
        )]
        .into_iter()
        .collect(),
    );
    let finnhub = ScriptedProvider::new("finnhub", Script::Succeed);
    let f = fixture(
        vec![(finnhub.clone(), descriptor("finnhub", 250))],
        true,
        store,
        clock,
    );

    let quota = f.service.router().quota();
    assert!(!quota.can_consume("finnhub"));
    let status = quota.status("finnhub").unwrap();
    assert_eq!((status.used, status.limit), (250, 250));

    let data = f.service.fetch_data(aapl()).await.unwrap();
    assert_eq!(data.source, "mock");
    assert_eq!(finnhub.calls(), 0);
}

#[tokio::test]
async fn test_rate_limit_message_queues_retry_after_thirty_seconds() {
    const MESSAGE: &str = "Rate limit exceeded, retry in 30 seconds";

    let classified = QuotaErrorClassifier::new()
        .classify_message("rotation", MESSAGE)
        .unwrap();
    assert_eq!(classified.kind, QuotaErrorKind::RateLimit);
    assert_eq!(classified.retry_after, Duration::from_secs(30));

    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Fail(MESSAGE));
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 1000))],
        false,
        MemoryStore::new(),
        clock.clone(),
    );
    let started = clock.now();

    // Accepting a fallback means the caller does not wait on the queue
    let data = f
        .service
        .fetch_data(aapl().fallback_acceptable(true))
        .await
        .unwrap();
    assert_eq!(data.source, "fallback");

    let items = f.service.queue().items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].provider.as_deref(), Some("rotation"));
    assert_eq!((items[0].due_at - started).num_milliseconds(), 30_000);

    // Not due yet
    clock.advance(Duration::from_secs(29));
    assert_eq!(f.service.queue().process_due().await.processed, 0);
    assert_eq!(rotation.calls(), 1);

    clock.advance(Duration::from_secs(1));
    let report = f.service.queue().process_due().await;
    assert_eq!(report.processed, 1);
    assert_eq!(report.requeued, 1);
    assert_eq!(rotation.calls(), 2);
}

#[tokio::test]
async fn test_throttled_provider_available_when_retry_comes_due() {
    const MESSAGE: &str = "Rate limit exceeded, retry in 30 seconds";

    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Fail(MESSAGE));
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 1000).minute_limit(5))],
        false,
        MemoryStore::new(),
        clock.clone(),
    );

    f.service
        .fetch_data(aapl().fallback_acceptable(true))
        .await
        .unwrap();
    let quota = f.service.router().quota();
    assert!(!quota.can_consume("rotation"));

    clock.advance(Duration::from_secs(30));
    assert!(quota.can_consume("rotation"));
    f.service.queue().process_due().await;
    assert_eq!(rotation.calls(), 2);
}

#[tokio::test]
async fn test_all_providers_fail_serves_fallback_near_base_price() {
    let clock = Arc::new(ManualClock::default());
    let finnhub = ScriptedProvider::new("finnhub", Script::Fail("internal error"));
    let rotation = ScriptedProvider::new("rotation", Script::Fail("bad gateway"));
    let f = fixture(
        vec![
            (finnhub.clone(), descriptor("finnhub", 1000)),
            (rotation.clone(), descriptor("rotation", 1000)),
        ],
        false,
        MemoryStore::new(),
        clock,
    );

    let data = f
        .service
        .fetch_data(aapl().fallback_acceptable(true))
        .await
        .unwrap();
    assert_eq!(data.source, "fallback");
    let price = data.quote().map(|q| q.price).unwrap();
    let base = dec!(150.25);
    assert!(price >= base * dec!(0.95) && price <= base * dec!(1.05));
    assert_eq!(finnhub.calls(), 1);
    assert_eq!(rotation.calls(), 1);
}

#[tokio::test]
async fn test_exhaustion_without_fallback_names_provider_and_kind() {
    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Fail("daily limit reached"));
    let f = fixture(
        vec![(rotation, descriptor("rotation", 1000))],
        false,
        MemoryStore::new(),
        clock,
    );

    // Daily limit recovers from cache, and there is none
    let err = f.service.fetch_data(aapl()).await.unwrap_err();
    match err {
        MarketDataError::AllProvidersExhausted { provider, kind, .. } => {
            assert_eq!(provider.as_deref(), Some("rotation"));
            assert_eq!(kind, Some(QuotaErrorKind::DailyLimit));
        }
        other => panic!("unexpected: {:?}", other),
    }
    assert_eq!(f.service.router().quota().remaining("rotation"), 0);
}

#[tokio::test]
async fn test_identical_batch_requests_share_one_call() {
    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Succeed);
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 1000))],
        false,
        MemoryStore::new(),
        clock,
    );
    let optimizer = f.service.optimizer();
    let first = vec!["MSFT".to_string(), "AAPL".to_string()];
    let second = vec!["AAPL".to_string(), "MSFT".to_string()];

    let (a, b, _) = tokio::join!(
        optimizer.add_request(DataType::Quote, &first, Priority::Low, Some("alice")),
        optimizer.add_request(DataType::Quote, &second, Priority::Critical, Some("bob")),
        async {
            tokio::task::yield_now().await;
            optimizer.run_window().await
        }
    );

    assert_eq!(rotation.batch_calls(), 1);
    assert_eq!(a.unwrap().data.len(), 2);
    assert_eq!(b.unwrap().data.len(), 2);
}

#[tokio::test]
async fn test_circuit_stays_open_until_cool_down() {
    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Fail("upstream exploded"));
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 1000))],
        false,
        MemoryStore::new(),
        clock.clone(),
    );

    for _ in 0..5 {
        let _ = f.service.fetch_data(aapl()).await;
    }
    let breaker = f.service.router().breaker();
    assert!(breaker.is_open("rotation"));
    assert_eq!(rotation.calls(), 5);

    clock.advance(Duration::from_secs(4 * 60));
    let _ = f.service.fetch_data(aapl()).await;
    assert_eq!(rotation.calls(), 5);
    assert!(breaker.is_open("rotation"));

    clock.advance(Duration::from_secs(60));
    assert_eq!(breaker.state("rotation"), CircuitState::HalfOpen);
    let _ = f.service.fetch_data(aapl()).await;
    // The single trial failed, so the circuit reopened
    assert_eq!(rotation.calls(), 6);
    assert_eq!(breaker.state("rotation"), CircuitState::Open);
}

#[tokio::test]
async fn test_daily_usage_resets_after_a_day() {
    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Succeed);
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 2))],
        false,
        MemoryStore::new(),
        clock.clone(),
    );
    let quota = f.service.router().quota();

    quota.consume("rotation");
    quota.consume("rotation");
    assert!(!quota.can_consume("rotation"));

    clock.advance(Duration::from_secs(24 * 60 * 60 + 1));
    assert!(quota.can_consume("rotation"));
    assert_eq!(quota.status("rotation").unwrap().used, 0);
}

#[test]
fn test_cache_round_trip_respects_ttl() {
    let clock = Arc::new(ManualClock::default());
    let cache = MemoryCache::with_clock(clock.clone());
    let value = MarketData::new(
        "AAPL",
        DataType::Quote,
        "rotation",
        clock.now(),
        Payload::Quote(Quote::new("AAPL", dec!(123), "rotation")),
    );

    cache.set("quote:AAPL", value.clone(), "quote", Duration::from_secs(60));
    assert_eq!(cache.get("quote:AAPL", "quote"), Some(value));

    clock.advance(Duration::from_secs(61));
    assert_eq!(cache.get("quote:AAPL", "quote"), None);
}

#[tokio::test]
async fn test_fresh_cache_hit_skips_providers() {
    let clock = Arc::new(ManualClock::default());
    let rotation = ScriptedProvider::new("rotation", Script::Succeed);
    let f = fixture(
        vec![(rotation.clone(), descriptor("rotation", 1000))],
        false,
        MemoryStore::new(),
        clock,
    );

    let first = f.service.fetch_data(aapl()).await.unwrap();
    let second = f.service.fetch_data(aapl()).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(rotation.calls(), 1);
}
