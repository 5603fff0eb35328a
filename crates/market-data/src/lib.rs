//! Alfalyzer Market Data Crate
//!
//! This crate provides a resilient multi-provider fetch layer for stock
//! quotes, company profiles, financials and price history.
//!
//! # Overview
//!
//! The market data crate supports:
//! - Multiple providers: Finnhub, Alpha Vantage, Twelve Data, FMP and a
//!   keyless mock
//! - Per-provider minute and daily quotas, persisted across restarts
//! - Circuit breaking with a half-open trial
//! - Quota error classification with per-provider recovery actions
//! - A due-time ordered retry queue
//! - Request deduplication and batching
//! - Synthetic last-resort data that never drifts far from its anchor
//!
//! # Architecture
//!
//! ```text
//! +------------------+     +------------------+
//! | MarketDataService| --> |  BatchOptimizer  |  (dedup + batch windows)
//! +------------------+     +------------------+
//!          |                        |
//!          v                        v
//! +------------------+     +------------------+
//! |  FallbackRouter  | <-- |   RetryQueue     |  (deferred retries)
//! +------------------+     +------------------+
//!          |        \
//!          |         +---> QuotaTracker / CircuitBreaker / CacheStore
//!          v
//! +------------------+
//! |    Provider      |  (Finnhub, Alpha Vantage, ...)
//! +------------------+
//!          |
//!          v  on quota errors
//! +------------------+     +------------------+
//! | RecoveryOrch.    | --> | InvisibleFallback|  (synthetic, last resort)
//! +------------------+     +------------------+
//! ```
//!
//! # Core Types
//!
//! - [`MarketDataService`] - The context object built once at start-up
//! - [`FetchRequest`] - Symbol, data type, priority and fallback preference
//! - [`MarketData`] - The envelope every fetch returns
//! - [`Quote`] - Quote snapshot
//! - [`StrategyTable`] - Provider order and cache policy per data type

pub mod cache;
pub mod clock;
pub mod config;
pub mod errors;
pub mod fallback;
pub mod models;
pub mod optimizer;
pub mod provider;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod service;
pub mod strategy;

// Re-export the types most callers need
pub use cache::{CacheStore, MemoryCache};
pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{MarketDataConfig, ProviderConfig};
pub use errors::{MarketDataError, QuotaErrorKind, RetryClass};
pub use fallback::{FallbackConfig, FallbackStock, InvisibleFallback};
pub use models::{
    BatchQuotes, CompanyProfile, DataType, FetchRequest, FinancialStatement, Financials,
    HistoricalBar, MarketData, Payload, Priority, ProviderId, Quote, StatementPeriod,
};
pub use optimizer::{BatchOptimizer, BatchRequest, BatchResult, OptimizerConfig, OptimizerEvent};
pub use queue::{RetryHandle, RetryQueue, RetryQueueConfig};
pub use recovery::{
    NotificationSink, QuotaError, QuotaErrorClassifier, RecoveryAction, RecoveryOrchestrator,
    RecoveryStrategy, Severity,
};
pub use registry::{
    CircuitBreaker, CircuitBreakerConfig, CircuitState, FetchDiagnostics, JsonFileStore,
    MemoryStore, PersistentStore, ProviderDescriptor, QuotaStatus, QuotaTracker, SkipReason,
};
pub use router::{FallbackRouter, RouteFailure};
pub use scheduler::Scheduler;
pub use service::{HealthReport, HealthStatus, MarketDataService, ProviderHealth};
pub use strategy::{CachePolicy, Strategy, StrategyTable};

// Re-export provider types
pub use provider::alpha_vantage::AlphaVantageProvider;
pub use provider::finnhub::FinnhubProvider;
pub use provider::fmp::FmpProvider;
pub use provider::mock::MockProvider;
pub use provider::twelve_data::TwelveDataProvider;
pub use provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
