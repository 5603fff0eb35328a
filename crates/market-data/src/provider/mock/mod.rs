//! Keyless last-in-line provider.
//!
//! Serves the same anchored synthetic data as the invisible fallback, but as
//! a regular strategy entry tagged `mock`. It never fails and has no quota.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::clock::SharedClock;
use crate::errors::MarketDataError;
use crate::fallback::{FallbackConfig, InvisibleFallback};
use crate::models::{CompanyProfile, DataType, Financials, HistoricalBar, Quote, PROVIDER_MOCK};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const MAX_BATCH_SIZE: usize = 100;

pub struct MockProvider {
    generator: InvisibleFallback,
}

impl MockProvider {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            generator: InvisibleFallback::new(FallbackConfig::default(), clock),
        }
    }

    /// Seeded variant for reproducible output.
    pub fn with_seed(seed: u64, clock: SharedClock) -> Self {
        let config = FallbackConfig {
            seed: Some(seed),
            ..Default::default()
        };
        Self {
            generator: InvisibleFallback::new(config, clock),
        }
    }

    fn tag(mut quote: Quote) -> Quote {
        quote.source = PROVIDER_MOCK.to_string();
        quote
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self {
            generator: InvisibleFallback::default(),
        }
    }
}

#[async_trait]
impl MarketDataProvider for MockProvider {
    fn id(&self) -> &'static str {
        PROVIDER_MOCK
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &DataType::ALL,
            max_batch_size: MAX_BATCH_SIZE,
            requires_credential: false,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit::UNLIMITED
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        debug!("Mock: quote for {}", symbol);
        Ok(Self::tag(self.generator.quote(symbol)))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        debug!("Mock: {} quotes", symbols.len());
        Ok(symbols
            .iter()
            .map(|s| Self::tag(self.generator.quote(s)))
            .collect())
    }

    async fn get_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        let mut profile = self.generator.profile(symbol);
        profile.source = Some(PROVIDER_MOCK.to_string());
        Ok(profile)
    }

    async fn get_financials(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        Ok(self.generator.financials(symbol))
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        Ok(self
            .generator
            .historical(symbol)
            .into_iter()
            .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
            .collect())
    }
}
