//! Market data provider trait definitions.
//!
//! This module defines the core `MarketDataProvider` trait that all
//! market data providers must implement.

use async_trait::async_trait;
use chrono::{DateTime, Duration as TimeDelta, Utc};

use crate::errors::MarketDataError;
use crate::models::{CompanyProfile, DataType, Financials, HistoricalBar, Payload, Quote};

use super::capabilities::{ProviderCapabilities, RateLimit};

/// Days of history requested when a caller asks for `historical` without a range.
pub const DEFAULT_HISTORY_DAYS: i64 = 100;

/// Trait for market data providers.
///
/// Implement this trait to add support for a new data source. The router
/// uses the provider's capabilities to decide whether to call it for a
/// data type and the optimizer uses `max_batch_size` to size quote batches.
///
/// # Example
///
/// ```ignore
/// use async_trait::async_trait;
/// use alfalyzer_market_data::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};
///
/// struct MyProvider {
///     api_key: String,
/// }
///
/// #[async_trait]
/// impl MarketDataProvider for MyProvider {
///     fn id(&self) -> &'static str {
///         "my_provider"
///     }
///
///     fn capabilities(&self) -> ProviderCapabilities {
///         ProviderCapabilities {
///             data_types: &[DataType::Quote],
///             max_batch_size: 1,
///             requires_credential: true,
///         }
///     }
///
///     fn rate_limit(&self) -> RateLimit {
///         RateLimit::default()
///     }
///
///     // ... implement get_quote
/// }
/// ```
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Unique identifier, e.g. "finnhub". Used in strategies, quota
    /// tracking, breaker state and as the `source` tag on results.
    fn id(&self) -> &'static str;

    fn capabilities(&self) -> ProviderCapabilities;

    /// Limits advertised by the upstream API.
    fn rate_limit(&self) -> RateLimit;

    /// Whether a credential is configured. Keyless providers return true.
    fn has_credential(&self) -> bool {
        true
    }

    /// Fetch the latest quote for one symbol.
    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError>;

    /// Fetch quotes for several symbols.
    ///
    /// The default issues one `get_quote` per symbol and omits symbols that
    /// fail, returning the first error only if nothing succeeded. Providers
    /// with a batch endpoint override this.
    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        let mut first_error = None;
        for symbol in symbols {
            match self.get_quote(symbol).await {
                Ok(quote) => quotes.push(quote),
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        match first_error {
            Some(e) if quotes.is_empty() => Err(e),
            _ => Ok(quotes),
        }
    }

    async fn get_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        let _ = symbol;
        Err(MarketDataError::NotSupported {
            operation: "profile".to_string(),
            provider: self.id().to_string(),
        })
    }

    async fn get_financials(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        let _ = symbol;
        Err(MarketDataError::NotSupported {
            operation: "financials".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Daily bars for `[start, end]`, ordered by timestamp ascending.
    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        let _ = (symbol, start, end);
        Err(MarketDataError::NotSupported {
            operation: "historical".to_string(),
            provider: self.id().to_string(),
        })
    }

    /// Fetch one symbol's data of `data_type` as a payload.
    async fn fetch(&self, data_type: DataType, symbol: &str) -> Result<Payload, MarketDataError> {
        match data_type {
            DataType::Quote | DataType::Realtime => self.get_quote(symbol).await.map(Payload::Quote),
            DataType::Profile => self.get_profile(symbol).await.map(Payload::Profile),
            DataType::Financials => self.get_financials(symbol).await.map(Payload::Financials),
            DataType::Historical => {
                let end = Utc::now();
                let start = end - TimeDelta::days(DEFAULT_HISTORY_DAYS);
                self.get_historical(symbol, start, end)
                    .await
                    .map(Payload::Historical)
            }
        }
    }
}
