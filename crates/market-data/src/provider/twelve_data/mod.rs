//! Twelve Data market data provider implementation.
//!
//! - Quotes via /quote, up to 120 comma-separated symbols per call
//! - Daily history via /time_series
//!
//! Free tier: 800 credits per day, 8 per minute.
//! API documentation: https://twelvedata.com/docs

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{DataType, HistoricalBar, Quote, PROVIDER_TWELVE_DATA};
use crate::provider::http::{build_client, parse_decimal, parse_json, send};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://api.twelvedata.com";
const PROVIDER_ID: &str = PROVIDER_TWELVE_DATA;

/// Symbols accepted by one /quote call.
pub const MAX_BATCH_SIZE: usize = 120;

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
struct QuoteItem {
    symbol: Option<String>,
    currency: Option<String>,
    open: Option<String>,
    high: Option<String>,
    low: Option<String>,
    close: Option<String>,
    volume: Option<String>,
    previous_close: Option<String>,
    timestamp: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    code: Option<u16>,
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(default)]
    values: Vec<TimeSeriesValue>,
}

#[derive(Debug, Deserialize)]
struct TimeSeriesValue {
    datetime: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: Option<String>,
}

// ============================================================================
// TwelveDataProvider
// ============================================================================

/// Twelve Data market data provider.
pub struct TwelveDataProvider {
    client: Client,
    api_key: String,
}

impl TwelveDataProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        if self.api_key.is_empty() {
            return Err(MarketDataError::MissingCredential {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let url = format!("{}{}", BASE_URL, endpoint);
        let request = self
            .client
            .get(&url)
            .header("Authorization", format!("apikey {}", self.api_key))
            .query(params);

        debug!("Twelve Data request: {} with {} params", endpoint, params.len());
        send(request, PROVIDER_ID).await
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let joined = symbols.join(",");
        let text = self.fetch("/quote", &[("symbol", joined.as_str())]).await?;
        let body: Value = parse_json(&text, PROVIDER_ID, "quote")?;
        let quotes = parse_quote_body(body)?;
        debug!(
            "Twelve Data: {} of {} symbols quoted",
            quotes.len(),
            symbols.len()
        );
        Ok(quotes)
    }

    async fn fetch_time_series(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        let start_date = start.format("%Y-%m-%d").to_string();
        let end_date = end.format("%Y-%m-%d").to_string();
        let params = [
            ("symbol", symbol),
            ("interval", "1day"),
            ("start_date", start_date.as_str()),
            ("end_date", end_date.as_str()),
        ];
        let text = self.fetch("/time_series", &params).await?;
        let body: Value = parse_json(&text, PROVIDER_ID, "time series")?;
        check_error(&body)?;
        let response: TimeSeriesResponse = serde_json::from_value(body).map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse time series response: {}", e),
            }
        })?;
        if response.values.is_empty() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(parse_time_series(response.values))
    }
}

/// Twelve Data reports errors as `{"code": 429, "message": "...", "status": "error"}`,
/// sometimes with HTTP 200.
fn check_error(body: &Value) -> Result<(), MarketDataError> {
    if body.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(());
    }
    let error: ErrorBody = serde_json::from_value(body.clone()).unwrap_or_default();
    let message = error.message.unwrap_or_else(|| "Unknown error".to_string());
    match error.code {
        Some(404) => Err(MarketDataError::SymbolNotFound(message)),
        Some(429) => Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: format!("429: {}", message),
        }),
        _ => Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message,
        }),
    }
}

/// A single-symbol call returns the quote object; a multi-symbol call
/// returns a map keyed by symbol whose entries may individually be errors.
fn parse_quote_body(body: Value) -> Result<Vec<Quote>, MarketDataError> {
    check_error(&body)?;

    if body.get("symbol").is_some() {
        let item: QuoteItem = serde_json::from_value(body).map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to parse quote: {}", e),
            }
        })?;
        return item
            .into_quote(None)
            .map(|q| vec![q])
            .ok_or_else(|| MarketDataError::SymbolNotFound("quote without price".to_string()));
    }

    let entries: HashMap<String, Value> = serde_json::from_value(body).map_err(|e| {
        MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: format!("Failed to parse batch quote: {}", e),
        }
    })?;

    let mut quotes = Vec::with_capacity(entries.len());
    for (symbol, entry) in entries {
        if let Err(e) = check_error(&entry) {
            warn!("Twelve Data: no quote for {}: {}", symbol, e);
            continue;
        }
        match serde_json::from_value::<QuoteItem>(entry) {
            Ok(item) => {
                if let Some(quote) = item.into_quote(Some(&symbol)) {
                    quotes.push(quote);
                }
            }
            Err(e) => warn!("Twelve Data: unparseable quote for {}: {}", symbol, e),
        }
    }
    quotes.sort_by(|a, b| a.symbol.cmp(&b.symbol));
    Ok(quotes)
}

impl QuoteItem {
    fn into_quote(self, key: Option<&str>) -> Option<Quote> {
        let price = self.close.as_deref().and_then(parse_decimal)?;
        let symbol = self
            .symbol
            .or_else(|| key.map(str::to_string))?
            .to_uppercase();
        let mut quote = Quote::new(symbol, price, PROVIDER_ID);
        if let Some(pc) = self.previous_close.as_deref().and_then(parse_decimal) {
            quote = quote.with_previous_close(pc);
        }
        quote.open = self.open.as_deref().and_then(parse_decimal);
        quote.high = self.high.as_deref().and_then(parse_decimal);
        quote.low = self.low.as_deref().and_then(parse_decimal);
        quote.volume = self.volume.as_deref().and_then(parse_decimal);
        if let Some(currency) = self.currency {
            quote.currency = currency;
        }
        if let Some(ts) = self.timestamp.and_then(|t| Utc.timestamp_opt(t, 0).single()) {
            quote.timestamp = ts;
        }
        Some(quote)
    }
}

fn parse_time_series(values: Vec<TimeSeriesValue>) -> Vec<HistoricalBar> {
    let mut bars: Vec<HistoricalBar> = values
        .into_iter()
        .filter_map(|v| {
            let date = NaiveDate::parse_from_str(&v.datetime, "%Y-%m-%d").ok()?;
            let timestamp = Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?);
            Some(HistoricalBar {
                timestamp,
                open: parse_decimal(&v.open)?,
                high: parse_decimal(&v.high)?,
                low: parse_decimal(&v.low)?,
                close: parse_decimal(&v.close)?,
                volume: v.volume.as_deref().and_then(parse_decimal),
            })
        })
        .collect();
    bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    bars
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for TwelveDataProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[DataType::Quote, DataType::Realtime, DataType::Historical],
            max_batch_size: MAX_BATCH_SIZE,
            requires_credential: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_day: 800,
            requests_per_minute: Some(8),
        }
    }

    fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        debug!("Fetching quote for {} from Twelve Data", symbol);
        self.fetch_quotes(&[symbol.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))
    }

    async fn get_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let mut quotes = Vec::with_capacity(symbols.len());
        for chunk in symbols.chunks(MAX_BATCH_SIZE) {
            quotes.extend(self.fetch_quotes(chunk).await?);
        }
        Ok(quotes)
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        self.fetch_time_series(symbol, start, end).await
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_capabilities() {
        let provider = TwelveDataProvider::new("key".to_string());
        let caps = provider.capabilities();
        assert_eq!(caps.max_batch_size, 120);
        assert!(caps.supports(DataType::Historical));
        assert!(!caps.supports(DataType::Profile));
    }

    #[test]
    fn test_single_quote_body() {
        let body: Value = serde_json::from_str(
            r#"{
                "symbol": "AAPL",
                "name": "Apple Inc",
                "currency": "USD",
                "open": "149.00",
                "high": "152.00",
                "low": "148.50",
                "close": "150.25",
                "volume": "51234567",
                "previous_close": "148.75",
                "timestamp": 1704067200
            }"#,
        )
        .unwrap();

        let quotes = parse_quote_body(body).unwrap();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].price, dec!(150.25));
        assert_eq!(quotes[0].change, dec!(1.50));
        assert_eq!(quotes[0].source, "twelve_data");
    }

    #[test]
    fn test_batch_quote_body_skips_errors() {
        let body: Value = serde_json::from_str(
            r#"{
                "AAPL": {"symbol": "AAPL", "close": "150.25", "previous_close": "148.75"},
                "MSFT": {"symbol": "MSFT", "close": "300.75"},
                "NOPE": {"code": 404, "message": "symbol not found", "status": "error"}
            }"#,
        )
        .unwrap();

        let quotes = parse_quote_body(body).unwrap();
        let symbols: Vec<&str> = quotes.iter().map(|q| q.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT"]);
    }

    #[test]
    fn test_out_of_credits_error() {
        let body: Value = serde_json::from_str(
            r#"{"code": 429, "message": "You have run out of API credits for the current minute.", "status": "error"}"#,
        )
        .unwrap();
        match parse_quote_body(body) {
            Err(MarketDataError::ProviderError { message, .. }) => {
                assert!(message.contains("current minute"))
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn test_time_series_parsing() {
        let response: TimeSeriesResponse = serde_json::from_str(
            r#"{
                "meta": {"symbol": "AAPL", "interval": "1day"},
                "values": [
                    {"datetime": "2024-01-03", "open": "2", "high": "3", "low": "1", "close": "2.5", "volume": "100"},
                    {"datetime": "2024-01-02", "open": "1", "high": "2", "low": "0.5", "close": "1.5", "volume": "90"}
                ],
                "status": "ok"
            }"#,
        )
        .unwrap();

        let bars = parse_time_series(response.values);
        assert_eq!(bars.len(), 2);
        assert_eq!(bars[0].close, dec!(1.5));
    }
}
