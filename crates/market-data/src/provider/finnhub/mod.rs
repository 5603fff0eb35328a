//! Finnhub market data provider implementation.
//!
//! This module provides market data from Finnhub API:
//! - Quotes via /quote
//! - Daily candles via /stock/candle
//! - Company profiles via /stock/profile2
//! - Headline fundamentals via /stock/metric
//!
//! Finnhub free tier is limited to 60 API calls per minute.
//! API documentation: https://finnhub.io/docs/api

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{
    CompanyProfile, DataType, FinancialStatement, Financials, HistoricalBar, Quote,
    StatementPeriod, PROVIDER_FINNHUB,
};
use crate::provider::http::{build_client, decimal, parse_json, send};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://finnhub.io/api/v1";
const PROVIDER_ID: &str = PROVIDER_FINNHUB;

// ============================================================================
// API Response Structures
// ============================================================================

/// Response from /quote endpoint
#[derive(Debug, Deserialize)]
struct QuoteResponse {
    /// Current price
    c: Option<f64>,
    /// High price of the day
    h: Option<f64>,
    /// Low price of the day
    l: Option<f64>,
    /// Open price of the day
    o: Option<f64>,
    /// Previous close
    pc: Option<f64>,
    /// Timestamp (Unix)
    t: Option<i64>,
}

/// Response from /stock/candle endpoint
#[derive(Debug, Deserialize)]
struct CandleResponse {
    /// Status: "ok" or "no_data"
    s: String,
    #[serde(default)]
    c: Vec<f64>,
    #[serde(default)]
    h: Vec<f64>,
    #[serde(default)]
    l: Vec<f64>,
    #[serde(default)]
    o: Vec<f64>,
    #[serde(default)]
    v: Vec<f64>,
    #[serde(default)]
    t: Vec<i64>,
}

/// Response from /stock/profile2 endpoint
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileResponse {
    name: Option<String>,
    ticker: Option<String>,
    exchange: Option<String>,
    finnhub_industry: Option<String>,
    country: Option<String>,
    weburl: Option<String>,
    logo: Option<String>,
    /// Market capitalization (in millions)
    market_capitalization: Option<f64>,
    /// Shares outstanding (in millions)
    share_outstanding: Option<f64>,
}

/// Response from /stock/metric endpoint
#[derive(Debug, Deserialize)]
struct MetricResponse {
    #[serde(default)]
    metric: Metric,
}

#[derive(Debug, Default, Deserialize)]
struct Metric {
    #[serde(rename = "epsTTM")]
    eps_ttm: Option<f64>,
    #[serde(rename = "revenuePerShareTTM")]
    revenue_per_share_ttm: Option<f64>,
    #[serde(rename = "netProfitMarginTTM")]
    net_profit_margin_ttm: Option<f64>,
}

/// Error body returned with 200 by some endpoints.
#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: Option<String>,
}

// ============================================================================
// FinnhubProvider
// ============================================================================

/// Finnhub market data provider.
pub struct FinnhubProvider {
    client: Client,
    api_key: String,
}

impl FinnhubProvider {
    /// Create a new Finnhub provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    /// Make a GET request to the Finnhub API.
    async fn fetch(&self, endpoint: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        if self.api_key.is_empty() {
            return Err(MarketDataError::MissingCredential {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let url = format!("{}{}", BASE_URL, endpoint);
        // API key as header rather than query param
        let request = self
            .client
            .get(&url)
            .header("X-Finnhub-Token", &self.api_key)
            .query(params);

        debug!("Finnhub request: {} with {} params", endpoint, params.len());

        let text = send(request, PROVIDER_ID).await?;
        check_api_error(&text)?;
        Ok(text)
    }

    async fn fetch_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let text = self.fetch("/quote", &[("symbol", symbol)]).await?;
        let response: QuoteResponse = parse_json(&text, PROVIDER_ID, "quote")?;
        parse_quote(symbol, response)
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        let from_ts = start.timestamp().to_string();
        let to_ts = end.timestamp().to_string();
        let params = [
            ("symbol", symbol),
            ("resolution", "D"),
            ("from", from_ts.as_str()),
            ("to", to_ts.as_str()),
        ];

        let text = self.fetch("/stock/candle", &params).await?;
        let response: CandleResponse = parse_json(&text, PROVIDER_ID, "candle")?;
        let bars = parse_candles(symbol, response)?;

        debug!(
            "Finnhub: fetched {} bars for {} ({} to {})",
            bars.len(),
            symbol,
            start.format("%Y-%m-%d"),
            end.format("%Y-%m-%d")
        );
        Ok(bars)
    }

    async fn fetch_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        let text = self.fetch("/stock/profile2", &[("symbol", symbol)]).await?;

        // Unknown symbols come back as an empty object
        if text.trim() == "{}" {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        let response: ProfileResponse = parse_json(&text, PROVIDER_ID, "profile")?;
        if response.name.is_none() && response.ticker.is_none() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        Ok(CompanyProfile {
            symbol: symbol.to_string(),
            source: Some(PROVIDER_ID.to_string()),
            name: response.name,
            sector: response.finnhub_industry.clone(),
            industry: response.finnhub_industry,
            exchange: response.exchange,
            website: response.weburl,
            country: response.country,
            logo_url: response.logo,
            // Finnhub reports both in millions
            market_cap: response.market_capitalization.map(|mc| mc * 1_000_000.0),
            shares_outstanding: response.share_outstanding.map(|s| s * 1_000_000.0),
            ..Default::default()
        })
    }

    async fn fetch_metrics(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        let text = self
            .fetch("/stock/metric", &[("symbol", symbol), ("metric", "all")])
            .await?;
        let response: MetricResponse = parse_json(&text, PROVIDER_ID, "metric")?;
        let metric = response.metric;

        if metric.eps_ttm.is_none() && metric.revenue_per_share_ttm.is_none() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        Ok(Financials {
            symbol: symbol.to_string(),
            currency: "USD".to_string(),
            statements: vec![trailing_statement(&metric)],
        })
    }
}

/// Finnhub sometimes answers 200 with `{"error": "..."}`.
fn check_api_error(text: &str) -> Result<(), MarketDataError> {
    if !text.contains("\"error\"") {
        return Ok(());
    }
    if let Ok(ErrorResponse { error: Some(msg) }) = serde_json::from_str::<ErrorResponse>(text) {
        return Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: msg,
        });
    }
    Ok(())
}

/// Trailing-twelve-month figures as a single statement. Revenue and net
/// income are per share, since that is all the metric endpoint reports.
fn trailing_statement(metric: &Metric) -> FinancialStatement {
    let net_per_share = metric
        .revenue_per_share_ttm
        .zip(metric.net_profit_margin_ttm)
        .map(|(revenue, margin)| revenue * margin / 100.0);
    FinancialStatement {
        fiscal_date: "TTM".to_string(),
        period: StatementPeriod::Annual,
        revenue: metric.revenue_per_share_ttm,
        net_income: net_per_share,
        eps: metric.eps_ttm,
        ..Default::default()
    }
}

fn parse_quote(symbol: &str, response: QuoteResponse) -> Result<Quote, MarketDataError> {
    let close = response
        .c
        .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    // Finnhub returns zeros for unknown symbols instead of an error
    if close == 0.0 && response.o.unwrap_or(0.0) == 0.0 {
        return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
    }

    let price = decimal(close).ok_or_else(|| MarketDataError::ProviderError {
        provider: PROVIDER_ID.to_string(),
        message: format!("Invalid close price: {}", close),
    })?;

    let mut quote = Quote::new(symbol, price, PROVIDER_ID);
    if let Some(pc) = response.pc.and_then(decimal) {
        quote = quote.with_previous_close(pc);
    }
    quote.open = response.o.and_then(decimal);
    quote.high = response.h.and_then(decimal);
    quote.low = response.l.and_then(decimal);
    if let Some(ts) = response.t.and_then(|ts| Utc.timestamp_opt(ts, 0).single()) {
        quote.timestamp = ts;
    }
    Ok(quote)
}

fn parse_candles(symbol: &str, response: CandleResponse) -> Result<Vec<HistoricalBar>, MarketDataError> {
    if response.s == "no_data" {
        return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
    }
    if response.s != "ok" {
        return Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: format!("Unexpected candle status: {}", response.s),
        });
    }

    let len = response.t.len();
    if response.c.len() != len
        || response.o.len() != len
        || response.h.len() != len
        || response.l.len() != len
    {
        return Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: "Mismatched array lengths in candle response".to_string(),
        });
    }

    let mut bars = Vec::with_capacity(len);
    for i in 0..len {
        let Some(timestamp) = Utc.timestamp_opt(response.t[i], 0).single() else {
            warn!("Invalid timestamp at index {}: {}", i, response.t[i]);
            continue;
        };
        let (Some(open), Some(high), Some(low), Some(close)) = (
            decimal(response.o[i]),
            decimal(response.h[i]),
            decimal(response.l[i]),
            decimal(response.c[i]),
        ) else {
            warn!("Invalid prices at index {} for {}", i, symbol);
            continue;
        };
        bars.push(HistoricalBar {
            timestamp,
            open,
            high,
            low,
            close,
            volume: response.v.get(i).copied().and_then(decimal),
        });
    }

    bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    Ok(bars)
}

// ============================================================================
// MarketDataProvider Implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for FinnhubProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[
                DataType::Quote,
                DataType::Realtime,
                DataType::Profile,
                DataType::Financials,
                DataType::Historical,
            ],
            max_batch_size: 1,
            requires_credential: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            // 60/min sustained over a day
            requests_per_day: 86_400,
            requests_per_minute: Some(60),
        }
    }

    fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        debug!("Fetching quote for {} from Finnhub", symbol);
        self.fetch_quote(symbol).await
    }

    async fn get_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        debug!("Fetching profile for {} from Finnhub", symbol);
        self.fetch_profile(symbol).await
    }

    async fn get_financials(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        debug!("Fetching metrics for {} from Finnhub", symbol);
        self.fetch_metrics(symbol).await
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        self.fetch_candles(symbol, start, end).await
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
    fn test_provider_id() {
        let provider = FinnhubProvider::new("test_key".to_string());
        assert_eq!(provider.id(), "finnhub");
    }

    #[test]
    fn test_has_credential() {
        assert!(FinnhubProvider::new("key".to_string()).has_credential());
        assert!(!FinnhubProvider::new(String::new()).has_credential());
    }

    #[test]
    fn test_provider_capabilities() {
        let caps = FinnhubProvider::new("test_key".to_string()).capabilities();
        assert!(caps.supports(DataType::Quote));
        assert!(caps.supports(DataType::Realtime));
        assert!(caps.requires_credential);
        assert_eq!(caps.max_batch_size, 1);
    }

    #[test]
    fn test_rate_limit() {
        let limit = FinnhubProvider::new("test_key".to_string()).rate_limit();
        assert_eq!(limit.requests_per_minute, Some(60));
    }

    #[test]
    fn test_quote_response_parsing() {
        let json = r#"{
            "c": 150.25,
            "d": 1.50,
            "dp": 1.01,
            "h": 152.00,
            "l": 148.50,
            "o": 149.00,
            "pc": 148.75,
            "t": 1704067200
        }"#;

        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        let quote = parse_quote("AAPL", response).unwrap();
        assert_eq!(quote.price, dec!(150.25));
        assert_eq!(quote.previous_close, Some(dec!(148.75)));
        assert_eq!(quote.change, dec!(1.50));
        assert_eq!(quote.open, Some(dec!(149)));
        assert_eq!(quote.source, "finnhub");
        assert_eq!(quote.timestamp.timestamp(), 1704067200);
    }

    #[test]
    fn test_zero_quote_is_symbol_not_found() {
        let json = r#"{"c": 0, "d": null, "dp": null, "h": 0, "l": 0, "o": 0, "pc": 0, "t": 0}"#;
        let response: QuoteResponse = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parse_quote("NOPE", response),
            Err(MarketDataError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_candle_response_parsing() {
        let json = r#"{
            "s": "ok",
            "c": [151.0, 150.0],
            "h": [152.0, 151.0],
            "l": [150.0, 149.0],
            "o": [150.5, 149.5],
            "v": [1100000, 1000000],
            "t": [1704153600, 1704067200]
        }"#;

        let response: CandleResponse = serde_json::from_str(json).unwrap();
        let bars = parse_candles("AAPL", response).unwrap();
        assert_eq!(bars.len(), 2);
        // Sorted ascending
        assert_eq!(bars[0].close, dec!(150));
        assert_eq!(bars[1].volume, Some(dec!(1100000)));
    }

    #[test]
    fn test_candle_response_no_data() {
        let response: CandleResponse = serde_json::from_str(r#"{"s": "no_data"}"#).unwrap();
        assert!(matches!(
            parse_candles("AAPL", response),
            Err(MarketDataError::SymbolNotFound(_))
        ));
    }

    #[test]
    fn test_limit_error_body() {
        let err = check_api_error(r#"{"error": "API limit reached. Please try again later."}"#)
            .unwrap_err();
        match err {
            MarketDataError::ProviderError { message, .. } => {
                assert!(message.contains("API limit reached"))
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(check_api_error(r#"{"c": 1.0}"#).is_ok());
    }

    #[test]
    fn test_profile_response_parsing() {
        let json = r#"{
            "name": "Apple Inc",
            "ticker": "AAPL",
            "exchange": "NASDAQ NMS - GLOBAL MARKET",
            "currency": "USD",
            "finnhubIndustry": "Technology",
            "country": "US",
            "weburl": "https://www.apple.com/",
            "logo": "https://static.finnhub.io/logo/aapl.png",
            "marketCapitalization": 2800000,
            "shareOutstanding": 15550
        }"#;

        let response: ProfileResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.name, Some("Apple Inc".to_string()));
        assert_eq!(response.finnhub_industry, Some("Technology".to_string()));
        assert_eq!(response.market_capitalization, Some(2800000.0));
        assert_eq!(response.share_outstanding, Some(15550.0));
    }

    #[test]
    fn test_metric_response_parsing() {
        let json = r#"{"metric": {"epsTTM": 6.13, "revenuePerShareTTM": 24.0, "netProfitMarginTTM": 25.0}, "symbol": "AAPL"}"#;
        let response: MetricResponse = serde_json::from_str(json).unwrap();
        let statement = trailing_statement(&response.metric);
        assert_eq!(statement.eps, Some(6.13));
        assert_eq!(statement.net_income, Some(6.0));
        assert_eq!(statement.fiscal_date, "TTM");
    }
}
