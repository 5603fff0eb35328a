//! Alpha Vantage market data provider implementation.
//!
//! This module provides market data from Alpha Vantage API:
//! - Quotes via GLOBAL_QUOTE
//! - Daily history via TIME_SERIES_DAILY
//! - Company fundamentals via OVERVIEW
//! - Income statements via INCOME_STATEMENT
//!
//! Note: Alpha Vantage free tier is limited to 25 calls per day and 5 per minute.
//! Throttling is reported in a 200 response body ("Note" / "Information"),
//! which is surfaced verbatim so the quota classifier can read it.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::errors::MarketDataError;
use crate::models::{
    CompanyProfile, DataType, FinancialStatement, Financials, HistoricalBar, Quote,
    StatementPeriod, PROVIDER_ALPHA_VANTAGE,
};
use crate::provider::http::{build_client, parse_decimal, parse_f64, parse_json, send};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://www.alphavantage.co/query";
const PROVIDER_ID: &str = PROVIDER_ALPHA_VANTAGE;

/// Alpha Vantage market data provider.
pub struct AlphaVantageProvider {
    client: Client,
    api_key: String,
}

// ============================================================================
// Response structures for Alpha Vantage API
// ============================================================================

/// Fields every Alpha Vantage response may carry instead of data.
#[derive(Debug, Default, Deserialize)]
struct ApiNotice {
    #[serde(rename = "Error Message")]
    error_message: Option<String>,
    #[serde(rename = "Note")]
    note: Option<String>,
    #[serde(rename = "Information")]
    information: Option<String>,
}

/// GLOBAL_QUOTE response
#[derive(Debug, Deserialize)]
struct GlobalQuoteResponse {
    #[serde(rename = "Global Quote")]
    global_quote: Option<GlobalQuote>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct GlobalQuote {
    #[serde(rename = "01. symbol")]
    symbol: Option<String>,
    #[serde(rename = "02. open")]
    open: Option<String>,
    #[serde(rename = "03. high")]
    high: Option<String>,
    #[serde(rename = "04. low")]
    low: Option<String>,
    #[serde(rename = "05. price")]
    price: Option<String>,
    #[serde(rename = "06. volume")]
    volume: Option<String>,
    #[serde(rename = "08. previous close")]
    previous_close: Option<String>,
}

/// TIME_SERIES_DAILY response
#[derive(Debug, Deserialize)]
struct TimeSeriesResponse {
    #[serde(rename = "Time Series (Daily)")]
    time_series: Option<HashMap<String, DailyBar>>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
struct DailyBar {
    #[serde(rename = "1. open")]
    open: String,
    #[serde(rename = "2. high")]
    high: String,
    #[serde(rename = "3. low")]
    low: String,
    #[serde(rename = "4. close")]
    close: String,
    #[serde(rename = "5. volume")]
    volume: String,
}

/// OVERVIEW response. The API returns many more fields than are mapped.
#[derive(Debug, Deserialize)]
struct CompanyOverviewResponse {
    #[serde(rename = "Symbol")]
    symbol: Option<String>,
    #[serde(rename = "Name")]
    name: Option<String>,
    #[serde(rename = "Description")]
    description: Option<String>,
    #[serde(rename = "Exchange")]
    exchange: Option<String>,
    #[serde(rename = "Country")]
    country: Option<String>,
    #[serde(rename = "Sector")]
    sector: Option<String>,
    #[serde(rename = "Industry")]
    industry: Option<String>,
    #[serde(rename = "MarketCapitalization")]
    market_capitalization: Option<String>,
    #[serde(rename = "SharesOutstanding")]
    shares_outstanding: Option<String>,
    #[serde(rename = "PERatio")]
    pe_ratio: Option<String>,
    #[serde(rename = "EPS")]
    eps: Option<String>,
    #[serde(rename = "DividendYield")]
    dividend_yield: Option<String>,
    #[serde(flatten)]
    notice: ApiNotice,
}

/// INCOME_STATEMENT response
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeStatementResponse {
    #[serde(default)]
    annual_reports: Vec<IncomeReport>,
    #[serde(flatten)]
    notice: ApiNotice,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeReport {
    fiscal_date_ending: String,
    reported_currency: Option<String>,
    total_revenue: Option<String>,
    gross_profit: Option<String>,
    operating_income: Option<String>,
    net_income: Option<String>,
}

impl CompanyOverviewResponse {
    fn into_profile(self, symbol: &str) -> CompanyProfile {
        CompanyProfile {
            symbol: self.symbol.unwrap_or_else(|| symbol.to_string()),
            source: Some(PROVIDER_ID.to_string()),
            name: self.name,
            sector: self.sector,
            industry: self.industry,
            exchange: self.exchange,
            description: self.description,
            country: self.country,
            market_cap: parse_f64(&self.market_capitalization),
            shares_outstanding: parse_f64(&self.shares_outstanding),
            pe_ratio: parse_f64(&self.pe_ratio),
            eps: parse_f64(&self.eps),
            dividend_yield: parse_f64(&self.dividend_yield),
            ..Default::default()
        }
    }
}

// ============================================================================
// AlphaVantageProvider implementation
// ============================================================================

impl AlphaVantageProvider {
    /// Create a new Alpha Vantage provider with the given API key.
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    /// Make a request to the Alpha Vantage API.
    async fn fetch(&self, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        if self.api_key.is_empty() {
            return Err(MarketDataError::MissingCredential {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let mut all_params: Vec<(&str, &str)> = params.to_vec();
        all_params.push(("apikey", &self.api_key));

        let url = reqwest::Url::parse_with_params(BASE_URL, &all_params).map_err(|e| {
            MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: format!("Failed to build URL: {}", e),
            }
        })?;

        debug!(
            "Alpha Vantage request: {}",
            url.as_str().replace(&self.api_key, "***")
        );

        send(self.client.get(url), PROVIDER_ID).await
    }

    async fn fetch_global_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        let text = self
            .fetch(&[("function", "GLOBAL_QUOTE"), ("symbol", symbol)])
            .await?;
        let response: GlobalQuoteResponse = parse_json(&text, PROVIDER_ID, "quote")?;
        check_api_error(&response.notice)?;
        let global = response
            .global_quote
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;
        parse_global_quote(symbol, global)
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        let params = [
            ("function", "TIME_SERIES_DAILY"),
            ("symbol", symbol),
            // 'full' is premium-only
            ("outputsize", "compact"),
        ];
        let text = self.fetch(&params).await?;
        let response: TimeSeriesResponse = parse_json(&text, PROVIDER_ID, "time series")?;
        check_api_error(&response.notice)?;

        let series = response
            .time_series
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;
        let bars = parse_daily_bars(series, start, end);

        debug!("Alpha Vantage: fetched {} bars for {}", bars.len(), symbol);
        Ok(bars)
    }

    async fn fetch_overview(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        let text = self
            .fetch(&[("function", "OVERVIEW"), ("symbol", symbol)])
            .await?;

        // Unknown symbols come back as an empty object
        if text.trim() == "{}" {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }

        let response: CompanyOverviewResponse = parse_json(&text, PROVIDER_ID, "overview")?;
        check_api_error(&response.notice)?;
        if response.name.is_none() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(response.into_profile(symbol))
    }

    async fn fetch_income_statement(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        let text = self
            .fetch(&[("function", "INCOME_STATEMENT"), ("symbol", symbol)])
            .await?;
        let response: IncomeStatementResponse = parse_json(&text, PROVIDER_ID, "income statement")?;
        check_api_error(&response.notice)?;
        if response.annual_reports.is_empty() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(parse_income_statement(symbol, response.annual_reports))
    }
}

/// Turn an API notice into an error.
///
/// Throttling notices become `ProviderError` with the provider's own text.
fn check_api_error(notice: &ApiNotice) -> Result<(), MarketDataError> {
    if let Some(msg) = &notice.error_message {
        if msg.contains("Invalid API call") || msg.contains("not found") {
            return Err(MarketDataError::SymbolNotFound(msg.clone()));
        }
        return Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: msg.clone(),
        });
    }

    for msg in [&notice.note, &notice.information].into_iter().flatten() {
        let lower = msg.to_lowercase();
        if lower.contains("api call frequency")
            || lower.contains("rate limit")
            || lower.contains("requests per day")
            || lower.contains("premium")
        {
            return Err(MarketDataError::ProviderError {
                provider: PROVIDER_ID.to_string(),
                message: msg.clone(),
            });
        }
        warn!("Alpha Vantage notice: {}", msg);
    }

    Ok(())
}

fn parse_date(date_str: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .and_then(|dt| Utc.from_local_datetime(&dt).single())
}

fn parse_global_quote(symbol: &str, global: GlobalQuote) -> Result<Quote, MarketDataError> {
    // An unknown symbol yields `"Global Quote": {}`
    let price = global
        .price
        .as_deref()
        .and_then(parse_decimal)
        .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))?;

    let symbol = global.symbol.unwrap_or_else(|| symbol.to_string());
    let mut quote = Quote::new(symbol, price, PROVIDER_ID);
    if let Some(pc) = global.previous_close.as_deref().and_then(parse_decimal) {
        quote = quote.with_previous_close(pc);
    }
    quote.open = global.open.as_deref().and_then(parse_decimal);
    quote.high = global.high.as_deref().and_then(parse_decimal);
    quote.low = global.low.as_deref().and_then(parse_decimal);
    quote.volume = global.volume.as_deref().and_then(parse_decimal);
    Ok(quote)
}

fn parse_daily_bars(
    series: HashMap<String, DailyBar>,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Vec<HistoricalBar> {
    let mut bars: Vec<HistoricalBar> = series
        .into_iter()
        .filter_map(|(date_str, daily)| {
            let timestamp = parse_date(&date_str)?;
            Some(HistoricalBar {
                timestamp,
                open: parse_decimal(&daily.open)?,
                high: parse_decimal(&daily.high)?,
                low: parse_decimal(&daily.low)?,
                close: parse_decimal(&daily.close)?,
                volume: parse_decimal(&daily.volume),
            })
        })
        .filter(|bar| bar.timestamp >= start && bar.timestamp <= end)
        .collect();
    bars.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    bars
}

fn parse_income_statement(symbol: &str, reports: Vec<IncomeReport>) -> Financials {
    let currency = reports
        .first()
        .and_then(|r| r.reported_currency.clone())
        .unwrap_or_else(|| "USD".to_string());
    let statements = reports
        .into_iter()
        .map(|report| FinancialStatement {
            fiscal_date: report.fiscal_date_ending,
            period: StatementPeriod::Annual,
            revenue: parse_f64(&report.total_revenue),
            gross_profit: parse_f64(&report.gross_profit),
            operating_income: parse_f64(&report.operating_income),
            net_income: parse_f64(&report.net_income),
            ..Default::default()
        })
        .collect();
    Financials {
        symbol: symbol.to_string(),
        currency,
        statements,
    }
}

// ============================================================================
// MarketDataProvider implementation
// ============================================================================

#[async_trait]
impl MarketDataProvider for AlphaVantageProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[
                DataType::Quote,
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
            requests_per_day: 25,
            requests_per_minute: Some(5),
        }
    }

    fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        debug!("Fetching quote for {} from Alpha Vantage", symbol);
        self.fetch_global_quote(symbol).await
    }

    async fn get_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        debug!("Fetching overview for {} from Alpha Vantage", symbol);
        self.fetch_overview(symbol).await
    }

    async fn get_financials(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        debug!("Fetching income statement for {} from Alpha Vantage", symbol);
        self.fetch_income_statement(symbol).await
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        self.fetch_daily(symbol, start, end).await
    }
}

// ============================================================================
// Tests
// ============================================================================
