//! Financial Modeling Prep market data provider implementation.
//!
//! - Quotes via /quote/{symbols}, up to 10 symbols per call on the free tier
//! - Company profiles via /profile/{symbol}
//! - Income statements via /income-statement/{symbol}
//! - Daily history via /historical-price-full/{symbol}
//!
//! Free tier: 250 calls per day.
//! API documentation: https://site.financialmodelingprep.com/developer/docs

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::errors::MarketDataError;
use crate::models::{
    CompanyProfile, DataType, FinancialStatement, Financials, HistoricalBar, Quote,
    StatementPeriod, PROVIDER_FMP,
};
use crate::provider::http::{build_client, decimal, parse_json, send};
use crate::provider::{MarketDataProvider, ProviderCapabilities, RateLimit};

const BASE_URL: &str = "https://financialmodelingprep.com/api/v3";
const PROVIDER_ID: &str = PROVIDER_FMP;

/// Symbols accepted by one /quote call.
pub const MAX_BATCH_SIZE: usize = 10;

/// Annual statements requested per call.
const STATEMENT_LIMIT: &str = "5";

// ============================================================================
// API Response Structures
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QuoteItem {
    symbol: String,
    price: Option<f64>,
    open: Option<f64>,
    day_high: Option<f64>,
    day_low: Option<f64>,
    previous_close: Option<f64>,
    volume: Option<f64>,
    market_cap: Option<f64>,
    pe: Option<f64>,
    eps: Option<f64>,
    timestamp: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProfileItem {
    symbol: String,
    company_name: Option<String>,
    sector: Option<String>,
    industry: Option<String>,
    exchange_short_name: Option<String>,
    website: Option<String>,
    description: Option<String>,
    country: Option<String>,
    full_time_employees: Option<String>,
    image: Option<String>,
    mkt_cap: Option<f64>,
    last_div: Option<f64>,
    price: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IncomeStatementItem {
    date: String,
    reported_currency: Option<String>,
    period: Option<String>,
    revenue: Option<f64>,
    gross_profit: Option<f64>,
    operating_income: Option<f64>,
    net_income: Option<f64>,
    eps: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct HistoricalResponse {
    #[serde(default)]
    historical: Vec<HistoricalItem>,
}

#[derive(Debug, Deserialize)]
struct HistoricalItem {
    date: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: Option<f64>,
}

// ============================================================================
// FmpProvider
// ============================================================================

/// Financial Modeling Prep provider.
pub struct FmpProvider {
    client: Client,
    api_key: String,
}

impl FmpProvider {
    pub fn new(api_key: String) -> Self {
        Self {
            client: build_client(),
            api_key,
        }
    }

    async fn fetch(&self, path: &str, params: &[(&str, &str)]) -> Result<String, MarketDataError> {
        if self.api_key.is_empty() {
            return Err(MarketDataError::MissingCredential {
                provider: PROVIDER_ID.to_string(),
            });
        }

        let url = format!("{}{}", BASE_URL, path);
        let request = self
            .client
            .get(&url)
            .query(params)
            .query(&[("apikey", self.api_key.as_str())]);

        debug!("FMP request: {}", path);

        let text = send(request, PROVIDER_ID).await?;
        check_api_error(&text)?;
        Ok(text)
    }

    async fn fetch_quotes(&self, symbols: &[String]) -> Result<Vec<Quote>, MarketDataError> {
        let path = format!("/quote/{}", symbols.join(","));
        let text = self.fetch(&path, &[]).await?;
        let items: Vec<QuoteItem> = parse_json(&text, PROVIDER_ID, "quote")?;
        Ok(items.into_iter().filter_map(QuoteItem::into_quote).collect())
    }

    async fn fetch_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        let text = self.fetch(&format!("/profile/{}", symbol), &[]).await?;
        let items: Vec<ProfileItem> = parse_json(&text, PROVIDER_ID, "profile")?;
        items
            .into_iter()
            .next()
            .map(ProfileItem::into_profile)
            .ok_or_else(|| MarketDataError::SymbolNotFound(symbol.to_string()))
    }

    async fn fetch_income_statement(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        let text = self
            .fetch(
                &format!("/income-statement/{}", symbol),
                &[("limit", STATEMENT_LIMIT)],
            )
            .await?;
        let items: Vec<IncomeStatementItem> = parse_json(&text, PROVIDER_ID, "income statement")?;
        if items.is_empty() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(parse_income_statement(symbol, items))
    }

    async fn fetch_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        let from = start.format("%Y-%m-%d").to_string();
        let to = end.format("%Y-%m-%d").to_string();
        let text = self
            .fetch(
                &format!("/historical-price-full/{}", symbol),
                &[("from", from.as_str()), ("to", to.as_str())],
            )
            .await?;
        let response: HistoricalResponse = parse_json(&text, PROVIDER_ID, "historical")?;
        if response.historical.is_empty() {
            return Err(MarketDataError::SymbolNotFound(symbol.to_string()));
        }
        Ok(parse_historical(response.historical))
    }
}

/// FMP reports errors as `{"Error Message": "..."}`, including its daily
/// "Limit Reach" message.
fn check_api_error(text: &str) -> Result<(), MarketDataError> {
    if !text.contains("Error Message") {
        return Ok(());
    }
    let body: Value = match serde_json::from_str(text) {
        Ok(body) => body,
        Err(_) => return Ok(()),
    };
    match body.get("Error Message").and_then(Value::as_str) {
        Some(msg) => Err(MarketDataError::ProviderError {
            provider: PROVIDER_ID.to_string(),
            message: msg.to_string(),
        }),
        None => Ok(()),
    }
}

impl QuoteItem {
    fn into_quote(self) -> Option<Quote> {
        let price = self.price.and_then(decimal)?;
        let mut quote = Quote::new(self.symbol.to_uppercase(), price, PROVIDER_ID);
        if let Some(pc) = self.previous_close.and_then(decimal) {
            quote = quote.with_previous_close(pc);
        }
        quote.open = self.open.and_then(decimal);
        quote.high = self.day_high.and_then(decimal);
        quote.low = self.day_low.and_then(decimal);
        quote.volume = self.volume.and_then(decimal);
        quote.market_cap = self.market_cap.and_then(decimal);
        quote.pe_ratio = self.pe;
        quote.eps = self.eps;
        if let Some(ts) = self.timestamp.and_then(|t| Utc.timestamp_opt(t, 0).single()) {
            quote.timestamp = ts;
        }
        Some(quote)
    }
}

impl ProfileItem {
    fn into_profile(self) -> CompanyProfile {
        let dividend_yield = self
            .last_div
            .zip(self.price)
            .filter(|(_, price)| *price > 0.0)
            .map(|(div, price)| div / price);
        CompanyProfile {
            symbol: self.symbol,
            source: Some(PROVIDER_ID.to_string()),
            name: self.company_name,
            sector: self.sector,
            industry: self.industry,
            exchange: self.exchange_short_name,
            website: self.website,
            description: self.description,
            country: self.country,
            employees: self
                .full_time_employees
                .as_deref()
                .and_then(|e| e.trim().parse().ok()),
            logo_url: self.image,
            market_cap: self.mkt_cap,
            dividend_yield,
            ..Default::default()
        }
    }
}

fn parse_income_statement(symbol: &str, items: Vec<IncomeStatementItem>) -> Financials {
    let currency = items
        .first()
        .and_then(|i| i.reported_currency.clone())
        .unwrap_or_else(|| "USD".to_string());
    let statements = items
        .into_iter()
        .map(|item| FinancialStatement {
            period: match item.period.as_deref() {
                Some("FY") | None => StatementPeriod::Annual,
                Some(_) => StatementPeriod::Quarterly,
            },
            fiscal_date: item.date,
            revenue: item.revenue,
            gross_profit: item.gross_profit,
            operating_income: item.operating_income,
            net_income: item.net_income,
            eps: item.eps,
            ..Default::default()
        })
        .collect();
    Financials {
        symbol: symbol.to_string(),
        currency,
        statements,
    }
}

fn parse_historical(items: Vec<HistoricalItem>) -> Vec<HistoricalBar> {
    let mut bars: Vec<HistoricalBar> = items
        .into_iter()
        .filter_map(|item| {
            let date = NaiveDate::parse_from_str(&item.date, "%Y-%m-%d").ok()?;
            Some(HistoricalBar {
                timestamp: Utc.from_utc_datetime(&date.and_hms_opt(0, 0, 0)?),
                open: decimal(item.open)?,
                high: decimal(item.high)?,
                low: decimal(item.low)?,
                close: decimal(item.close)?,
                volume: item.volume.and_then(decimal),
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
impl MarketDataProvider for FmpProvider {
    fn id(&self) -> &'static str {
        PROVIDER_ID
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities {
            data_types: &[
                DataType::Profile,
                DataType::Financials,
                DataType::Quote,
                DataType::Historical,
            ],
            max_batch_size: MAX_BATCH_SIZE,
            requires_credential: true,
        }
    }

    fn rate_limit(&self) -> RateLimit {
        RateLimit {
            requests_per_day: 250,
            requests_per_minute: None,
        }
    }

    fn has_credential(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn get_quote(&self, symbol: &str) -> Result<Quote, MarketDataError> {
        debug!("Fetching quote for {} from FMP", symbol);
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

    async fn get_profile(&self, symbol: &str) -> Result<CompanyProfile, MarketDataError> {
        debug!("Fetching profile for {} from FMP", symbol);
        self.fetch_profile(symbol).await
    }

    async fn get_financials(&self, symbol: &str) -> Result<Financials, MarketDataError> {
        debug!("Fetching income statement for {} from FMP", symbol);
        self.fetch_income_statement(symbol).await
    }

    async fn get_historical(
        &self,
        symbol: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<HistoricalBar>, MarketDataError> {
        self.fetch_historical(symbol, start, end).await
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
        let caps = FmpProvider::new("key".to_string()).capabilities();
        assert_eq!(caps.max_batch_size, 10);
        assert!(caps.supports(DataType::Financials));
        assert!(!caps.supports(DataType::Realtime));
    }

    #[test]
    fn test_quote_parsing() {
        let json = r#"[{
            "symbol": "AAPL",
            "name": "Apple Inc.",
            "price": 150.25,
            "changesPercentage": 1.01,
            "change": 1.5,
            "dayLow": 148.5,
            "dayHigh": 152.0,
            "marketCap": 2350000000000,
            "volume": 51234567,
            "open": 149.0,
            "previousClose": 148.75,
            "eps": 6.13,
            "pe": 24.51,
            "timestamp": 1704067200
        }]"#;
        let items: Vec<QuoteItem> = serde_json::from_str(json).unwrap();
        let quote = items.into_iter().next().unwrap().into_quote().unwrap();
        assert_eq!(quote.price, dec!(150.25));
        assert_eq!(quote.change, dec!(1.5));
        assert_eq!(quote.pe_ratio, Some(24.51));
        assert_eq!(quote.source, "fmp");
    }

    #[test]
    fn test_limit_reach_error() {
        let text = r#"{"Error Message": "Limit Reach . Please upgrade your plan or visit our documentation for more details"}"#;
        match check_api_error(text) {
            Err(MarketDataError::ProviderError { message, .. }) => {
                assert!(message.starts_with("Limit Reach"))
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert!(check_api_error("[]").is_ok());
    }

    #[test]
    fn test_profile_parsing() {
        let json = r#"[{
            "symbol": "AAPL",
            "companyName": "Apple Inc.",
            "sector": "Technology",
            "industry": "Consumer Electronics",
            "exchangeShortName": "NASDAQ",
            "fullTimeEmployees": "164000",
            "mktCap": 2350000000000,
            "lastDiv": 0.96,
            "price": 192.0
        }]"#;
        let items: Vec<ProfileItem> = serde_json::from_str(json).unwrap();
        let profile = items.into_iter().next().unwrap().into_profile();
        assert_eq!(profile.name.as_deref(), Some("Apple Inc."));
        assert_eq!(profile.employees, Some(164_000));
        assert!((profile.dividend_yield.unwrap() - 0.005).abs() < 1e-9);
    }

    #[test]
    fn test_income_statement_parsing() {
        let json = r#"[
            {"date": "2023-09-30", "reportedCurrency": "USD", "period": "FY", "revenue": 383285000000, "netIncome": 96995000000, "eps": 6.16},
            {"date": "2022-09-24", "reportedCurrency": "USD", "period": "FY", "revenue": 394328000000, "netIncome": 99803000000, "eps": 6.15}
        ]"#;
        let items: Vec<IncomeStatementItem> = serde_json::from_str(json).unwrap();
        let financials = parse_income_statement("AAPL", items);
        assert_eq!(financials.statements.len(), 2);
        assert_eq!(financials.latest().unwrap().eps, Some(6.16));
        assert_eq!(financials.latest().unwrap().period, StatementPeriod::Annual);
    }

    #[test]
    fn test_historical_parsing_sorted() {
        let json = r#"{"symbol": "AAPL", "historical": [
            {"date": "2024-01-03", "open": 2, "high": 3, "low": 1, "close": 2.5, "volume": 100},
            {"date": "2024-01-02", "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 90}
        ]}"#;
        let response: HistoricalResponse = serde_json::from_str(json).unwrap();
        let bars = parse_historical(response.historical);
        assert_eq!(bars[0].close, dec!(1.5));
        assert_eq!(bars[1].close, dec!(2.5));
    }
}
