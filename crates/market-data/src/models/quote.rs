use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest quote snapshot for a symbol
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quote {
    pub symbol: String,

    /// Current/last traded price
    pub price: Decimal,

    /// Absolute change against the previous close
    pub change: Decimal,

    /// Percentage change against the previous close
    pub change_percent: Decimal,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub open: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub high: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub low: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_close: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_cap: Option<Decimal>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub pe_ratio: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub eps: Option<f64>,

    pub currency: String,

    pub timestamp: DateTime<Utc>,

    /// Source of the quote (finnhub, fmp, mock, fallback, ...)
    pub source: String,
}

impl Quote {
    /// Create a quote with minimal required fields
    pub fn new(symbol: impl Into<String>, price: Decimal, source: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price,
            change: Decimal::ZERO,
            change_percent: Decimal::ZERO,
            open: None,
            high: None,
            low: None,
            previous_close: None,
            volume: None,
            market_cap: None,
            pe_ratio: None,
            eps: None,
            currency: "USD".to_string(),
            timestamp: Utc::now(),
            source: source.into(),
        }
    }

    /// Set the previous close and derive change/changePercent from it.
    pub fn with_previous_close(mut self, previous_close: Decimal) -> Self {
        self.previous_close = Some(previous_close);
        self.change = (self.price - previous_close).round_dp(2);
        self.change_percent = if previous_close.is_zero() {
            Decimal::ZERO
        } else {
            ((self.price - previous_close) / previous_close * Decimal::ONE_HUNDRED).round_dp(2)
        };
        self
    }
}
