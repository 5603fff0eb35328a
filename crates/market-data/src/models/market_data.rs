use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::data_type::DataType;
use super::financials::Financials;
use super::profile::CompanyProfile;
use super::quote::Quote;

/// Daily OHLCV bar
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistoricalBar {
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub volume: Option<Decimal>,
}

/// Provider response body, one variant per data shape.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "lowercase")]
pub enum Payload {
    Quote(Quote),
    Profile(CompanyProfile),
    Financials(Financials),
    Historical(Vec<HistoricalBar>),
}

impl Payload {
    /// Whether this payload can answer a request of `data_type`.
    pub fn matches(&self, data_type: DataType) -> bool {
        matches!(
            (self, data_type),
            (Payload::Quote(_), DataType::Quote | DataType::Realtime)
                | (Payload::Profile(_), DataType::Profile)
                | (Payload::Financials(_), DataType::Financials)
                | (Payload::Historical(_), DataType::Historical)
        )
    }

    pub fn as_quote(&self) -> Option<&Quote> {
        match self {
            Payload::Quote(quote) => Some(quote),
            _ => None,
        }
    }
}

/// The envelope returned by every fetch path.
///
/// `source` names the provider (or `fallback` for synthetic data) and
/// `is_stale` marks values served from cache past their TTL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketData {
    pub symbol: String,
    pub data_type: DataType,
    pub source: String,
    pub fetched_at: DateTime<Utc>,
    #[serde(rename = "_isStale", default)]
    pub is_stale: bool,
    pub payload: Payload,
}

impl MarketData {
    pub fn new(
        symbol: impl Into<String>,
        data_type: DataType,
        source: impl Into<String>,
        fetched_at: DateTime<Utc>,
        payload: Payload,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            data_type,
            source: source.into(),
            fetched_at,
            is_stale: false,
            payload,
        }
    }

    pub fn stale(mut self) -> Self {
        self.is_stale = true;
        self
    }

    pub fn quote(&self) -> Option<&Quote> {
        self.payload.as_quote()
    }
}

/// Result of a multi-symbol quote request.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchQuotes {
    pub quotes: HashMap<String, Quote>,
    pub failed: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_payload_matches_data_type() {
        let payload = Payload::Quote(Quote::new("AAPL", dec!(1), "mock"));
        assert!(payload.matches(DataType::Quote));
        assert!(payload.matches(DataType::Realtime));
        assert!(!payload.matches(DataType::Profile));
    }

    #[test]
    fn test_stale_flag_serialized_with_underscore() {
        let data = MarketData::new(
            "AAPL",
            DataType::Quote,
            "finnhub",
            Utc::now(),
            Payload::Quote(Quote::new("AAPL", dec!(150.25), "finnhub")),
        )
        .stale();

        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["_isStale"], serde_json::Value::Bool(true));
        assert_eq!(json["payload"]["kind"], "quote");
        assert_eq!(json["dataType"], "quote");
    }
}
