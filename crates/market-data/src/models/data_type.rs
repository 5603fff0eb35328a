use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Category of data a caller can request.
///
/// Each data type has its own strategy: provider order and cache policy.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    /// Latest quote snapshot
    Quote,
    /// Company profile (name, sector, industry, ...)
    Profile,
    /// Income statement summaries
    Financials,
    /// Daily OHLCV bars
    Historical,
    /// Quote snapshot that must not be served from cache
    Realtime,
}

impl DataType {
    pub const ALL: [DataType; 5] = [
        DataType::Quote,
        DataType::Profile,
        DataType::Financials,
        DataType::Historical,
        DataType::Realtime,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::Profile => "profile",
            Self::Financials => "financials",
            Self::Historical => "historical",
            Self::Realtime => "realtime",
        }
    }

    /// Quote-shaped types that providers can serve for many symbols per call.
    pub fn is_quote_like(&self) -> bool {
        matches!(self, Self::Quote | Self::Realtime)
    }

    /// Cache key for a symbol of this type.
    pub fn cache_key(&self, symbol: &str) -> String {
        format!("{}:{}", self.as_str(), symbol.to_uppercase())
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "quote" => Ok(Self::Quote),
            "profile" => Ok(Self::Profile),
            "financials" => Ok(Self::Financials),
            "historical" => Ok(Self::Historical),
            "realtime" => Ok(Self::Realtime),
            other => Err(format!("Unknown data type: {}", other)),
        }
    }
}
