//! Per-data-type provider ordering and cache policy.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::{
    DataType, PROVIDER_ALPHA_VANTAGE, PROVIDER_FINNHUB, PROVIDER_FMP, PROVIDER_MOCK,
    PROVIDER_TWELVE_DATA,
};

/// How long a successful result is cached, and whether the cache is read
/// before calling providers.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CachePolicy {
    /// 24 hours
    Aggressive,
    /// 1 hour
    Normal,
    /// 5 minutes, never served from cache on the way in
    Minimal,
}

impl CachePolicy {
    pub fn ttl(&self) -> Duration {
        match self {
            Self::Aggressive => Duration::from_secs(24 * 60 * 60),
            Self::Normal => Duration::from_secs(60 * 60),
            Self::Minimal => Duration::from_secs(5 * 60),
        }
    }

    pub fn reads_cache(&self) -> bool {
        !matches!(self, Self::Minimal)
    }
}

/// Ordered provider list (primary first) and cache policy for one data type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Strategy {
    pub providers: Vec<String>,
    pub cache_policy: CachePolicy,
}

impl Strategy {
    pub fn new(providers: &[&str], cache_policy: CachePolicy) -> Self {
        Self {
            providers: providers.iter().map(|p| p.to_string()).collect(),
            cache_policy,
        }
    }
}

/// Strategy per data type.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyTable {
    strategies: HashMap<DataType, Strategy>,
}

impl StrategyTable {
    pub fn empty() -> Self {
        Self {
            strategies: HashMap::new(),
        }
    }

    /// Strategy for `data_type`. Types without an entry fall back to the
    /// mock provider with a minimal policy.
    pub fn get(&self, data_type: DataType) -> Strategy {
        self.strategies
            .get(&data_type)
            .cloned()
            .unwrap_or_else(|| Strategy::new(&[PROVIDER_MOCK], CachePolicy::Minimal))
    }

    pub fn set(&mut self, data_type: DataType, strategy: Strategy) {
        self.strategies.insert(data_type, strategy);
    }

    pub fn with(mut self, data_type: DataType, strategy: Strategy) -> Self {
        self.set(data_type, strategy);
        self
    }

    /// Every provider id named by any strategy, deduplicated.
    pub fn provider_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .strategies
            .values()
            .flat_map(|s| s.providers.iter().cloned())
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

impl Default for StrategyTable {
    fn default() -> Self {
        Self::empty()
            .with(
                DataType::Quote,
                Strategy::new(
                    &[
                        PROVIDER_FINNHUB,
                        PROVIDER_TWELVE_DATA,
                        PROVIDER_FMP,
                        PROVIDER_ALPHA_VANTAGE,
                        PROVIDER_MOCK,
                    ],
                    CachePolicy::Normal,
                ),
            )
            .with(
                DataType::Realtime,
                Strategy::new(
                    &[PROVIDER_FINNHUB, PROVIDER_TWELVE_DATA, PROVIDER_MOCK],
                    CachePolicy::Minimal,
                ),
            )
            .with(
                DataType::Profile,
                Strategy::new(
                    &[PROVIDER_FMP, PROVIDER_FINNHUB, PROVIDER_ALPHA_VANTAGE, PROVIDER_MOCK],
                    CachePolicy::Aggressive,
                ),
            )
            .with(
                DataType::Financials,
                Strategy::new(
                    &[PROVIDER_FMP, PROVIDER_ALPHA_VANTAGE, PROVIDER_MOCK],
                    CachePolicy::Aggressive,
                ),
            )
            .with(
                DataType::Historical,
                Strategy::new(
                    &[
                        PROVIDER_TWELVE_DATA,
                        PROVIDER_ALPHA_VANTAGE,
                        PROVIDER_FMP,
                        PROVIDER_MOCK,
                    ],
                    CachePolicy::Aggressive,
                ),
            )
    }
}
