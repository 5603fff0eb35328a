//! Static configuration for the fetch layer.
//!
//! `MarketDataConfig::default()` carries the shipped provider limits and
//! strategy orders; `from_env` adds credentials and the usage file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::fallback::FallbackConfig;
use crate::models::{
    PROVIDER_ALPHA_VANTAGE, PROVIDER_FINNHUB, PROVIDER_FMP, PROVIDER_MOCK, PROVIDER_TWELVE_DATA,
};
use crate::optimizer::OptimizerConfig;
use crate::provider::{
    AlphaVantageProvider, FinnhubProvider, FmpProvider, MarketDataProvider, MockProvider,
    TwelveDataProvider,
};
use crate::queue::RetryQueueConfig;
use crate::registry::{CircuitBreakerConfig, ProviderDescriptor, DEFAULT_USAGE_NAMESPACE};
use crate::strategy::StrategyTable;

pub const ENV_FINNHUB_API_KEY: &str = "ALFALYZER_FINNHUB_API_KEY";
pub const ENV_ALPHA_VANTAGE_API_KEY: &str = "ALFALYZER_ALPHA_VANTAGE_API_KEY";
pub const ENV_TWELVE_DATA_API_KEY: &str = "ALFALYZER_TWELVE_DATA_API_KEY";
pub const ENV_FMP_API_KEY: &str = "ALFALYZER_FMP_API_KEY";
pub const ENV_USAGE_FILE: &str = "ALFALYZER_USAGE_FILE";

/// One provider's limits and credential.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfig {
    pub id: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    pub daily_limit: u32,
    #[serde(default)]
    pub minute_limit: Option<u32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Symbols per quote call. `None` uses the adapter's maximum.
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default = "default_cost")]
    pub cost_per_call: f64,
}

fn default_enabled() -> bool {
    true
}

fn default_cost() -> f64 {
    1.0
}

impl ProviderConfig {
    pub fn new(id: impl Into<String>, daily_limit: u32, minute_limit: Option<u32>) -> Self {
        Self {
            id: id.into(),
            api_key: None,
            daily_limit,
            minute_limit,
            enabled: true,
            batch_size: None,
            cost_per_call: 1.0,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    fn key(&self) -> String {
        self.api_key.clone().unwrap_or_default()
    }

    /// Adapter for this entry, or `None` for an unknown id.
    pub fn build_provider(
        &self,
        clock: SharedClock,
        seed: Option<u64>,
    ) -> Option<Arc<dyn MarketDataProvider>> {
        let provider: Arc<dyn MarketDataProvider> = match self.id.as_str() {
            PROVIDER_FINNHUB => Arc::new(FinnhubProvider::new(self.key())),
            PROVIDER_ALPHA_VANTAGE => Arc::new(AlphaVantageProvider::new(self.key())),
            PROVIDER_TWELVE_DATA => Arc::new(TwelveDataProvider::new(self.key())),
            PROVIDER_FMP => Arc::new(FmpProvider::new(self.key())),
            PROVIDER_MOCK => match seed {
                Some(seed) => Arc::new(MockProvider::with_seed(seed, clock)),
                None => Arc::new(MockProvider::new(clock)),
            },
            _ => return None,
        };
        Some(provider)
    }

    /// Descriptor combining this entry with the adapter's capabilities.
    pub fn descriptor(&self, provider: &dyn MarketDataProvider) -> ProviderDescriptor {
        let capabilities = provider.capabilities();
        let batch_size = self
            .batch_size
            .unwrap_or(capabilities.max_batch_size)
            .min(capabilities.max_batch_size);
        let mut descriptor =
            ProviderDescriptor::new(&self.id, capabilities.data_types, self.daily_limit)
                .batch_size(batch_size)
                .cost_per_call(self.cost_per_call)
                .enabled(self.enabled)
                .has_credential(!capabilities.requires_credential || provider.has_credential())
                .synthetic(self.id == PROVIDER_MOCK);
        if let Some(limit) = self.minute_limit {
            descriptor = descriptor.minute_limit(limit);
        }
        descriptor
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct MarketDataConfig {
    pub providers: Vec<ProviderConfig>,
    pub strategies: StrategyTable,
    pub circuit: CircuitBreakerConfig,
    pub retry_queue: RetryQueueConfig,
    pub optimizer: OptimizerConfig,
    pub fallback: FallbackConfig,
    pub health_check_interval: Duration,
    /// Hard ceiling on one `fetch_data` call.
    pub request_timeout: Duration,
    pub usage_store_path: Option<PathBuf>,
    pub storage_namespace: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            providers: vec![
                ProviderConfig::new(PROVIDER_FINNHUB, 86_400, Some(60)),
                ProviderConfig::new(PROVIDER_ALPHA_VANTAGE, 25, Some(5)),
                ProviderConfig::new(PROVIDER_TWELVE_DATA, 800, Some(8)),
                ProviderConfig::new(PROVIDER_FMP, 250, None),
                ProviderConfig::new(PROVIDER_MOCK, u32::MAX, None),
            ],
            strategies: StrategyTable::default(),
            circuit: CircuitBreakerConfig::default(),
            retry_queue: RetryQueueConfig::default(),
            optimizer: OptimizerConfig::default(),
            fallback: FallbackConfig::default(),
            health_check_interval: Duration::from_secs(5 * 60),
            request_timeout: Duration::from_secs(30),
            usage_store_path: None,
            storage_namespace: DEFAULT_USAGE_NAMESPACE.to_string(),
        }
    }
}

impl MarketDataConfig {
    /// Defaults plus credentials and the usage file from the environment.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        for (provider, var) in [
            (PROVIDER_FINNHUB, ENV_FINNHUB_API_KEY),
            (PROVIDER_ALPHA_VANTAGE, ENV_ALPHA_VANTAGE_API_KEY),
            (PROVIDER_TWELVE_DATA, ENV_TWELVE_DATA_API_KEY),
            (PROVIDER_FMP, ENV_FMP_API_KEY),
        ] {
            if let Some(key) = env_value(var) {
                if let Some(entry) = config.provider_mut(provider) {
                    entry.api_key = Some(key);
                }
            } else {
                info!("No credential for '{}' ({} unset)", provider, var);
            }
        }
        config.usage_store_path = env_value(ENV_USAGE_FILE).map(PathBuf::from);
        config
    }

    pub fn provider(&self, id: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.id == id)
    }

    pub fn provider_mut(&mut self, id: &str) -> Option<&mut ProviderConfig> {
        self.providers.iter_mut().find(|p| p.id == id)
    }

    /// Adapters and descriptors for every known configured provider.
    pub fn build_providers(
        &self,
        clock: &SharedClock,
    ) -> Vec<(Arc<dyn MarketDataProvider>, ProviderDescriptor)> {
        self.providers
            .iter()
            .filter_map(|entry| {
                let Some(provider) = entry.build_provider(clock.clone(), self.fallback.seed) else {
                    warn!("Ignoring unknown provider '{}' in configuration", entry.id);
                    return None;
                };
                let descriptor = entry.descriptor(provider.as_ref());
                Some((provider, descriptor))
            })
            .collect()
    }
}

fn env_value(var: &str) -> Option<String> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
