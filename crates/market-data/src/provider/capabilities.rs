//! Provider capabilities and advertised quota.
//!
//! These are what an adapter knows about its upstream API. Configuration
//! may tighten or relax the limits for a given deployment.

use crate::models::DataType;

/// Describes what a market data provider can do.
#[derive(Clone, Debug)]
pub struct ProviderCapabilities {
    /// Data types this provider serves.
    pub data_types: &'static [DataType],

    /// Maximum symbols in one quote call. 1 means no batch endpoint.
    pub max_batch_size: usize,

    /// Whether the upstream API needs a key.
    pub requires_credential: bool,
}

impl ProviderCapabilities {
    pub fn supports(&self, data_type: DataType) -> bool {
        self.data_types.contains(&data_type)
    }
}

/// Quota the upstream API grants on its free tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RateLimit {
    pub requests_per_day: u32,
    pub requests_per_minute: Option<u32>,
}

impl RateLimit {
    /// No effective limit.
    pub const UNLIMITED: RateLimit = RateLimit {
        requests_per_day: u32::MAX,
        requests_per_minute: None,
    };
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            requests_per_day: 500,
            requests_per_minute: Some(60),
        }
    }
}
