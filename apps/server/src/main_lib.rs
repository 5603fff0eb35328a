use std::sync::Arc;

use alfalyzer_market_data::MarketDataService;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub const ENV_LOG_FORMAT: &str = "ALFALYZER_LOG_FORMAT";

pub struct AppState {
    pub service: Arc<MarketDataService>,
}

impl AppState {
    pub fn new(service: MarketDataService) -> Arc<Self> {
        Arc::new(Self {
            service: Arc::new(service),
        })
    }
}

pub fn init_tracing() {
    let log_format = std::env::var(ENV_LOG_FORMAT).unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

/// Builds the service and starts its background tasks.
pub async fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    if let Some(path) = &config.market_data.usage_store_path {
        tracing::info!("Provider usage file in use: {}", path.display());
    }
    let service = MarketDataService::new(config.market_data.clone());
    service.start();
    Ok(AppState::new(service))
}
