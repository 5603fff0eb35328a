use std::{net::SocketAddr, time::Duration};

use alfalyzer_market_data::MarketDataConfig;
use anyhow::Context;

pub const ENV_LISTEN_ADDR: &str = "ALFALYZER_LISTEN_ADDR";
pub const ENV_CORS_ALLOW_ORIGINS: &str = "ALFALYZER_CORS_ALLOW_ORIGINS";
pub const ENV_REQUEST_TIMEOUT_MS: &str = "ALFALYZER_REQUEST_TIMEOUT_MS";

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3001";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub cors_allow: Vec<String>,
    pub request_timeout: Duration,
    pub market_data: MarketDataConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            cors_allow: vec!["*".to_string()],
            request_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            market_data: MarketDataConfig::default(),
        }
    }
}

impl Config {
    /// Reads the process environment. Call `dotenvy::dotenv()` first to pick
    /// up a `.env` file.
    pub fn from_env() -> anyhow::Result<Self> {
        let raw_addr =
            std::env::var(ENV_LISTEN_ADDR).unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .with_context(|| format!("Invalid {}: {}", ENV_LISTEN_ADDR, raw_addr))?;
        let cors_allow = std::env::var(ENV_CORS_ALLOW_ORIGINS)
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let timeout_ms: u64 = std::env::var(ENV_REQUEST_TIMEOUT_MS)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_MS);

        let mut market_data = MarketDataConfig::from_env();
        market_data.request_timeout = Duration::from_millis(timeout_ms);

        Ok(Self {
            listen_addr,
            cors_allow,
            request_timeout: Duration::from_millis(timeout_ms),
            market_data,
        })
    }
}
