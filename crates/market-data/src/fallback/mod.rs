//! Invisible fallback: plausible synthetic data as the last resort.
//!
//! Each symbol keeps a walked price that starts at a random point within
//! `max_drift` of its anchor and moves by a small bounded step on every
//! [`InvisibleFallback::tick`]. Reads add a tiny jitter on top. Both stay within `max_drift` of the anchor, so repeated
//! reads look live without diverging from reality.

mod registry;

pub use registry::{known_symbols, lookup, FallbackStock};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{Datelike, TimeDelta};
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::clock::{SharedClock, SystemClock};
use crate::models::{
    BatchQuotes, CompanyProfile, DataType, FinancialStatement, Financials, HistoricalBar,
    MarketData, Payload, Quote, StatementPeriod, SOURCE_FALLBACK,
};
use crate::provider::DEFAULT_HISTORY_DAYS;

/// Generator settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FallbackConfig {
    /// How often the background walk advances.
    pub tick_interval: Duration,
    /// Maximum relative distance from the anchor price.
    pub max_drift: f64,
    /// Maximum relative move per tick.
    pub walk_step: f64,
    /// Maximum relative jitter added to a single read.
    pub read_jitter: f64,
    /// Fixed RNG seed, for reproducible output.
    pub seed: Option<u64>,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(30),
            max_drift: 0.05,
            walk_step: 0.005,
            read_jitter: 0.001,
            seed: None,
        }
    }
}

struct WalkState {
    stock: FallbackStock,
    price: Decimal,
}

/// Synthetic data generator.
pub struct InvisibleFallback {
    config: FallbackConfig,
    walks: Mutex<HashMap<String, WalkState>>,
    rng: Mutex<StdRng>,
    clock: SharedClock,
}

impl InvisibleFallback {
    pub fn new(config: FallbackConfig, clock: SharedClock) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            walks: Mutex::new(HashMap::new()),
            rng: Mutex::new(rng),
            clock,
        }
    }

    fn lock_walks(&self) -> MutexGuard<'_, HashMap<String, WalkState>> {
        self.walks.lock().unwrap_or_else(|poisoned| {
            warn!("Fallback walk mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn lock_rng(&self) -> MutexGuard<'_, StdRng> {
        self.rng.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Uniform value in `[-bound, bound]`.
    fn noise(&self, bound: f64) -> f64 {
        if bound <= 0.0 {
            return 0.0;
        }
        self.lock_rng().gen_range(-bound..=bound)
    }

    fn clamp(&self, price: Decimal, anchor: Decimal) -> Decimal {
        let drift = Decimal::try_from(self.config.max_drift).unwrap_or(Decimal::ZERO);
        let low = anchor * (Decimal::ONE - drift);
        let high = anchor * (Decimal::ONE + drift);
        price.clamp(low, high)
    }

    fn scale(&self, price: Decimal, factor: f64) -> Decimal {
        price * Decimal::try_from(1.0 + factor).unwrap_or(Decimal::ONE)
    }

    /// Current walked price and record for `symbol`, registering it on first use.
    fn current(&self, symbol: &str) -> (FallbackStock, Decimal) {
        let key = symbol.trim().to_uppercase();
        let mut walks = self.lock_walks();
        let state = walks.entry(key).or_insert_with_key(|key| {
            let stock = lookup(key);
            let offset = self.noise(self.config.max_drift);
            let price = self
                .clamp(self.scale(stock.base_price, offset), stock.base_price)
                .round_dp(2);
            WalkState { stock, price }
        });
        (state.stock.clone(), state.price)
    }

    /// Advance every tracked price by one bounded random step.
    pub fn tick(&self) {
        let mut walks = self.lock_walks();
        for state in walks.values_mut() {
            let step = self.noise(self.config.walk_step);
            let moved = self.scale(state.price, step);
            state.price = self.clamp(moved, state.stock.base_price).round_dp(2);
        }
        debug!("Fallback: walked {} symbols", walks.len());
    }

    /// A live-looking quote. Change is measured against the anchor as the
    /// simulated previous close.
    pub fn quote(&self, symbol: &str) -> Quote {
        let (stock, walked) = self.current(symbol);
        let jitter = self.noise(self.config.read_jitter);
        let price = self
            .clamp(self.scale(walked, jitter), stock.base_price)
            .round_dp(2);

        let volume_factor = 0.7 + (self.noise(0.3) + 0.3);
        let volume = Decimal::from(stock.base_volume)
            * Decimal::try_from(volume_factor).unwrap_or(Decimal::ONE);

        let mut quote = Quote::new(stock.symbol.clone(), price, SOURCE_FALLBACK)
            .with_previous_close(stock.base_price);
        quote.open = Some(stock.base_price);
        quote.high = Some(price.max(stock.base_price));
        quote.low = Some(price.min(stock.base_price));
        quote.volume = Some(volume.round());
        quote.market_cap = Some((price * Decimal::from(stock.shares_outstanding)).round());
        quote.eps = Some(stock.eps);
        quote.pe_ratio = price
            .to_f64()
            .filter(|_| stock.eps > 0.0)
            .map(|p| (p / stock.eps * 100.0).round() / 100.0);
        quote.timestamp = self.clock.now();
        quote
    }

    pub fn quotes(&self, symbols: &[String]) -> BatchQuotes {
        let quotes = symbols
            .iter()
            .map(|s| {
                let quote = self.quote(s);
                (quote.symbol.clone(), quote)
            })
            .collect();
        BatchQuotes {
            quotes,
            failed: Vec::new(),
            timestamp: self.clock.now(),
        }
    }

    pub fn profile(&self, symbol: &str) -> CompanyProfile {
        let (stock, walked) = self.current(symbol);
        let shares = stock.shares_outstanding as f64;
        CompanyProfile {
            symbol: stock.symbol.clone(),
            source: Some(SOURCE_FALLBACK.to_string()),
            name: Some(stock.name),
            sector: Some(stock.sector),
            industry: Some(stock.industry),
            exchange: Some(stock.exchange),
            country: Some("US".to_string()),
            market_cap: walked.to_f64().map(|p| (p * shares).round()),
            shares_outstanding: Some(shares),
            pe_ratio: Some(stock.pe_ratio),
            eps: Some(stock.eps),
            ..Default::default()
        }
    }

    /// Three annual statements consistent with the record's EPS and share count.
    pub fn financials(&self, symbol: &str) -> Financials {
        let (stock, _) = self.current(symbol);
        let shares = stock.shares_outstanding as f64;
        let last_year = self.clock.now().year() - 1;

        let statements = (0..3)
            .map(|years_back| {
                // Roughly 8% growth per year going forward
                let factor = 1.08f64.powi(-years_back);
                let eps = (stock.eps * factor * 100.0).round() / 100.0;
                let net_income = (eps * shares).round();
                let revenue = (net_income / 0.2).round();
                FinancialStatement {
                    fiscal_date: format!("{}-12-31", last_year - years_back),
                    period: StatementPeriod::Annual,
                    revenue: Some(revenue),
                    gross_profit: Some((revenue * 0.45).round()),
                    operating_income: Some((revenue * 0.27).round()),
                    net_income: Some(net_income),
                    eps: Some(eps),
                    total_assets: Some((revenue * 1.3).round()),
                    total_liabilities: Some((revenue * 0.8).round()),
                    free_cash_flow: Some((net_income * 1.05).round()),
                }
            })
            .collect();

        Financials {
            symbol: stock.symbol,
            currency: "USD".to_string(),
            statements,
        }
    }

    /// Daily bars ending today, walked from the anchor with a generator
    /// seeded by the symbol so the same history is produced on each read.
    pub fn historical(&self, symbol: &str) -> Vec<HistoricalBar> {
        let (stock, _) = self.current(symbol);
        let digest = md5::compute(stock.symbol.as_bytes());
        let mut seed = [0u8; 32];
        seed[..16].copy_from_slice(&digest.0);
        let mut rng = StdRng::from_seed(seed);

        let today = self
            .clock
            .now()
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc())
            .unwrap_or_else(|| self.clock.now());

        let mut close = stock.base_price;
        let mut bars = Vec::with_capacity(DEFAULT_HISTORY_DAYS as usize);
        for days_back in (0..DEFAULT_HISTORY_DAYS).rev() {
            let open = close;
            let step: f64 = rng.gen_range(-self.config.walk_step..=self.config.walk_step);
            close = self.clamp(self.scale(open, step), stock.base_price).round_dp(2);
            let spread: f64 = rng.gen_range(0.0..=self.config.walk_step);
            let volume: f64 = rng.gen_range(0.7..=1.3);
            bars.push(HistoricalBar {
                timestamp: today - TimeDelta::days(days_back),
                open,
                high: self.scale(open.max(close), spread).round_dp(2),
                low: self.scale(open.min(close), -spread).round_dp(2),
                close,
                volume: Decimal::try_from(stock.base_volume as f64 * volume)
                    .ok()
                    .map(|v| v.round()),
            });
        }
        bars
    }

    /// Synthetic payload of `data_type`, wrapped and tagged `fallback`.
    pub fn generate(&self, data_type: DataType, symbol: &str) -> MarketData {
        let payload = self.payload(data_type, symbol);
        MarketData::new(
            symbol.trim().to_uppercase(),
            data_type,
            SOURCE_FALLBACK,
            self.clock.now(),
            payload,
        )
    }

    pub fn payload(&self, data_type: DataType, symbol: &str) -> Payload {
        match data_type {
            DataType::Quote | DataType::Realtime => Payload::Quote(self.quote(symbol)),
            DataType::Profile => Payload::Profile(self.profile(symbol)),
            DataType::Financials => Payload::Financials(self.financials(symbol)),
            DataType::Historical => Payload::Historical(self.historical(symbol)),
        }
    }

    /// Quotes for every curated symbol.
    pub fn snapshot(&self) -> Vec<Quote> {
        known_symbols().map(|s| self.quote(s)).collect()
    }

    pub fn tick_interval(&self) -> Duration {
        self.config.tick_interval
    }
}

impl Default for InvisibleFallback {
    fn default() -> Self {
        Self::new(FallbackConfig::default(), Arc::new(SystemClock))
    }
}
