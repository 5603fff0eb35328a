//! Market data provider abstractions and implementations.
//!
//! This module contains:
//! - The `MarketDataProvider` trait that all providers implement
//! - Provider capabilities and advertised quota
//! - Concrete adapters (Finnhub, Alpha Vantage, Twelve Data, FMP) and the
//!   keyless `mock` provider
//!
//! # Architecture
//!
//! The provider system is designed to be:
//! - **Provider-agnostic**: the router only sees the trait and a descriptor
//! - **Extensible**: new providers are added by implementing `MarketDataProvider`
//!   and listing their id in a strategy
//!
//! Adapters own their HTTP details (endpoints, auth parameters, response
//! shapes). Quota, circuit breaking and fallback live outside them.

mod capabilities;
pub(crate) mod http;
mod traits;

pub mod alpha_vantage;
pub mod finnhub;
pub mod fmp;
pub mod mock;
pub mod twelve_data;

// Re-exports
pub use alpha_vantage::AlphaVantageProvider;
pub use capabilities::{ProviderCapabilities, RateLimit};
pub use finnhub::FinnhubProvider;
pub use fmp::FmpProvider;
pub use mock::MockProvider;
pub use traits::{MarketDataProvider, DEFAULT_HISTORY_DAYS};
pub use twelve_data::TwelveDataProvider;
