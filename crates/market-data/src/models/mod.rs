//! Market data models
//!
//! This module contains the core data types for fetch operations:
//! - `types` - Provider identifiers and source tags
//! - `data_type` - The data categories a strategy is keyed by (DataType)
//! - `request` - Caller-facing request shape (FetchRequest, Priority)
//! - `quote` - Quote snapshot (Quote)
//! - `profile` - Company profile data (CompanyProfile)
//! - `financials` - Financial statements (Financials, FinancialStatement)
//! - `market_data` - The envelope every fetch returns (MarketData, Payload)

mod data_type;
mod financials;
mod market_data;
mod profile;
mod quote;
mod request;
mod types;

pub use data_type::DataType;
pub use financials::{FinancialStatement, Financials, StatementPeriod};
pub use market_data::{BatchQuotes, HistoricalBar, MarketData, Payload};
pub use profile::CompanyProfile;
pub use quote::Quote;
pub use request::{FetchRequest, Priority};
pub use types::{
    ProviderId, PROVIDER_ALPHA_VANTAGE, PROVIDER_FINNHUB, PROVIDER_FMP, PROVIDER_MOCK,
    PROVIDER_TWELVE_DATA, SOURCE_FALLBACK,
};
