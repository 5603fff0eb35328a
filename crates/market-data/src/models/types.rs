use std::borrow::Cow;

/// Provider identifier - mostly static constants
pub type ProviderId = Cow<'static, str>;

/// Provider identifiers shipped with the crate.
pub const PROVIDER_FINNHUB: &str = "finnhub";
pub const PROVIDER_ALPHA_VANTAGE: &str = "alpha_vantage";
pub const PROVIDER_TWELVE_DATA: &str = "twelve_data";
pub const PROVIDER_FMP: &str = "fmp";
pub const PROVIDER_MOCK: &str = "mock";

/// Source tag carried by synthetic last-resort data.
pub const SOURCE_FALLBACK: &str = "fallback";
