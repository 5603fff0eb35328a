//! Error types and retry classification for the market data crate.
//!
//! This module provides:
//! - [`MarketDataError`]: The main error enum for all fetch-layer operations
//! - [`QuotaErrorKind`]: The quota failure taxonomy produced by the classifier
//! - [`RetryClass`]: Classification for determining router behavior

mod retry;

pub use retry::RetryClass;

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::DataType;

/// Quota failure categories a provider error can be classified into.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuotaErrorKind {
    RateLimit,
    DailyLimit,
    MonthlyLimit,
    AccountSuspended,
}

impl QuotaErrorKind {
    /// Cool-down applied when the provider did not say how long to wait.
    pub fn default_retry_after(&self) -> Duration {
        match self {
            Self::RateLimit => Duration::from_secs(60),
            Self::DailyLimit => Duration::from_secs(24 * 60 * 60),
            Self::MonthlyLimit => Duration::from_secs(30 * 24 * 60 * 60),
            Self::AccountSuspended => Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Whether the provider's remaining quota for the window is gone.
    pub fn exhausts_quota(&self) -> bool {
        !matches!(self, Self::RateLimit)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RateLimit => "rate_limit",
            Self::DailyLimit => "daily_limit",
            Self::MonthlyLimit => "monthly_limit",
            Self::AccountSuspended => "account_suspended",
        }
    }
}

impl fmt::Display for QuotaErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors that can occur while fetching market data.
///
/// Each variant is classified into a [`RetryClass`] via the
/// [`retry_class`](Self::retry_class) method, which determines how the
/// fallback router treats the failure.
#[derive(Error, Debug)]
pub enum MarketDataError {
    /// Short cool-down throttling (HTTP 429, per-minute caps).
    #[error("Rate limited: {provider}")]
    RateLimited {
        provider: String,
        /// Wait hint supplied by the provider, if any.
        retry_after: Option<Duration>,
    },

    /// Daily call allowance used up. Cool-down is a full day.
    #[error("Daily limit reached: {provider}")]
    DailyLimit {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Monthly limit reached: {provider}")]
    MonthlyLimit { provider: String },

    #[error("Account suspended: {provider}")]
    AccountSuspended { provider: String },

    /// The provider was skipped because its breaker is open.
    /// Not a failure of the request itself.
    #[error("Circuit open: {provider}")]
    CircuitOpen { provider: String },

    /// Every provider in the strategy failed or was skipped, and the caller
    /// did not accept synthetic data.
    #[error("All providers exhausted for {data_type} {symbol}")]
    AllProvidersExhausted {
        data_type: DataType,
        symbol: String,
        /// Provider whose failure ended the walk.
        provider: Option<String>,
        /// Classified quota kind of that failure, when it was quota related.
        kind: Option<QuotaErrorKind>,
    },

    /// The cache-only recovery strategy found nothing to serve.
    #[error("No cached data for {key}")]
    NoCachedData { key: String },

    #[error("Timeout: {provider}")]
    Timeout { provider: String },

    #[error("Provider error: {provider} - {message}")]
    ProviderError { provider: String, message: String },

    /// The requested symbol was not found by the provider.
    #[error("Symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("Operation '{operation}' not supported by {provider}")]
    NotSupported { operation: String, provider: String },

    #[error("Missing credential for provider: {provider}")]
    MissingCredential { provider: String },

    /// A deferred request exhausted its retry attempts.
    #[error("Queued request for {symbol} rejected after {attempts} attempts: {reason}")]
    QueueRejected {
        symbol: String,
        attempts: u32,
        reason: String,
    },

    /// A caller waited longer than the per-request deadline.
    #[error("Request timed out after {waited:?}")]
    RequestTimeout { waited: Duration },

    /// A batch the caller was waiting on failed.
    #[error("Batch failed: {message}")]
    BatchFailed { message: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),
}

impl MarketDataError {
    /// Returns the retry classification for this error.
    ///
    /// - [`RetryClass::Never`]: terminal, the request itself is invalid
    /// - [`RetryClass::FailoverWithPenalty`]: next provider, count a breaker failure
    /// - [`RetryClass::NextProvider`]: next provider, no breaker penalty
    /// - [`RetryClass::CircuitOpen`]: provider skipped by its breaker
    ///
    /// # Examples
    ///
    /// ```
    /// use alfalyzer_market_data::errors::{MarketDataError, RetryClass};
    ///
    /// let error = MarketDataError::RateLimited { provider: "finnhub".to_string(), retry_after: None };
    /// assert_eq!(error.retry_class(), RetryClass::FailoverWithPenalty);
    ///
    /// let error = MarketDataError::SymbolNotFound("INVALID".to_string());
    /// assert_eq!(error.retry_class(), RetryClass::Never);
    /// ```
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::SymbolNotFound(_) => RetryClass::Never,

            Self::RateLimited { .. }
            | Self::DailyLimit { .. }
            | Self::MonthlyLimit { .. }
            | Self::AccountSuspended { .. }
            | Self::Timeout { .. }
            | Self::ProviderError { .. }
            | Self::Network(_) => RetryClass::FailoverWithPenalty,

            Self::NotSupported { .. } | Self::MissingCredential { .. } => RetryClass::NextProvider,

            Self::CircuitOpen { .. } => RetryClass::CircuitOpen,

            Self::AllProvidersExhausted { .. }
            | Self::NoCachedData { .. }
            | Self::QueueRejected { .. }
            | Self::RequestTimeout { .. }
            | Self::BatchFailed { .. }
            | Self::Persistence(_) => RetryClass::Never,
        }
    }

    /// Provider the error originated from, when it names one.
    pub fn provider(&self) -> Option<&str> {
        match self {
            Self::RateLimited { provider, .. }
            | Self::DailyLimit { provider, .. }
            | Self::MonthlyLimit { provider }
            | Self::AccountSuspended { provider }
            | Self::CircuitOpen { provider }
            | Self::Timeout { provider }
            | Self::ProviderError { provider, .. }
            | Self::NotSupported { provider, .. }
            | Self::MissingCredential { provider } => Some(provider),
            Self::AllProvidersExhausted { provider, .. } => provider.as_deref(),
            _ => None,
        }
    }
}
