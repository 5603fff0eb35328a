//! Quota error classification.
//!
//! A declarative table maps (provider, message pattern) to a
//! [`QuotaErrorKind`]. Provider-specific rules are tried before generic ones,
//! and adding a provider's wording is a new table row.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;

use crate::errors::{MarketDataError, QuotaErrorKind};
use crate::models::{PROVIDER_ALPHA_VANTAGE, PROVIDER_FINNHUB, PROVIDER_FMP, PROVIDER_TWELVE_DATA};

/// A provider failure recognised as quota related.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaError {
    pub provider: String,
    pub kind: QuotaErrorKind,
    /// Wait before the provider is worth calling again.
    pub retry_after: Duration,
    pub message: String,
}

/// Built-in rules: provider (`None` matches any), pattern, kind.
const RULES: &[(Option<&str>, &str, QuotaErrorKind)] = &[
    // Alpha Vantage answers 200 with a note; the minute wording also
    // mentions the daily allowance, so it comes first.
    (
        Some(PROVIDER_ALPHA_VANTAGE),
        r"(?i)api call frequency is \d+ calls per minute",
        QuotaErrorKind::RateLimit,
    ),
    (
        Some(PROVIDER_ALPHA_VANTAGE),
        r"(?i)(\d+ requests per day|premium plan|daily rate limits)",
        QuotaErrorKind::DailyLimit,
    ),
    (
        Some(PROVIDER_FMP),
        r"(?i)limit reach",
        QuotaErrorKind::DailyLimit,
    ),
    (
        Some(PROVIDER_TWELVE_DATA),
        r"(?i)api credits.*current minute",
        QuotaErrorKind::RateLimit,
    ),
    (
        Some(PROVIDER_TWELVE_DATA),
        r"(?i)api credits.*(for the day|daily)",
        QuotaErrorKind::DailyLimit,
    ),
    (
        Some(PROVIDER_FINNHUB),
        r"(?i)api limit reached",
        QuotaErrorKind::RateLimit,
    ),
    (
        None,
        r"(?i)(suspended|banned|account (is )?(disabled|blocked))",
        QuotaErrorKind::AccountSuspended,
    ),
    (
        None,
        r"(?i)(monthly|per month|this month)",
        QuotaErrorKind::MonthlyLimit,
    ),
    (
        None,
        r"(?i)(daily limit|per day|for today|24 hours)",
        QuotaErrorKind::DailyLimit,
    ),
    (
        None,
        r"(?i)(rate limit|too many requests|\b429\b|throttl|retry (in|after)|per minute)",
        QuotaErrorKind::RateLimit,
    ),
];

lazy_static! {
    /// "retry in 30 seconds", "try again after 2 minutes", "retry after 1 hour"
    static ref RETRY_AFTER_REGEX: Regex = Regex::new(
        r"(?i)(?:retry|try again)\s+(?:in|after)\s+(\d+)\s*(seconds?|secs?|s|minutes?|mins?|m|hours?|hrs?|h)\b"
    )
    .expect("Invalid regex pattern");

    static ref BUILTIN_RULES: Vec<Rule> = RULES
        .iter()
        .map(|(provider, pattern, kind)| Rule {
            provider: provider.map(str::to_string),
            pattern: Regex::new(pattern).expect("Invalid regex pattern"),
            kind: *kind,
        })
        .collect();
}

#[derive(Clone, Debug)]
struct Rule {
    provider: Option<String>,
    pattern: Regex,
    kind: QuotaErrorKind,
}

impl Rule {
    fn applies_to(&self, provider: &str) -> bool {
        self.provider.as_deref().map_or(true, |p| p == provider)
    }
}

/// Wait hint embedded in a provider message.
pub fn extract_retry_after(message: &str) -> Option<Duration> {
    let captures = RETRY_AFTER_REGEX.captures(message)?;
    let amount: u64 = captures.get(1)?.as_str().parse().ok()?;
    let unit = captures.get(2)?.as_str().to_ascii_lowercase();
    let seconds = if unit.starts_with('h') {
        amount * 3_600
    } else if unit.starts_with('m') {
        amount * 60
    } else {
        amount
    };
    Some(Duration::from_secs(seconds))
}

/// Turns raw provider failures into typed quota errors.
#[derive(Clone, Debug)]
pub struct QuotaErrorClassifier {
    rules: Vec<Rule>,
}

impl QuotaErrorClassifier {
    pub fn new() -> Self {
        Self {
            rules: BUILTIN_RULES.clone(),
        }
    }

    /// Add a rule ahead of the built-in ones.
    pub fn with_rule(
        mut self,
        provider: Option<&str>,
        pattern: &str,
        kind: QuotaErrorKind,
    ) -> Result<Self, regex::Error> {
        let rule = Rule {
            provider: provider.map(str::to_string),
            pattern: Regex::new(pattern)?,
            kind,
        };
        self.rules.insert(0, rule);
        Ok(self)
    }

    /// Classify a message from `provider`.
    pub fn classify_message(&self, provider: &str, message: &str) -> Option<QuotaError> {
        let rule = self
            .rules
            .iter()
            .filter(|rule| rule.applies_to(provider))
            .find(|rule| rule.pattern.is_match(message))?;
        let retry_after =
            extract_retry_after(message).unwrap_or_else(|| rule.kind.default_retry_after());
        Some(QuotaError {
            provider: provider.to_string(),
            kind: rule.kind,
            retry_after,
            message: message.to_string(),
        })
    }

    /// Classify an error. Typed quota variants map directly; provider
    /// errors go through the rule table. Anything else is not quota related.
    pub fn classify(&self, error: &MarketDataError) -> Option<QuotaError> {
        let typed = |provider: &str, kind: QuotaErrorKind, retry_after: Option<Duration>| QuotaError {
            provider: provider.to_string(),
            kind,
            retry_after: retry_after.unwrap_or_else(|| kind.default_retry_after()),
            message: error.to_string(),
        };
        match error {
            MarketDataError::RateLimited {
                provider,
                retry_after,
            } => Some(typed(provider, QuotaErrorKind::RateLimit, *retry_after)),
            MarketDataError::DailyLimit {
                provider,
                retry_after,
            } => Some(typed(provider, QuotaErrorKind::DailyLimit, *retry_after)),
            MarketDataError::MonthlyLimit { provider } => {
                Some(typed(provider, QuotaErrorKind::MonthlyLimit, None))
            }
            MarketDataError::AccountSuspended { provider } => {
                Some(typed(provider, QuotaErrorKind::AccountSuspended, None))
            }
            MarketDataError::ProviderError { provider, message } => {
                self.classify_message(provider, message)
            }
            _ => None,
        }
    }
}

impl Default for QuotaErrorClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_error(provider: &str, message: &str) -> MarketDataError {
        MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn test_retry_in_seconds_extracted() {
        let classifier = QuotaErrorClassifier::new();
        let error = classifier
            .classify(&provider_error("rotation", "Rate limit hit, retry in 30 seconds"))
            .unwrap();
        assert_eq!(error.kind, QuotaErrorKind::RateLimit);
        assert_eq!(error.retry_after, Duration::from_secs(30));
    }

    #[test]
    fn test_extract_retry_after_units() {
        assert_eq!(
            extract_retry_after("please try again after 2 minutes"),
            Some(Duration::from_secs(120))
        );
        assert_eq!(
            extract_retry_after("Retry after 1 hour"),
            Some(Duration::from_secs(3_600))
        );
        assert_eq!(extract_retry_after("no hint here"), None);
    }

    #[test]
    fn test_default_retry_after_per_kind() {
        let classifier = QuotaErrorClassifier::new();
        let rate = classifier
            .classify(&provider_error("finnhub", "API limit reached. Please try again later."))
            .unwrap();
        assert_eq!(rate.retry_after, Duration::from_secs(60));

        let daily = classifier
            .classify(&provider_error("fmp", "HTTP 429 - Limit Reach . Please upgrade your plan"))
            .unwrap();
        assert_eq!(daily.kind, QuotaErrorKind::DailyLimit);
        assert_eq!(daily.retry_after, Duration::from_secs(86_400));
    }

    #[test]
    fn test_alpha_vantage_minute_note_is_rate_limit() {
        let classifier = QuotaErrorClassifier::new();
        let note = "Thank you for using Alpha Vantage! Our standard API call frequency is 5 calls per minute and 500 calls per day.";
        let error = classifier
            .classify(&provider_error("alpha_vantage", note))
            .unwrap();
        assert_eq!(error.kind, QuotaErrorKind::RateLimit);
    }

    #[test]
    fn test_alpha_vantage_daily_note() {
        let classifier = QuotaErrorClassifier::new();
        let note = "We have detected your API key and our standard API rate limit is 25 requests per day.";
        let error = classifier
            .classify(&provider_error("alpha_vantage", note))
            .unwrap();
        assert_eq!(error.kind, QuotaErrorKind::DailyLimit);
    }

    #[test]
    fn test_provider_rule_does_not_leak() {
        let classifier = QuotaErrorClassifier::new();
        // "Limit Reach" is only an FMP daily signal
        assert!(classifier
            .classify(&provider_error("finnhub", "Limit Reach"))
            .is_none());
    }

    #[test]
    fn test_generic_suspended_and_monthly() {
        let classifier = QuotaErrorClassifier::new();
        assert_eq!(
            classifier
                .classify(&provider_error("x", "Your account has been suspended"))
                .map(|e| e.kind),
            Some(QuotaErrorKind::AccountSuspended)
        );
        assert_eq!(
            classifier
                .classify(&provider_error("x", "Monthly quota exceeded"))
                .map(|e| e.kind),
            Some(QuotaErrorKind::MonthlyLimit)
        );
    }

    #[test]
    fn test_typed_errors_map_directly() {
        let classifier = QuotaErrorClassifier::new();
        let error = classifier
            .classify(&MarketDataError::RateLimited {
                provider: "twelve_data".to_string(),
                retry_after: Some(Duration::from_secs(12)),
            })
            .unwrap();
        assert_eq!(error.kind, QuotaErrorKind::RateLimit);
        assert_eq!(error.retry_after, Duration::from_secs(12));
    }

    #[test]
    fn test_non_quota_errors_unclassified() {
        let classifier = QuotaErrorClassifier::new();
        assert!(classifier
            .classify(&provider_error("finnhub", "HTTP 500 - internal error"))
            .is_none());
        assert!(classifier
            .classify(&MarketDataError::SymbolNotFound("ZZZ".to_string()))
            .is_none());
    }

    #[test]
    fn test_custom_rule_takes_precedence() {
        let classifier = QuotaErrorClassifier::new()
            .with_rule(Some("rotation"), r"(?i)out of juice", QuotaErrorKind::DailyLimit)
            .unwrap();
        let error = classifier
            .classify(&provider_error("rotation", "out of juice"))
            .unwrap();
        assert_eq!(error.kind, QuotaErrorKind::DailyLimit);
    }
}
