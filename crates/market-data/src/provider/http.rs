//! HTTP plumbing shared by the REST adapters.

use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Client, RequestBuilder, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::errors::MarketDataError;

/// Per-request timeout for upstream calls.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) fn build_client() -> Client {
    Client::builder()
        .timeout(REQUEST_TIMEOUT)
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Send `request` and return the body of a successful response.
///
/// 429 becomes `RateLimited` carrying any `Retry-After` hint. Other
/// non-success statuses become `ProviderError` with the body text so the
/// quota classifier can inspect the provider's message.
pub(crate) async fn send(request: RequestBuilder, provider: &str) -> Result<String, MarketDataError> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            MarketDataError::Timeout {
                provider: provider.to_string(),
            }
        } else {
            MarketDataError::ProviderError {
                provider: provider.to_string(),
                message: format!("Request failed: {}", e),
            }
        }
    })?;

    let status = response.status();
    debug!("{} responded {}", provider, status);

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response.text().await.unwrap_or_default();
        return Err(throttled(provider, retry_after, body.trim()));
    }

    if status == StatusCode::UNAUTHORIZED {
        return Err(MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: "Invalid or missing API key".to_string(),
        });
    }

    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: format!("HTTP {} - {}", status, body),
        });
    }

    response
        .text()
        .await
        .map_err(|e| MarketDataError::ProviderError {
            provider: provider.to_string(),
            message: format!("Failed to read response: {}", e),
        })
}

/// Parse a response body, mapping failures to `ProviderError`.
pub(crate) fn parse_json<T: DeserializeOwned>(
    text: &str,
    provider: &str,
    what: &str,
) -> Result<T, MarketDataError> {
    serde_json::from_str(text).map_err(|e| MarketDataError::ProviderError {
        provider: provider.to_string(),
        message: format!("Failed to parse {} response: {}", what, e),
    })
}

/// A 429 without a body is a plain rate limit. With a body the provider's
/// text is kept, since some providers answer 429 for daily exhaustion too.
fn throttled(provider: &str, retry_after: Option<Duration>, body: &str) -> MarketDataError {
    if body.is_empty() {
        return MarketDataError::RateLimited {
            provider: provider.to_string(),
            retry_after,
        };
    }
    let hint = retry_after
        .map(|d| format!(" (retry after {} seconds)", d.as_secs()))
        .unwrap_or_default();
    MarketDataError::ProviderError {
        provider: provider.to_string(),
        message: format!("HTTP 429 - {}{}", body, hint),
    }
}

/// `Retry-After` in delta-seconds form. HTTP-date values are ignored.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

pub(crate) fn decimal(value: f64) -> Option<Decimal> {
    if value.is_finite() {
        Decimal::try_from(value).ok()
    } else {
        None
    }
}

/// Parse a numeric string as the string-typed APIs return them.
/// "None", "-" and empty strings yield `None`.
pub(crate) fn parse_decimal(value: &str) -> Option<Decimal> {
    let trimmed = value.trim().trim_end_matches('%');
    if trimmed.is_empty() || trimmed == "None" || trimmed == "-" {
        return None;
    }
    trimmed.parse::<Decimal>().ok()
}

pub(crate) fn parse_f64(value: &Option<String>) -> Option<f64> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty() && *s != "None" && *s != "-")
        .and_then(|s| s.parse::<f64>().ok())
}
