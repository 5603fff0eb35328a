use alfalyzer_market_data::MarketDataError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    MarketData(#[from] MarketDataError),
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    Anyhow(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    code: u16,
    message: String,
    /// Quota kind behind an exhausted walk, for UI messaging.
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
}

fn market_data_status(error: &MarketDataError) -> StatusCode {
    match error {
        MarketDataError::SymbolNotFound(_) | MarketDataError::NoCachedData { .. } => {
            StatusCode::NOT_FOUND
        }
        MarketDataError::RateLimited { .. }
        | MarketDataError::DailyLimit { .. }
        | MarketDataError::MonthlyLimit { .. } => StatusCode::TOO_MANY_REQUESTS,
        MarketDataError::AllProvidersExhausted { .. }
        | MarketDataError::CircuitOpen { .. }
        | MarketDataError::QueueRejected { .. } => StatusCode::SERVICE_UNAVAILABLE,
        MarketDataError::Timeout { .. } | MarketDataError::RequestTimeout { .. } => {
            StatusCode::GATEWAY_TIMEOUT
        }
        MarketDataError::NotSupported { .. } => StatusCode::NOT_IMPLEMENTED,
        MarketDataError::AccountSuspended { .. }
        | MarketDataError::MissingCredential { .. }
        | MarketDataError::ProviderError { .. }
        | MarketDataError::BatchFailed { .. }
        | MarketDataError::Network(_) => StatusCode::BAD_GATEWAY,
        MarketDataError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = match &self {
            ApiError::MarketData(e) => {
                let kind = match e {
                    MarketDataError::AllProvidersExhausted { kind, .. } => {
                        kind.map(|k| k.to_string())
                    }
                    _ => None,
                };
                (market_data_status(e), kind)
            }
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, None),
            ApiError::Anyhow(_) => (StatusCode::INTERNAL_SERVER_ERROR, None),
        };
        if status.is_server_error() {
            tracing::warn!("Request failed with {}: {}", status, self);
        }
        let body = Json(ErrorBody {
            code: status.as_u16(),
            message: self.to_string(),
            kind,
        });
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use alfalyzer_market_data::{DataType, QuotaErrorKind};

    #[test]
    fn test_exhausted_maps_to_service_unavailable() {
        let error = ApiError::from(MarketDataError::AllProvidersExhausted {
            data_type: DataType::Quote,
            symbol: "AAPL".to_string(),
            provider: Some("fmp".to_string()),
            kind: Some(QuotaErrorKind::DailyLimit),
        });
        assert_eq!(
            error.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[test]
    fn test_quota_and_lookup_statuses() {
        let limited = MarketDataError::RateLimited {
            provider: "finnhub".to_string(),
            retry_after: None,
        };
        assert_eq!(market_data_status(&limited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            market_data_status(&MarketDataError::SymbolNotFound("ZZZZ".to_string())),
            StatusCode::NOT_FOUND
        );
    }
}
