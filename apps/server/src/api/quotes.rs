use std::sync::Arc;

use alfalyzer_market_data::BatchQuotes;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

const MAX_SYMBOLS: usize = 200;

#[derive(Deserialize)]
struct QuotesQuery {
    /// Comma separated tickers.
    #[serde(default)]
    symbols: String,
}

fn parse_symbols(raw: &str) -> ApiResult<Vec<String>> {
    let symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return Err(ApiError::BadRequest(
            "Query parameter 'symbols' is required".to_string(),
        ));
    }
    if symbols.len() > MAX_SYMBOLS {
        return Err(ApiError::BadRequest(format!(
            "At most {} symbols per request, got {}",
            MAX_SYMBOLS,
            symbols.len()
        )));
    }
    Ok(symbols)
}

async fn get_quotes(
    State(state): State<Arc<AppState>>,
    Query(q): Query<QuotesQuery>,
) -> ApiResult<Json<BatchQuotes>> {
    let symbols = parse_symbols(&q.symbols)?;
    Ok(Json(state.service.get_batch_quotes(&symbols).await))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/quotes", get(get_quotes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_symbols_skips_blanks() {
        let symbols = parse_symbols(" aapl, ,MSFT,").unwrap();
        assert_eq!(symbols, vec!["aapl".to_string(), "MSFT".to_string()]);
    }

    #[test]
    fn test_parse_symbols_rejects_empty_and_oversized() {
        assert!(parse_symbols(" , ").is_err());
        let many = vec!["A"; MAX_SYMBOLS + 1].join(",");
        assert!(parse_symbols(&many).is_err());
    }
}
