use std::sync::Arc;

use alfalyzer_market_data::Quote;
use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::main_lib::AppState;

#[derive(Serialize)]
struct StocksResponse {
    data: Vec<Quote>,
    timestamp: DateTime<Utc>,
    source: &'static str,
}

async fn get_stocks(State(state): State<Arc<AppState>>) -> Json<StocksResponse> {
    Json(StocksResponse {
        data: state.service.fallback_snapshot(),
        timestamp: Utc::now(),
        source: "fallback",
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/stocks", get(get_stocks))
}
