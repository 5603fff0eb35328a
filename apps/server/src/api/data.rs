use std::sync::Arc;

use alfalyzer_market_data::{DataType, FetchRequest, MarketData, Priority};
use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use crate::{
    error::{ApiError, ApiResult},
    main_lib::AppState,
};

#[derive(Deserialize)]
struct DataQuery {
    /// Accept stale or synthetic data when every provider fails.
    #[serde(default)]
    fallback: bool,
    #[serde(default)]
    priority: Priority,
}

async fn get_data(
    State(state): State<Arc<AppState>>,
    Path((data_type, symbol)): Path<(String, String)>,
    Query(q): Query<DataQuery>,
) -> ApiResult<Json<MarketData>> {
    let data_type: DataType = data_type.parse().map_err(ApiError::BadRequest)?;
    if symbol.trim().is_empty() {
        return Err(ApiError::BadRequest("Symbol is required".to_string()));
    }
    let request = FetchRequest::new(symbol, data_type)
        .priority(q.priority)
        .fallback_acceptable(q.fallback);
    let data = state.service.fetch_data(request).await?;
    Ok(Json(data))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/data/{data_type}/{symbol}", get(get_data))
}
