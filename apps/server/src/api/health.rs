use std::sync::Arc;

use alfalyzer_market_data::HealthReport;
use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::main_lib::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    server: &'static str,
    version: &'static str,
    #[serde(flatten)]
    report: HealthReport,
}

/// Provider health computed on demand. Degraded states still answer 200.
async fn get_health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        server: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        report: state.service.health(),
    })
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}
