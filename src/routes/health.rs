use axum::{Json, extract::State};
use serde::Serialize;
use utoipa::ToSchema;

use crate::cache::Counters;
use crate::common::AppState;

#[derive(Debug, Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
    /// Stations in the live registry snapshot
    pub stations: usize,
    #[schema(value_type = Object)]
    pub cache: Counters,
}

/// Liveness and cache counters
#[utoipa::path(
    get,
    path = "/healthz",
    responses((status = 200, description = "Service is up", body = HealthResponse)),
    tag = "health"
)]
pub async fn healthz(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        stations: state.engine.station_info().len(),
        cache: state.engine.cache_counters(),
    })
}
