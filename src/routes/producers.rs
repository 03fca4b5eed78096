//! Producer, parameter and metadata listings.

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::observations::parse_time;
use crate::common::AppState;
use crate::drivers::{FlashArea, FlashCounts, ProducerMetadata};
use crate::error::{ObsError, ObsResult};

#[derive(Debug, Serialize, ToSchema)]
pub struct ProducerRow {
    pub producer: String,
    pub producer_ids: Vec<i32>,
    pub station_groups: Vec<String>,
}

/// List known producers
#[utoipa::path(
    get,
    path = "/api/producers",
    responses((status = 200, description = "Producers listed", body = Vec<ProducerRow>)),
    tag = "metadata"
)]
pub async fn list_producers(State(state): State<AppState>) -> Json<Vec<ProducerRow>> {
    let rows = state
        .engine
        .producers()
        .into_iter()
        .map(|(producer, producer_ids, station_groups)| ProducerRow {
            producer,
            producer_ids,
            station_groups,
        })
        .collect();
    Json(rows)
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ParametersQuery {
    pub producer: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ParameterRow {
    pub parameter: String,
    pub producer: String,
    pub parameter_id: String,
}

/// List parameters answerable for a producer
#[utoipa::path(
    get,
    path = "/api/parameters",
    params(ParametersQuery),
    responses(
        (status = 200, description = "Parameters listed", body = Vec<ParameterRow>),
        (status = 500, description = "Unknown producer"),
    ),
    tag = "metadata"
)]
pub async fn list_parameters(
    State(state): State<AppState>,
    Query(query): Query<ParametersQuery>,
) -> ObsResult<Json<Vec<ParameterRow>>> {
    let rows = state
        .engine
        .parameters_for(&query.producer)?
        .into_iter()
        .map(|(parameter, parameter_id)| ParameterRow {
            parameter,
            producer: query.producer.clone(),
            parameter_id,
        })
        .collect();
    Ok(Json(rows))
}

/// Coverage metadata for a producer
#[utoipa::path(
    get,
    path = "/api/metadata/{producer}",
    params(("producer" = String, Path, description = "Producer name")),
    responses((status = 200, description = "Metadata retrieved")),
    tag = "metadata"
)]
pub async fn get_metadata(
    State(state): State<AppState>,
    Path(producer): Path<String>,
) -> ObsResult<Json<ProducerMetadata>> {
    Ok(Json(state.engine.metadata_for(&producer).await?))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MeasurandRow {
    pub parameter: String,
    pub measurand_id: String,
}

/// Measurand ids for a producer
#[utoipa::path(
    get,
    path = "/api/measurands/{producer}",
    params(("producer" = String, Path, description = "Producer name")),
    responses((status = 200, description = "Measurands listed", body = Vec<MeasurandRow>)),
    tag = "metadata"
)]
pub async fn list_measurands(
    State(state): State<AppState>,
    Path(producer): Path<String>,
) -> ObsResult<Json<Vec<MeasurandRow>>> {
    let rows = state
        .engine
        .parameters_for(&producer)?
        .into_iter()
        .map(|(parameter, measurand_id)| MeasurandRow {
            parameter,
            measurand_id,
        })
        .collect();
    Ok(Json(rows))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LatestUpdateResponse {
    pub producer: String,
    pub latest_data_time: Option<String>,
}

/// Latest observation time a producer has data for
#[utoipa::path(
    get,
    path = "/api/latest-update/{producer}",
    params(("producer" = String, Path, description = "Producer name")),
    responses((status = 200, description = "Latest update retrieved", body = LatestUpdateResponse)),
    tag = "metadata"
)]
pub async fn get_latest_update(
    State(state): State<AppState>,
    Path(producer): Path<String>,
) -> ObsResult<Json<LatestUpdateResponse>> {
    let latest = state.engine.latest_update_for(&producer).await?;
    Ok(Json(LatestUpdateResponse {
        producer,
        latest_data_time: latest.map(|t| t.to_rfc3339()),
    }))
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct FlashCountQuery {
    /// Interval start
    pub starttime: String,
    /// Interval end
    pub endtime: String,
    /// Semicolon-separated circles "lon,lat,radius_km"
    pub locations: Option<String>,
}

/// Lightning statistics for an interval and area
#[utoipa::path(
    get,
    path = "/api/flashcount",
    params(FlashCountQuery),
    responses((status = 200, description = "Counts computed")),
    tag = "observations"
)]
pub async fn get_flash_count(
    State(state): State<AppState>,
    Query(query): Query<FlashCountQuery>,
) -> ObsResult<Json<FlashCounts>> {
    let starttime = parse_time(&query.starttime)?;
    let endtime = parse_time(&query.endtime)?;

    let mut areas = Vec::new();
    if let Some(locations) = &query.locations {
        for circle in locations.split(';').filter(|s| !s.trim().is_empty()) {
            let parts: Vec<f64> = circle
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if parts.len() != 3 {
                return Err(ObsError::BadRequest(
                    "locations must be lon,lat,radius_km;...".to_string(),
                ));
            }
            areas.push(FlashArea {
                longitude: parts[0],
                latitude: parts[1],
                radius: parts[2],
            });
        }
    }

    Ok(Json(state.engine.flash_count(starttime, endtime, &areas).await?))
}
