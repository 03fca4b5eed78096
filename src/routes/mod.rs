pub mod health;
pub mod observations;
pub mod producers;
mod rate_limit;
pub mod stations;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use tower_governor::{GovernorLayer, governor::GovernorConfigBuilder};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    limit::RequestBodyLimitLayer,
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::common::AppState;
use rate_limit::ClientIpKeyExtractor;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        observations::get_observations,
        producers::get_flash_count,
        producers::list_producers,
        producers::list_parameters,
        producers::get_metadata,
        producers::list_measurands,
        producers::get_latest_update,
        stations::list_stations,
        stations::reload_stations,
    ),
    components(
        schemas(
            health::HealthResponse,
            observations::ObservationsResponse,
            observations::ObservationPoint,
            producers::ProducerRow,
            producers::ParameterRow,
            producers::MeasurandRow,
            producers::LatestUpdateResponse,
            stations::StationListRow,
            stations::ReloadResponse,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "observations", description = "Observation time series"),
        (name = "metadata", description = "Producers, parameters and coverage"),
        (name = "stations", description = "Station registry"),
        (name = "admin", description = "Administrative operations"),
    ),
    info(
        title = "MetObs DB API",
        description = "Tiered observation read API for meteorological station networks",
        version = "0.1.0"
    )
)]
struct ApiDoc;

pub fn build_router(state: AppState) -> Router {
    let config = &state.config.api;

    // Metadata listings are cheap, data reads are not; they get
    // separate limiters.
    let metadata_routes_base = Router::new()
        .route("/producers", get(producers::list_producers))
        .route("/parameters", get(producers::list_parameters))
        .route("/metadata/{producer}", get(producers::get_metadata))
        .route("/measurands/{producer}", get(producers::list_measurands))
        .route("/latest-update/{producer}", get(producers::get_latest_update))
        .route("/stations", get(stations::list_stations));

    let data_routes_base = Router::new()
        .route("/observations", get(observations::get_observations))
        .route("/flashcount", get(producers::get_flash_count));

    let api_routes = if config.disable_rate_limiting {
        tracing::warn!("Rate limiting DISABLED");
        Router::new()
            .merge(metadata_routes_base)
            .merge(data_routes_base)
    } else {
        let metadata_limiter = GovernorConfigBuilder::default()
            .key_extractor(ClientIpKeyExtractor)
            .per_second(config.rate_limit_metadata_per_second)
            .burst_size(config.rate_limit_metadata_burst)
            .finish()
            .expect("Failed to create metadata rate limiter");

        let data_limiter = GovernorConfigBuilder::default()
            .key_extractor(ClientIpKeyExtractor)
            .per_second(config.rate_limit_data_per_second)
            .burst_size(config.rate_limit_data_burst)
            .finish()
            .expect("Failed to create data rate limiter");

        Router::new()
            .merge(metadata_routes_base.layer(GovernorLayer {
                config: Arc::new(metadata_limiter),
            }))
            .merge(data_routes_base.layer(GovernorLayer {
                config: Arc::new(data_limiter),
            }))
    }
    .layer(RequestBodyLimitLayer::new(1024 * 1024));

    let admin_routes = Router::new().route("/reloadstations", post(stations::reload_stations));

    let health_routes = Router::new().route("/healthz", get(health::healthz));

    let docs_routes = Router::new().merge(Scalar::with_url("/docs", ApiDoc::openapi()));

    Router::new()
        .nest("/api", api_routes)
        .nest("/admin", admin_routes)
        .merge(health_routes)
        .merge(docs_routes)
        .layer(CompressionLayer::new())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
