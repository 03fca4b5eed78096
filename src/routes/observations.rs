//! The observation read endpoint.

use axum::{Json, extract::Query, extract::State};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde::Serialize;
use utoipa::{IntoParams, ToSchema};

use crate::common::AppState;
use crate::error::{ObsError, ObsResult};
use crate::obs::{GridMode, Settings, TaggedFmisid};
use crate::obs::settings::{BoundingBox, NearestSearch};
use crate::timeseries::TimeSeriesVector;

/// Accepts RFC 3339, `YYYY-MM-DDTHH:MM:SS` (UTC assumed) and epoch
/// seconds.
pub fn parse_time(text: &str) -> ObsResult<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(text) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Ok(naive.and_utc());
    }
    if let Ok(epoch) = text.parse::<i64>() {
        if let Some(t) = DateTime::<Utc>::from_timestamp(epoch, 0) {
            return Ok(t);
        }
    }
    Err(ObsError::BadRequest(format!("cannot parse time '{text}'")))
}

pub fn parse_int_list(text: &str) -> Vec<i32> {
    text.split(',')
        .filter_map(|s| s.trim().parse().ok())
        .collect()
}

#[derive(Debug, Deserialize, IntoParams)]
pub struct ObservationsQuery {
    /// Producer / station type (e.g. observations_fmi, road, flash)
    pub stationtype: Option<String>,
    /// Comma-separated parameter names, in output order
    pub parameters: String,
    /// Comma-separated fmisid list
    pub fmisid: Option<String>,
    /// Comma-separated WMO numbers
    pub wmo: Option<String>,
    /// Comma-separated LPNN numbers
    pub lpnn: Option<String>,
    /// Comma-separated road-station ids
    pub rwsid: Option<String>,
    /// minlon,minlat,maxlon,maxlat
    pub bbox: Option<String>,
    /// WKT polygon selecting stations by area
    pub wkt: Option<String>,
    /// Nearest-station search center longitude
    pub lon: Option<f64>,
    /// Nearest-station search center latitude
    pub lat: Option<f64>,
    /// Nearest-station search radius, meters (default 50 km)
    pub maxdistance: Option<f64>,
    /// How many nearest stations to pick (default 1)
    pub numberofstations: Option<usize>,
    /// Interval start (RFC 3339, naive UTC or epoch); default now-24h
    pub starttime: Option<String>,
    /// Interval end; default now
    pub endtime: Option<String>,
    /// Output grid step in minutes; 0 = all data times
    pub timestep: Option<u32>,
    /// IANA zone or "localtime"
    pub timezone: Option<String>,
    /// Only the newest observation per station
    pub latest: Option<bool>,
    /// Comma-separated producer ids
    pub producer_ids: Option<String>,
    /// data_quality filter condition, e.g. "le 2"
    pub data_quality: Option<String>,
    /// Text emitted for missing values (default "nan")
    pub missingtext: Option<String>,
    /// Set false to bypass the cache tiers
    pub usecache: Option<bool>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObservationPoint {
    /// Observation time, RFC 3339
    pub time: String,
    #[schema(value_type = Object)]
    pub value: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ObservationsResponse {
    /// Requested parameter names, in request order
    pub parameters: Vec<String>,
    /// One column per parameter, aligned per station
    pub columns: Vec<Vec<ObservationPoint>>,
}

pub fn settings_from_query(query: &ObservationsQuery) -> ObsResult<Settings> {
    let mut settings = Settings::default();

    if let Some(stationtype) = &query.stationtype {
        settings.stationtype = stationtype.clone();
    }
    settings.parameters = query
        .parameters
        .split(',')
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect();

    if let Some(fmisids) = &query.fmisid {
        settings.tagged_fmisids = parse_int_list(fmisids)
            .into_iter()
            .map(|id| TaggedFmisid::new(id.to_string(), id))
            .collect();
    }
    if let Some(wmos) = &query.wmo {
        settings.wmos = parse_int_list(wmos);
    }
    if let Some(lpnns) = &query.lpnn {
        settings.lpnns = parse_int_list(lpnns);
    }
    if let Some(rwsids) = &query.rwsid {
        settings.rwsids = parse_int_list(rwsids);
    }

    if let Some(bbox) = &query.bbox {
        let parts: Vec<f64> = bbox
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        if parts.len() != 4 {
            return Err(ObsError::BadRequest(
                "bbox must be minlon,minlat,maxlon,maxlat".to_string(),
            ));
        }
        settings.bounding_box = Some(BoundingBox {
            min_lon: parts[0],
            min_lat: parts[1],
            max_lon: parts[2],
            max_lat: parts[3],
        });
    }
    settings.wkt_area = query.wkt.clone();

    if let (Some(lon), Some(lat)) = (query.lon, query.lat) {
        settings.nearest = Some(NearestSearch {
            longitude: lon,
            latitude: lat,
            max_distance: query.maxdistance.unwrap_or(50_000.0),
            number_of_stations: query.numberofstations.unwrap_or(1),
        });
    }

    let now = Utc::now();
    settings.endtime = match &query.endtime {
        Some(text) => parse_time(text)?,
        None => now,
    };
    settings.starttime = match &query.starttime {
        Some(text) => parse_time(text)?,
        None => settings.endtime - Duration::hours(24),
    };

    if let Some(step) = query.timestep {
        settings.timestep = step;
        settings.grid_mode = if step == 0 {
            GridMode::DataTimes
        } else {
            GridMode::FixedTimes
        };
    }
    if let Some(timezone) = &query.timezone {
        settings.timezone = timezone.clone();
    }
    settings.latest = query.latest.unwrap_or(false);

    if let Some(producers) = &query.producer_ids {
        settings.producer_ids = parse_int_list(producers).into_iter().collect();
    }
    if let Some(condition) = &query.data_quality {
        settings.data_filter.set("data_quality", condition.clone());
    }
    if let Some(text) = &query.missingtext {
        settings.missingtext = text.clone();
    }
    settings.use_data_cache = query.usecache.unwrap_or(true);

    Ok(settings)
}

fn render(columns: TimeSeriesVector, parameters: Vec<String>, missingtext: &str) -> ObservationsResponse {
    let columns = columns
        .into_iter()
        .map(|series| {
            series
                .into_iter()
                .map(|tv| ObservationPoint {
                    time: tv.time.to_rfc3339(),
                    value: tv.value.render(missingtext),
                })
                .collect()
        })
        .collect();
    ObservationsResponse {
        parameters,
        columns,
    }
}

/// Read observation time series
///
/// Resolves stations, routes the read through the cache hierarchy and
/// returns one aligned column per requested parameter.
#[utoipa::path(
    get,
    path = "/api/observations",
    params(ObservationsQuery),
    responses(
        (status = 200, description = "Time series retrieved", body = ObservationsResponse),
        (status = 400, description = "Invalid request"),
        (status = 404, description = "Station not found"),
        (status = 503, description = "Backend unavailable"),
    ),
    tag = "observations"
)]
pub async fn get_observations(
    State(state): State<AppState>,
    Query(query): Query<ObservationsQuery>,
) -> ObsResult<Json<ObservationsResponse>> {
    let settings = settings_from_query(&query)?;
    let parameters = settings.parameters.clone();
    let missingtext = settings.missingtext.clone();

    let columns = state.engine.values(settings).await?;
    Ok(Json(render(columns, parameters, &missingtext)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_parsing_accepts_three_forms() {
        assert!(parse_time("2026-03-01T12:00:00Z").is_ok());
        assert!(parse_time("2026-03-01T12:00:00").is_ok());
        assert!(parse_time("1770000000").is_ok());
        assert!(parse_time("not a time").is_err());
    }

    fn base_query() -> ObservationsQuery {
        ObservationsQuery {
            stationtype: None,
            parameters: "t2m,rh".to_string(),
            fmisid: Some("100971,100996".to_string()),
            wmo: None,
            lpnn: None,
            rwsid: None,
            bbox: None,
            wkt: None,
            lon: None,
            lat: None,
            maxdistance: None,
            numberofstations: None,
            starttime: Some("2026-03-01T00:00:00Z".to_string()),
            endtime: Some("2026-03-02T00:00:00Z".to_string()),
            timestep: Some(60),
            timezone: None,
            latest: None,
            producer_ids: Some("1".to_string()),
            data_quality: Some("le 2".to_string()),
            missingtext: None,
            usecache: None,
        }
    }

    #[test]
    fn settings_carry_selectors_and_grid() {
        let settings = settings_from_query(&base_query()).unwrap();
        assert_eq!(settings.parameters, vec!["t2m", "rh"]);
        assert_eq!(settings.tagged_fmisids.len(), 2);
        assert_eq!(settings.tagged_fmisids[0].fmisid, 100971);
        assert_eq!(settings.timestep, 60);
        assert_eq!(settings.grid_mode, GridMode::FixedTimes);
        assert!(settings.producer_ids.contains(&1));
        assert!(settings.data_filter.value_ok("data_quality", 2));
        assert!(!settings.data_filter.value_ok("data_quality", 3));
    }

    #[test]
    fn bad_bbox_is_rejected() {
        let mut query = base_query();
        query.bbox = Some("1,2,3".to_string());
        assert!(settings_from_query(&query).is_err());
    }
}
