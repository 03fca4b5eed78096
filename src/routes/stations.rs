//! Station listing and the authenticated reload endpoint.

use axum::{
    Json,
    extract::{Query, State},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::observations::{parse_int_list, parse_time};
use crate::common::AppState;
use crate::error::{ObsError, ObsResult};
use crate::obs::settings::BoundingBox;
use crate::stations::Station;

#[derive(Debug, Deserialize, IntoParams)]
pub struct StationsQuery {
    /// Comma-separated fmisid filter
    pub fmisid: Option<String>,
    pub lpnn: Option<String>,
    pub wmo: Option<String>,
    pub rwsid: Option<String>,
    /// Station type / group filter
    #[serde(rename = "type")]
    pub station_type: Option<String>,
    /// Substring match on the formal name
    pub name: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    /// minlon,minlat,maxlon,maxlat
    pub bbox: Option<String>,
    /// Keep stations valid at or after this time
    pub starttime: Option<String>,
    /// Keep stations valid at or before this time
    pub endtime: Option<String>,
}

/// One row of the station listing.
#[derive(Debug, Serialize, ToSchema)]
pub struct StationListRow {
    pub fmisid: i32,
    pub wmo: Option<i32>,
    pub lpnn: Option<i32>,
    pub rwsid: Option<i32>,
    /// WIGOS identifier
    pub wsi: Option<String>,
    pub station_type: String,
    pub name: String,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
    pub timezone: String,
    pub country: String,
    pub iso2: String,
    pub region: String,
    pub station_start: String,
    pub station_end: String,
}

impl StationListRow {
    fn from_station(s: &Station) -> Self {
        Self {
            fmisid: s.fmisid,
            wmo: s.wmo,
            lpnn: s.lpnn,
            rwsid: s.rwsid,
            wsi: s.wsi.clone(),
            station_type: s.station_type.clone(),
            name: s.formal_name.clone(),
            longitude: s.longitude,
            latitude: s.latitude,
            elevation: s.elevation,
            timezone: s.timezone.clone(),
            country: s.country.clone(),
            iso2: s.iso2.clone(),
            region: s.region.clone(),
            station_start: s.station_start.to_rfc3339(),
            station_end: s.station_end.to_rfc3339(),
        }
    }
}

fn bbox_contains(bbox: &BoundingBox, s: &Station) -> bool {
    let lat_ok = s.latitude >= bbox.min_lat && s.latitude <= bbox.max_lat;
    let lon_ok = if bbox.min_lon <= bbox.max_lon {
        s.longitude >= bbox.min_lon && s.longitude <= bbox.max_lon
    } else {
        // Antimeridian wrap
        s.longitude >= bbox.min_lon || s.longitude <= bbox.max_lon
    };
    lat_ok && lon_ok
}

/// List stations with filters
#[utoipa::path(
    get,
    path = "/api/stations",
    params(StationsQuery),
    responses((status = 200, description = "Stations listed", body = Vec<StationListRow>)),
    tag = "stations"
)]
pub async fn list_stations(
    State(state): State<AppState>,
    Query(query): Query<StationsQuery>,
) -> ObsResult<Json<Vec<StationListRow>>> {
    let info = state.engine.station_info();

    let fmisids = query.fmisid.as_deref().map(parse_int_list);
    let wmos = query.wmo.as_deref().map(parse_int_list);
    let lpnns = query.lpnn.as_deref().map(parse_int_list);
    let rwsids = query.rwsid.as_deref().map(parse_int_list);

    let bbox = match &query.bbox {
        Some(text) => {
            let parts: Vec<f64> = text.split(',').filter_map(|s| s.trim().parse().ok()).collect();
            if parts.len() != 4 {
                return Err(ObsError::BadRequest(
                    "bbox must be minlon,minlat,maxlon,maxlat".to_string(),
                ));
            }
            Some(BoundingBox {
                min_lon: parts[0],
                min_lat: parts[1],
                max_lon: parts[2],
                max_lat: parts[3],
            })
        }
        None => None,
    };

    let starttime: Option<DateTime<Utc>> = match &query.starttime {
        Some(t) => Some(parse_time(t)?),
        None => None,
    };
    let endtime: Option<DateTime<Utc>> = match &query.endtime {
        Some(t) => Some(parse_time(t)?),
        None => None,
    };

    let name_filter = query.name.as_ref().map(|n| n.to_ascii_lowercase());
    let type_filter = query.station_type.as_ref().map(|t| t.to_ascii_lowercase());
    let country_filter = query.country.as_ref().map(|c| c.to_ascii_lowercase());
    let region_filter = query.region.as_ref().map(|r| r.to_ascii_lowercase());

    let rows: Vec<StationListRow> = info
        .stations()
        .iter()
        .filter(|s| fmisids.as_ref().is_none_or(|ids| ids.contains(&s.fmisid)))
        .filter(|s| {
            wmos.as_ref()
                .is_none_or(|ids| s.wmo.is_some_and(|wmo| ids.contains(&wmo)))
        })
        .filter(|s| {
            lpnns
                .as_ref()
                .is_none_or(|ids| s.lpnn.is_some_and(|lpnn| ids.contains(&lpnn)))
        })
        .filter(|s| {
            rwsids
                .as_ref()
                .is_none_or(|ids| s.rwsid.is_some_and(|rwsid| ids.contains(&rwsid)))
        })
        .filter(|s| {
            type_filter.as_ref().is_none_or(|t| {
                s.station_type.eq_ignore_ascii_case(t)
                    || s.group_codes().iter().any(|g| g.eq_ignore_ascii_case(t))
            })
        })
        .filter(|s| {
            name_filter
                .as_ref()
                .is_none_or(|n| s.formal_name.to_ascii_lowercase().contains(n))
        })
        .filter(|s| {
            country_filter.as_ref().is_none_or(|c| {
                s.country.eq_ignore_ascii_case(c) || s.iso2.eq_ignore_ascii_case(c)
            })
        })
        .filter(|s| {
            region_filter
                .as_ref()
                .is_none_or(|r| s.region.eq_ignore_ascii_case(r))
        })
        .filter(|s| bbox.as_ref().is_none_or(|b| bbox_contains(b, s)))
        .filter(|s| starttime.is_none_or(|t| s.station_end >= t))
        .filter(|s| endtime.is_none_or(|t| s.station_start <= t))
        .map(StationListRow::from_station)
        .collect();

    Ok(Json(rows))
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ReloadResponse {
    pub reloaded: bool,
}

fn check_admin_token(state: &AppState, headers: &HeaderMap) -> ObsResult<()> {
    let Some(expected) = &state.config.api.admin_token else {
        return Err(ObsError::Unauthorized);
    };
    let provided = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(ObsError::Unauthorized)
    }
}

/// Reload the station registry from the authoritative backend
#[utoipa::path(
    post,
    path = "/admin/reloadstations",
    responses(
        (status = 200, description = "Reload finished", body = ReloadResponse),
        (status = 401, description = "Missing or wrong token"),
    ),
    tag = "admin"
)]
pub async fn reload_stations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> ObsResult<Json<ReloadResponse>> {
    check_admin_token(&state, &headers)?;

    let reloaded = match &state.admin {
        Some(admin) => admin.reload_stations().await?,
        None => false,
    };
    Ok(Json(ReloadResponse { reloaded }))
}
