//! Station metadata: the value type, the immutable registry snapshot and
//! its serialized form.

pub mod info;
pub mod mobile;
pub mod store;

pub use info::StationInfo;
pub use mobile::MobileStationRegistry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One station record. A single fmisid may have several records that
/// differ by type or validity interval; within one record the
/// coordinates are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Station {
    pub fmisid: i32,
    #[serde(default)]
    pub wmo: Option<i32>,
    #[serde(default)]
    pub lpnn: Option<i32>,
    #[serde(default)]
    pub rwsid: Option<i32>,
    /// WIGOS station identifier.
    #[serde(default)]
    pub wsi: Option<String>,
    pub station_type: String,
    pub longitude: f64,
    pub latitude: f64,
    #[serde(default)]
    pub elevation: f64,
    pub formal_name: String,
    /// IANA time zone name.
    pub timezone: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub iso2: String,
    #[serde(default)]
    pub region: String,
    pub station_start: DateTime<Utc>,
    pub station_end: DateTime<Utc>,
    /// Group memberships; defaults to the station type when empty.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Station {
    #[must_use]
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.station_start <= t && t <= self.station_end
    }

    #[must_use]
    pub fn is_active_during(&self, starttime: DateTime<Utc>, endtime: DateTime<Utc>) -> bool {
        self.station_start <= endtime && starttime <= self.station_end
    }

    /// Groups this record belongs to; the station type acts as an
    /// implicit group when none are listed.
    #[must_use]
    pub fn group_codes(&self) -> Vec<&str> {
        if self.groups.is_empty() {
            vec![self.station_type.as_str()]
        } else {
            self.groups.iter().map(String::as_str).collect()
        }
    }
}

/// A station resolved for one request, with the request-scoped extras
/// the special parameters need.
#[derive(Debug, Clone)]
pub struct QueryStation {
    pub station: Station,
    /// The identifier the caller used, rendered as text.
    pub tag: String,
    /// Distance from the requested point, kilometers.
    pub distance_km: Option<f64>,
    /// Initial bearing from the requested point, degrees.
    pub direction_deg: Option<f64>,
    pub requested_lon: Option<f64>,
    pub requested_lat: Option<f64>,
}

impl QueryStation {
    #[must_use]
    pub fn plain(station: Station) -> Self {
        let tag = station.fmisid.to_string();
        Self {
            station,
            tag,
            distance_km: None,
            direction_deg: None,
            requested_lon: None,
            requested_lat: None,
        }
    }
}

const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Great-circle distance in meters.
#[must_use]
pub fn haversine_distance_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// Initial great-circle bearing, degrees clockwise from north.
#[must_use]
pub fn initial_bearing_deg(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let dlambda = (lon2 - lon1).to_radians();

    let y = dlambda.sin() * phi2.cos();
    let x = phi1.cos() * phi2.sin() - phi1.sin() * phi2.cos() * dlambda.cos();
    (y.atan2(x).to_degrees() + 360.0) % 360.0
}
