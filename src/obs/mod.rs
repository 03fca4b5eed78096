//! Observation row types shared by the caches and the database drivers.

pub mod settings;

pub use settings::{DataFilter, GridMode, Settings, TaggedFmisid};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// One numeric sample of one measurand from one sensor at one station at
/// one instant (the narrow table shape).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub fmisid: i32,
    pub sensor_no: i32,
    /// 1 marks the station's default sensor for the measurand.
    pub measurand_no: i32,
    pub data_time: DateTime<Utc>,
    pub measurand_id: i32,
    pub data_value: Option<f64>,
    pub data_quality: i32,
    /// -1 when the producer did not report a source.
    pub data_source: i32,
    pub producer_id: i32,
    pub modified_last: DateTime<Utc>,
}

impl Observation {
    /// Content hash identifying the row for idempotent upserts. A changed
    /// field yields a new hash, so corrections pass the dedup filter.
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.fmisid.hash(&mut hasher);
        self.sensor_no.hash(&mut hasher);
        self.measurand_no.hash(&mut hasher);
        self.data_time.timestamp().hash(&mut hasher);
        self.measurand_id.hash(&mut hasher);
        self.data_value.map(f64::to_bits).hash(&mut hasher);
        self.data_quality.hash(&mut hasher);
        self.data_source.hash(&mut hasher);
        self.producer_id.hash(&mut hasher);
        self.modified_last.timestamp().hash(&mut hasher);
        hasher.finish()
    }
}

/// A lightning stroke. Not keyed by station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlashObservation {
    pub flash_id: i64,
    pub stroke_time: DateTime<Utc>,
    pub stroke_time_fraction: i32,
    pub longitude: f64,
    pub latitude: f64,
    pub multiplicity: i32,
    pub cloud_indicator: i32,
    pub peak_current: Option<f64>,
    pub modified_last: DateTime<Utc>,
}

impl FlashObservation {
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.flash_id.hash(&mut hasher);
        self.stroke_time.timestamp().hash(&mut hasher);
        self.stroke_time_fraction.hash(&mut hasher);
        self.longitude.to_bits().hash(&mut hasher);
        self.latitude.to_bits().hash(&mut hasher);
        self.multiplicity.hash(&mut hasher);
        self.cloud_indicator.hash(&mut hasher);
        self.peak_current.map(f64::to_bits).hash(&mut hasher);
        hasher.finish()
    }
}

/// A sample from a moving platform. Carries its own coordinates; the
/// optional station code resolves against the mobile-station registry at
/// read time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MobileObservation {
    pub fmisid: Option<i32>,
    pub station_code: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: Option<f64>,
    pub sensor_no: i32,
    pub measurand_no: i32,
    pub data_time: DateTime<Utc>,
    pub measurand_id: i32,
    pub data_value: Option<f64>,
    pub data_quality: i32,
    pub data_source: i32,
    pub producer_id: i32,
    pub created: DateTime<Utc>,
    pub modified_last: DateTime<Utc>,
}

impl MobileObservation {
    #[must_use]
    pub fn hash_value(&self) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.fmisid.hash(&mut hasher);
        self.station_code.hash(&mut hasher);
        self.longitude.to_bits().hash(&mut hasher);
        self.latitude.to_bits().hash(&mut hasher);
        self.altitude.map(f64::to_bits).hash(&mut hasher);
        self.sensor_no.hash(&mut hasher);
        self.measurand_no.hash(&mut hasher);
        self.data_time.timestamp().hash(&mut hasher);
        self.measurand_id.hash(&mut hasher);
        self.data_value.map(f64::to_bits).hash(&mut hasher);
        self.data_quality.hash(&mut hasher);
        self.data_source.hash(&mut hasher);
        self.producer_id.hash(&mut hasher);
        hasher.finish()
    }
}

/// An observation joined with the coordinates it was made at. For fixed
/// stations the coordinates come from the station record, for mobile
/// platforms from the row itself.
#[derive(Debug, Clone)]
pub struct LocationObservation {
    pub obs: Observation,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
}
