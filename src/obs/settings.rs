use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// A requested station in request order. The tag is the identifier the
/// caller used (fmisid, wmo, coordinate pair, ...) rendered as text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaggedFmisid {
    pub tag: String,
    pub fmisid: i32,
}

impl TaggedFmisid {
    #[must_use]
    pub fn new(tag: impl Into<String>, fmisid: i32) -> Self {
        Self {
            tag: tag.into(),
            fmisid,
        }
    }
}

/// Geographic search box; `min_lon > max_lon` crosses the antimeridian.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

/// Nearest-station search around a point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestSearch {
    pub longitude: f64,
    pub latitude: f64,
    /// Meters.
    pub max_distance: f64,
    pub number_of_stations: usize,
}

/// How the output time grid is formed when `latest` is not requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GridMode {
    /// Every obstime appearing in the data.
    #[default]
    DataTimes,
    /// Only the generated fixed grid.
    FixedTimes,
    /// The union of the generated grid and the data times (used by
    /// time-series aggregation queries).
    DataAndFixedTimes,
}

/// Accepted-value predicates per raw field, e.g. `data_quality` ->
/// `["le 2"]`. An absent field accepts everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataFilter {
    conditions: BTreeMap<String, Vec<String>>,
}

impl DataFilter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, field: impl Into<String>, condition: impl Into<String>) {
        self.conditions
            .entry(field.into())
            .or_default()
            .push(condition.into());
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    /// True when `value` passes every condition registered for `field`.
    /// Conditions are `lt/le/gt/ge/eq N`, a bare number, or a comma list
    /// of numbers (any match accepts).
    #[must_use]
    pub fn value_ok(&self, field: &str, value: i32) -> bool {
        let Some(conditions) = self.conditions.get(field) else {
            return true;
        };
        conditions.iter().all(|c| Self::matches(c, value))
    }

    fn matches(condition: &str, value: i32) -> bool {
        let condition = condition.trim();
        if let Some((op, operand)) = condition.split_once(' ') {
            let Ok(limit) = operand.trim().parse::<i32>() else {
                return true;
            };
            return match op {
                "lt" => value < limit,
                "le" => value <= limit,
                "gt" => value > limit,
                "ge" => value >= limit,
                "eq" => value == limit,
                _ => true,
            };
        }
        // Bare number or comma list: membership test
        condition
            .split(',')
            .filter_map(|s| s.trim().parse::<i32>().ok())
            .any(|v| v == value)
    }
}

/// One observation request. Station selectors, the ordered parameter
/// list, the time interval and the output grid options.
#[derive(Debug, Clone)]
pub struct Settings {
    pub stationtype: String,
    pub tagged_fmisids: Vec<TaggedFmisid>,
    pub wmos: Vec<i32>,
    pub lpnns: Vec<i32>,
    pub rwsids: Vec<i32>,
    pub bounding_box: Option<BoundingBox>,
    pub wkt_area: Option<String>,
    pub nearest: Option<NearestSearch>,

    /// Requested parameters, in output order.
    pub parameters: Vec<String>,

    pub starttime: DateTime<Utc>,
    pub endtime: DateTime<Utc>,
    /// Grid step in minutes; 0 means "all data times".
    pub timestep: u32,
    /// IANA zone name, or "localtime" for each station's own zone.
    pub timezone: String,
    pub latest: bool,
    pub grid_mode: GridMode,

    pub producer_ids: BTreeSet<i32>,
    pub data_filter: DataFilter,
    pub stationgroups: BTreeSet<String>,
    pub missingtext: String,
    pub use_data_cache: bool,
}

impl Default for Settings {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            stationtype: "observations_fmi".to_string(),
            tagged_fmisids: Vec::new(),
            wmos: Vec::new(),
            lpnns: Vec::new(),
            rwsids: Vec::new(),
            bounding_box: None,
            wkt_area: None,
            nearest: None,
            parameters: Vec::new(),
            starttime: now - Duration::hours(24),
            endtime: now,
            timestep: 0,
            timezone: "localtime".to_string(),
            latest: false,
            grid_mode: GridMode::DataTimes,
            producer_ids: BTreeSet::new(),
            data_filter: DataFilter::new(),
            stationgroups: BTreeSet::new(),
            missingtext: "nan".to_string(),
            use_data_cache: true,
        }
    }
}

impl Settings {
    /// Invariant check performed at the API boundary.
    pub fn validate(&self) -> Result<(), crate::error::ObsError> {
        if self.starttime > self.endtime {
            return Err(crate::error::ObsError::BadRequest(format!(
                "starttime {} is after endtime {}",
                self.starttime, self.endtime
            )));
        }
        if self.parameters.is_empty() {
            return Err(crate::error::ObsError::BadRequest(
                "no parameters requested".to_string(),
            ));
        }
        Ok(())
    }

    /// True when the producer filter accepts the id (an empty filter
    /// accepts everything).
    #[must_use]
    pub fn producer_ok(&self, producer_id: i32) -> bool {
        self.producer_ids.is_empty() || self.producer_ids.contains(&producer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_filter_operators() {
        let mut filter = DataFilter::new();
        filter.set("data_quality", "le 2");
        assert!(filter.value_ok("data_quality", 1));
        assert!(filter.value_ok("data_quality", 2));
        assert!(!filter.value_ok("data_quality", 3));
        // Unknown field accepts everything
        assert!(filter.value_ok("data_source", 99));
    }

    #[test]
    fn data_filter_membership_list() {
        let mut filter = DataFilter::new();
        filter.set("station_no", "1020,1046");
        assert!(filter.value_ok("station_no", 1020));
        assert!(filter.value_ok("station_no", 1046));
        assert!(!filter.value_ok("station_no", 7));
    }

    #[test]
    fn settings_reject_inverted_interval() {
        let mut settings = Settings::default();
        settings.parameters.push("t2m".to_string());
        settings.starttime = settings.endtime + Duration::hours(1);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn empty_producer_filter_accepts_all() {
        let settings = Settings::default();
        assert!(settings.producer_ok(42));
    }
}
