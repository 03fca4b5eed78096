//! Registry of moving platforms whose observations carry an external
//! station code. Initialized from the authoritative driver at startup
//! and consulted at read time to resolve codes into positions.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Debug, Clone, PartialEq)]
pub struct MobileStation {
    pub station_code: String,
    pub fmisid: Option<i32>,
    pub longitude: f64,
    pub latitude: f64,
    pub elevation: f64,
    pub valid_from: DateTime<Utc>,
    pub valid_to: DateTime<Utc>,
}

impl MobileStation {
    #[must_use]
    pub fn is_active_at(&self, t: DateTime<Utc>) -> bool {
        self.valid_from <= t && t <= self.valid_to
    }
}

/// Small registry keyed by station code. A code may have several
/// entries with disjoint validity intervals.
#[derive(Debug, Default)]
pub struct MobileStationRegistry {
    stations: RwLock<HashMap<String, Vec<MobileStation>>>,
}

impl MobileStationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole registry content.
    pub fn replace(&self, stations: Vec<MobileStation>) {
        let mut map: HashMap<String, Vec<MobileStation>> = HashMap::new();
        for station in stations {
            map.entry(station.station_code.clone()).or_default().push(station);
        }
        *self.stations.write().expect("mobile registry lock poisoned") = map;
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.stations
            .read()
            .expect("mobile registry lock poisoned")
            .values()
            .map(Vec::len)
            .sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The entry for `code` active at `t`, if any.
    #[must_use]
    pub fn get_station(&self, code: &str, t: DateTime<Utc>) -> Option<MobileStation> {
        self.stations
            .read()
            .expect("mobile registry lock poisoned")
            .get(code)?
            .iter()
            .find(|s| s.is_active_at(t))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, TimeZone};

    fn entry(code: &str, from_year: i32, to_year: i32) -> MobileStation {
        MobileStation {
            station_code: code.to_string(),
            fmisid: None,
            longitude: 25.0,
            latitude: 62.0,
            elevation: 100.0,
            valid_from: Utc.with_ymd_and_hms(from_year, 1, 1, 0, 0, 0).unwrap(),
            valid_to: Utc.with_ymd_and_hms(to_year, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn resolves_by_validity() {
        let registry = MobileStationRegistry::new();
        registry.replace(vec![entry("A1", 2000, 2010), entry("A1", 2010, 2030)]);

        let early = Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(registry.get_station("A1", early).unwrap().valid_to.year(), 2010);
        assert_eq!(registry.get_station("A1", late).unwrap().valid_to.year(), 2030);
        assert!(registry.get_station("B2", late).is_none());
    }

    #[test]
    fn replace_swaps_content() {
        let registry = MobileStationRegistry::new();
        registry.replace(vec![entry("A1", 2000, 2030)]);
        assert_eq!(registry.len(), 1);
        registry.replace(vec![entry("B2", 2000, 2030), entry("C3", 2000, 2030)]);
        assert_eq!(registry.len(), 2);
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        assert!(registry.get_station("A1", t).is_none());
    }
}
