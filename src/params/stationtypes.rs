//! Per-stationtype configuration: which station groups a producer may
//! see, which producer ids it covers and which backend table serves it.

use std::collections::{BTreeMap, BTreeSet};

use crate::config::StationtypeEntry;
use crate::error::{ObsError, ObsResult};

#[derive(Debug, Default, Clone)]
pub struct StationtypeConfig {
    entries: BTreeMap<String, StationtypeEntry>,
}

impl StationtypeConfig {
    #[must_use]
    pub fn new(entries: BTreeMap<String, StationtypeEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v))
            .collect();
        Self { entries }
    }

    #[must_use]
    pub fn stationtypes(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn entry(&self, stationtype: &str) -> ObsResult<&StationtypeEntry> {
        self.entries
            .get(&stationtype.to_ascii_lowercase())
            .ok_or_else(|| {
                ObsError::Configuration(format!("unknown station type '{stationtype}'"))
            })
    }

    /// Station groups the type may read. Empty means unrestricted.
    #[must_use]
    pub fn group_codes(&self, stationtype: &str) -> BTreeSet<String> {
        self.entries
            .get(&stationtype.to_ascii_lowercase())
            .map(|e| e.station_groups.iter().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn producer_ids(&self, stationtype: &str) -> BTreeSet<i32> {
        self.entries
            .get(&stationtype.to_ascii_lowercase())
            .map(|e| e.producer_ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// The backend table serving the type.
    pub fn database_table_name(&self, stationtype: &str) -> ObsResult<&str> {
        self.entry(stationtype).map(|e| e.database_table.as_str())
    }

    #[must_use]
    pub fn use_common_query_method(&self, stationtype: &str) -> bool {
        self.entries
            .get(&stationtype.to_ascii_lowercase())
            .is_some_and(|e| e.use_common_query_method)
    }

    /// True for types served by the wide/QC table shape with string
    /// column names.
    #[must_use]
    pub fn is_qc_table(&self, stationtype: &str) -> bool {
        self.entries
            .get(&stationtype.to_ascii_lowercase())
            .is_some_and(|e| e.database_table == "weather_data_qc")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> StationtypeConfig {
        let mut entries = BTreeMap::new();
        entries.insert(
            "Road".to_string(),
            StationtypeEntry {
                station_groups: vec!["RWS".to_string(), "EXTRWS".to_string()],
                producer_ids: vec![1, 2],
                database_table: "weather_data_qc".to_string(),
                use_common_query_method: false,
            },
        );
        StationtypeConfig::new(entries)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let c = config();
        assert_eq!(c.database_table_name("ROAD").unwrap(), "weather_data_qc");
        assert!(c.is_qc_table("road"));
    }

    #[test]
    fn unknown_type_is_configuration_error() {
        let c = config();
        assert!(c.database_table_name("aws").is_err());
    }

    #[test]
    fn groups_and_producers() {
        let c = config();
        assert!(c.group_codes("road").contains("RWS"));
        assert_eq!(c.producer_ids("road"), BTreeSet::from([1, 2]));
    }
}
