//! Parameter resolution: request names to backend measurand ids.

pub mod mapping;
pub mod roadforeign;
pub mod special;
pub mod stationtypes;

pub use mapping::QueryMapping;
pub use roadforeign::RoadAndForeignIds;
pub use stationtypes::StationtypeConfig;

use std::collections::BTreeMap;

/// Station type entry that never falls back to `default`. It binds a
/// parameter to its canonical measurand id and nothing else may shadow
/// it.
pub const MAIN_MEASURAND_ID: &str = "measurand_id";

/// Fallback station type entry.
pub const DEFAULT_STATIONTYPE: &str = "default";

/// Sensor marker for "the station's default sensor".
pub const DEFAULT_SENSOR_NUMBER: i32 = -1;

/// Configuration-defined mapping `parameter name -> station type ->
/// backend id or column name`. Lookups are case-insensitive.
#[derive(Debug, Default, Clone)]
pub struct ParameterMap {
    params: BTreeMap<String, BTreeMap<String, String>>,
}

impl ParameterMap {
    #[must_use]
    pub fn new(raw: BTreeMap<String, BTreeMap<String, String>>) -> Self {
        let params = raw
            .into_iter()
            .map(|(name, by_type)| (name.to_ascii_lowercase(), by_type))
            .collect();
        Self { params }
    }

    /// Resolve a parameter for a station type, falling back to the
    /// `default` entry except for the main-measurand-id key.
    #[must_use]
    pub fn get_parameter(&self, name: &str, stationtype: &str) -> Option<&str> {
        let by_type = self.params.get(&name.to_ascii_lowercase())?;
        if let Some(value) = by_type.get(stationtype) {
            return Some(value.as_str());
        }
        if stationtype != MAIN_MEASURAND_ID {
            return by_type.get(DEFAULT_STATIONTYPE).map(String::as_str);
        }
        None
    }

    /// All parameter names known for a station type (directly or via the
    /// default entry), for the parameter listing endpoint.
    #[must_use]
    pub fn names_for_stationtype(&self, stationtype: &str) -> Vec<(String, String)> {
        self.params
            .iter()
            .filter_map(|(name, by_type)| {
                by_type
                    .get(stationtype)
                    .or_else(|| by_type.get(DEFAULT_STATIONTYPE))
                    .map(|id| (name.clone(), id.clone()))
            })
            .collect()
    }

    #[must_use]
    pub fn is_known(&self, name: &str, stationtype: &str) -> bool {
        self.get_parameter(name, stationtype).is_some()
    }
}

/// Strip the `qc_` prefix and any trailing `_<int>` sensor suffix,
/// returning the bare parameter name used for the map lookup.
#[must_use]
pub fn parse_parameter_name(parameter: &str) -> String {
    let mut name = parameter.to_ascii_lowercase();
    if let Some(stripped) = name.strip_prefix("qc_") {
        name = stripped.to_string();
    }
    if let Some(pos) = name.rfind('_') {
        if name[pos + 1..].parse::<i32>().is_ok() {
            name.truncate(pos);
        }
    }
    name
}

/// Reduce a request name to the bare parameter used for map lookup:
/// strips the `qc_` prefix, the `_data_source_/_data_quality_` markers,
/// any `_sensornumber_<N>` suffix and a trailing `_<int>` sensor.
#[must_use]
pub fn base_parameter_name(parameter: &str) -> String {
    let mut base = parameter.to_ascii_lowercase();
    if let Some(stripped) = base.strip_prefix("qc_") {
        base = stripped.to_string();
    }
    for marker in [
        "_data_source_sensornumber_",
        "_data_quality_sensornumber_",
        "_sensornumber_",
    ] {
        if let Some(cut) = base.find(marker) {
            base.truncate(cut);
        }
    }
    if let Some(pos) = base.rfind('_') {
        if base[pos + 1..].parse::<i32>().is_ok() {
            base.truncate(pos);
        }
    }
    base
}

/// Explicit sensor number from the `_sensornumber_<N>` suffix, or from a
/// trailing `_<N>`. None means the default sensor.
#[must_use]
pub fn parse_sensor_number(parameter: &str) -> Option<i32> {
    let name = parameter.to_ascii_lowercase();
    if let Some(pos) = name.rfind("_sensornumber_") {
        return name[pos + "_sensornumber_".len()..].parse().ok();
    }
    if let Some(pos) = name.rfind('_') {
        return name[pos + 1..].parse().ok();
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> ParameterMap {
        let mut raw = BTreeMap::new();
        let mut t2m = BTreeMap::new();
        t2m.insert("observations_fmi".to_string(), "4".to_string());
        t2m.insert("road".to_string(), "ILMA".to_string());
        t2m.insert("default".to_string(), "4".to_string());
        raw.insert("T2m".to_string(), t2m);

        let mut rh = BTreeMap::new();
        rh.insert("default".to_string(), "13".to_string());
        raw.insert("rh".to_string(), rh);
        ParameterMap::new(raw)
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let m = map();
        assert_eq!(m.get_parameter("T2M", "observations_fmi"), Some("4"));
        assert_eq!(m.get_parameter("t2m", "road"), Some("ILMA"));
    }

    #[test]
    fn default_fallback_applies() {
        let m = map();
        assert_eq!(m.get_parameter("rh", "road"), Some("13"));
    }

    #[test]
    fn main_measurand_id_never_falls_back() {
        let m = map();
        assert_eq!(m.get_parameter("rh", MAIN_MEASURAND_ID), None);
    }

    #[test]
    fn parameter_name_parsing() {
        assert_eq!(parse_parameter_name("qc_t2m"), "t2m");
        assert_eq!(parse_parameter_name("KELI_1"), "keli");
        assert_eq!(parse_parameter_name("trs_10min_dif"), "trs_10min_dif");
    }

    #[test]
    fn base_name_strips_all_decorations() {
        assert_eq!(base_parameter_name("T2m"), "t2m");
        assert_eq!(base_parameter_name("qc_t2m"), "t2m");
        assert_eq!(base_parameter_name("t2m_sensornumber_2"), "t2m");
        assert_eq!(base_parameter_name("t2m_data_source_sensornumber_1"), "t2m");
        assert_eq!(base_parameter_name("t2m_data_quality_sensornumber_default"), "t2m");
        assert_eq!(base_parameter_name("KELI_1"), "keli");
    }

    #[test]
    fn sensor_number_parsing() {
        assert_eq!(parse_sensor_number("t2m_sensornumber_2"), Some(2));
        assert_eq!(parse_sensor_number("keli_1"), Some(1));
        assert_eq!(parse_sensor_number("t2m"), None);
    }
}
