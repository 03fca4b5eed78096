//! The query planner: turns the ordered request parameter list into
//! column positions, measurand ids and sensor filters.

use std::collections::{BTreeMap, BTreeSet};

use crate::error::{ObsError, ObsResult};
use crate::obs::Settings;
use crate::params::{
    DEFAULT_SENSOR_NUMBER, ParameterMap, RoadAndForeignIds, parse_sensor_number, special,
};

/// The compiled plan for one request. Every requested parameter lands in
/// exactly one of `timeseries_positions` or `special_positions`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct QueryMapping {
    /// All measurand ids the backend query must fetch, ordered, unique.
    pub measurand_ids: Vec<i32>,
    /// Sensor number -> measurands wanted from it; -1 = default sensor.
    pub sensor_number_to_measurand_ids: BTreeMap<i32, BTreeSet<i32>>,
    /// Request name (with sensor suffix) -> measurand id.
    pub parameter_name_id_map: BTreeMap<String, i32>,
    /// Request name (with sensor suffix) -> backend name or id.
    pub parameter_name_map: BTreeMap<String, String>,
    /// Request name (with sensor suffix) -> output column.
    pub timeseries_positions: BTreeMap<String, usize>,
    /// Special name -> output column.
    pub special_positions: BTreeMap<String, usize>,
}

impl QueryMapping {
    fn add_measurand(&mut self, id: i32) {
        if !self.measurand_ids.contains(&id) {
            self.measurand_ids.push(id);
        }
    }

    /// True when some requested parameter carries the data-source or
    /// data-quality synthetic column.
    #[must_use]
    pub fn has_data_source_fields(&self) -> bool {
        self.special_positions
            .keys()
            .any(|name| special::is_data_source_field(name))
    }

    #[must_use]
    pub fn has_data_quality_fields(&self) -> bool {
        self.special_positions
            .keys()
            .any(|name| special::is_data_quality_field(name))
    }

    /// SQL condition accepting exactly the requested (sensor, measurand)
    /// combinations; the default sensor is marked by `measurand_no = 1`.
    #[must_use]
    pub fn sensor_filter_sql(&self) -> Option<String> {
        if self.sensor_number_to_measurand_ids.is_empty() {
            return None;
        }
        let mut clauses = Vec::new();
        for (sensor, mids) in &self.sensor_number_to_measurand_ids {
            if *sensor == DEFAULT_SENSOR_NUMBER {
                clauses.push("data.measurand_no = 1".to_string());
            } else {
                let ids = mids
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(",");
                clauses.push(format!(
                    "(data.sensor_no = {sensor} AND data.measurand_id IN ({ids}))"
                ));
            }
        }
        Some(format!("({})", clauses.join(" OR ")))
    }
}

/// Derived specials pull their inputs through the ordinary measurand
/// fetch; resolve one input id or fail.
fn derived_input_id(
    parameter_map: &ParameterMap,
    road_foreign: &RoadAndForeignIds,
    input: &str,
    stationtype: &str,
    is_qc_table: bool,
) -> Option<i32> {
    let sparam = parameter_map.get_parameter(input, stationtype)?;
    if is_qc_table {
        Some(road_foreign.string_to_integer(sparam))
    } else {
        sparam.parse().ok()
    }
}

/// Compile the request parameter list. See the module doc of
/// [`crate::timeseries::build`] for how the positions are consumed.
pub fn build_query_mapping(
    settings: &Settings,
    stationtype: &str,
    is_qc_table: bool,
    parameter_map: &ParameterMap,
    road_foreign: &RoadAndForeignIds,
) -> ObsResult<QueryMapping> {
    let mut qmap = QueryMapping::default();

    for (pos, raw_name) in settings.parameters.iter().enumerate() {
        let name = raw_name.to_ascii_lowercase();

        let plain_special = special::is_special(&name)
            && !special::is_data_quality_field(&name)
            && !special::is_data_source_field(&name);

        if plain_special {
            if name.starts_with("windcompass") {
                if !is_qc_table {
                    if let Some(id) = derived_input_id(
                        parameter_map,
                        road_foreign,
                        "winddirection",
                        stationtype,
                        is_qc_table,
                    ) {
                        qmap.add_measurand(id);
                    }
                }
                qmap.special_positions.insert(name, pos);
            } else if name == "feelslike" {
                if !is_qc_table {
                    for input in ["windspeedms", "relativehumidity", "temperature"] {
                        if let Some(id) = derived_input_id(
                            parameter_map,
                            road_foreign,
                            input,
                            stationtype,
                            is_qc_table,
                        ) {
                            qmap.add_measurand(id);
                        }
                    }
                }
                qmap.special_positions.insert(name, pos);
            } else if name == "smartsymbol" {
                if !is_qc_table {
                    for input in ["wawa", "totalcloudcover", "temperature"] {
                        if let Some(id) = derived_input_id(
                            parameter_map,
                            road_foreign,
                            input,
                            stationtype,
                            is_qc_table,
                        ) {
                            qmap.add_measurand(id);
                        }
                    }
                }
                qmap.special_positions.insert(name, pos);
            } else {
                qmap.special_positions.insert(name, pos);
            }
            continue;
        }

        // Regular measurand parameter, possibly a quality or source field
        let mut base = name.clone();
        let is_quality_field = if let Some(stripped) = base.strip_prefix("qc_") {
            base = stripped.to_string();
            true
        } else {
            base.contains("_data_quality_sensornumber_")
        };
        let is_source_field = base.contains("_data_source_sensornumber_");

        if let Some(cut) = base.find("_data_quality_sensornumber_") {
            base.truncate(cut);
        }
        if let Some(cut) = base.find("_data_source_sensornumber_") {
            base.truncate(cut);
        }

        let sensor_number = parse_sensor_number(&name);
        if let Some(cut) = base.find("_sensornumber_") {
            base.truncate(cut);
        }

        let sensor_text = sensor_number.map_or_else(|| "default".to_string(), |n| n.to_string());

        let Some(sparam) = parameter_map.get_parameter(&base, stationtype) else {
            return Err(ObsError::UnknownParameter {
                name: raw_name.clone(),
                stationtype: settings.stationtype.clone(),
            });
        };
        let sparam = sparam.to_string();

        let measurand_id = if is_qc_table {
            road_foreign.string_to_integer(&sparam)
        } else {
            sparam.parse::<i32>().map_err(|_| ObsError::UnknownParameter {
                name: raw_name.clone(),
                stationtype: settings.stationtype.clone(),
            })?
        };

        if is_quality_field || is_source_field {
            let kind = if is_source_field {
                "_data_source"
            } else {
                "_data_quality"
            };
            let key = format!("{base}{kind}_sensornumber_{sensor_text}");
            qmap.special_positions.insert(key, pos);
            // The lookup at build time goes through the value-parameter
            // name map, so register the backing measurand as well.
            let value_key = format!("{base}_sensornumber_{sensor_text}");
            qmap.parameter_name_map.entry(value_key.clone()).or_insert(sparam);
            qmap.parameter_name_id_map.entry(value_key).or_insert(measurand_id);
            qmap.add_measurand(measurand_id);
            qmap.sensor_number_to_measurand_ids
                .entry(sensor_number.unwrap_or(DEFAULT_SENSOR_NUMBER))
                .or_default()
                .insert(measurand_id);
        } else {
            let key = format!("{base}_sensornumber_{sensor_text}");
            qmap.timeseries_positions.insert(key.clone(), pos);
            qmap.parameter_name_map.insert(key.clone(), sparam);
            qmap.parameter_name_id_map.insert(key, measurand_id);
            qmap.add_measurand(measurand_id);
            qmap.sensor_number_to_measurand_ids
                .entry(sensor_number.unwrap_or(DEFAULT_SENSOR_NUMBER))
                .or_default()
                .insert(measurand_id);
        }
    }

    Ok(qmap)
}
