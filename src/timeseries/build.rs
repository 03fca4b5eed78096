//! Result assembly: joins narrow observation rows against the valid
//! time grid, selects sensors, computes derived parameters and fills
//! gaps. One call assembles one batch of stations; the engine stitches
//! the per-station row ranges into request order afterwards.

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};

use super::{TimeSeriesVector, TimedValue, Value, derived, grid, initialize_result_vector};
use crate::error::{ObsError, ObsResult};
use crate::obs::{FlashObservation, LocationObservation, Settings};
use crate::params::{ParameterMap, QueryMapping, RoadAndForeignIds, special};
use crate::stations::QueryStation;

/// Reserved measurand ids for the observation-time position. Real
/// measurand ids are non-negative and the wide-table synthetic ids stay
/// above -1000, so these cannot collide.
pub const LONGITUDE_MEASURAND_ID: i32 = -9001;
pub const LATITUDE_MEASURAND_ID: i32 = -9002;
pub const ELEVATION_MEASURAND_ID: i32 = -9003;

/// One observed cell: value plus its quality and source fields, and
/// whether the reporting sensor is the station's default for the
/// measurand.
#[derive(Debug, Clone)]
pub struct DataCell {
    pub value: Value,
    pub data_quality: i32,
    pub data_source: i32,
    pub is_default_sensor: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataField {
    Value,
    DataQuality,
    DataSource,
}

type SensorData = BTreeMap<i32, DataCell>;
type MeasurandData = BTreeMap<i32, SensorData>;
type TimedMeasurandData = BTreeMap<DateTime<Utc>, MeasurandData>;
type StationTimedMeasurandData = BTreeMap<i32, TimedMeasurandData>;

/// Everything the builder needs besides the rows themselves.
pub struct BuildContext<'a> {
    pub settings: &'a Settings,
    pub stationtype: &'a str,
    pub is_qc_table: bool,
    pub parameter_map: &'a ParameterMap,
    pub road_foreign: &'a RoadAndForeignIds,
    /// fmisid -> resolved station for this request.
    pub stations: &'a BTreeMap<i32, QueryStation>,
}

impl BuildContext<'_> {
    fn measurand_id_of(&self, parameter: &str) -> Option<i32> {
        let sparam = self.parameter_map.get_parameter(parameter, self.stationtype)?;
        if self.is_qc_table {
            Some(self.road_foreign.string_to_integer(sparam))
        } else {
            sparam.parse().ok()
        }
    }
}

/// Group rows into `fmisid -> obstime -> measurand -> sensor -> cell`,
/// storing the observation-time coordinates under the reserved ids.
fn build_station_data(rows: &[LocationObservation]) -> StationTimedMeasurandData {
    let mut data: StationTimedMeasurandData = BTreeMap::new();

    for row in rows {
        let obs = &row.obs;
        let cell = DataCell {
            value: obs.data_value.map_or(Value::None, Value::Double),
            data_quality: obs.data_quality,
            data_source: obs.data_source,
            is_default_sensor: obs.measurand_no == 1,
        };
        let at_time = data.entry(obs.fmisid).or_default().entry(obs.data_time).or_default();
        at_time
            .entry(obs.measurand_id)
            .or_default()
            .insert(obs.sensor_no, cell.clone());

        for (mid, value) in [
            (LONGITUDE_MEASURAND_ID, row.longitude),
            (LATITUDE_MEASURAND_ID, row.latitude),
            (ELEVATION_MEASURAND_ID, row.elevation),
        ] {
            at_time.entry(mid).or_default().insert(
                obs.sensor_no,
                DataCell {
                    value: Value::Double(value),
                    data_quality: obs.data_quality,
                    data_source: obs.data_source,
                    is_default_sensor: obs.measurand_no == 1,
                },
            );
        }
    }

    data
}

fn cell_field(cell: &DataCell, field: DataField) -> Value {
    match field {
        DataField::Value => cell.value.clone(),
        DataField::DataQuality => Value::Int(i64::from(cell.data_quality)),
        DataField::DataSource => {
            if cell.data_source > -1 {
                Value::Int(i64::from(cell.data_source))
            } else {
                Value::None
            }
        }
    }
}

/// The "default sensor" selection: prefer the row flagged as coming
/// from the default sensor, otherwise the smallest sensor number
/// present for the measurand.
fn default_sensor_value(sensor_data: &SensorData, field: DataField) -> Value {
    if let Some(cell) = sensor_data.values().find(|c| c.is_default_sensor) {
        return cell_field(cell, field);
    }
    sensor_data
        .values()
        .next()
        .map_or(Value::None, |cell| cell_field(cell, field))
}

/// Select by the textual sensor specifier from the request name:
/// "default" (or empty) uses the default-sensor rule, otherwise an
/// explicit sensor number must match.
fn sensor_value(sensor_data: &SensorData, sensor_no: &str, field: DataField) -> Value {
    if sensor_data.is_empty() {
        return Value::None;
    }
    if sensor_no == "default" || sensor_no.is_empty() {
        return default_sensor_value(sensor_data, field);
    }
    match sensor_no.parse::<i32>() {
        Ok(number) => sensor_data
            .get(&number)
            .map_or(Value::None, |cell| cell_field(cell, field)),
        Err(_) => Value::None,
    }
}

fn sensor_suffix(name: &str) -> &str {
    name.rsplit('_').next().unwrap_or("default")
}

fn default_measurand_value(data: &MeasurandData, measurand_id: i32) -> Value {
    data.get(&measurand_id)
        .map_or(Value::None, |sensors| default_sensor_value(sensors, DataField::Value))
}

/// data_source / data_quality synthetic columns: same cell lookup as
/// values, different field.
fn special_field_value(
    qmap: &QueryMapping,
    data: &MeasurandData,
    field_name: &str,
    field: DataField,
) -> Value {
    let marker = match field {
        DataField::DataSource => "_data_source_sensornumber_",
        _ => "_data_quality_sensornumber_",
    };
    let master = field_name.split(marker).next().unwrap_or_default();
    let sensor_no = sensor_suffix(field_name);

    let prefix = format!("{master}_sensornumber_");
    for (name, measurand_id) in &qmap.parameter_name_id_map {
        if name.starts_with(&prefix) {
            if let Some(sensors) = data.get(measurand_id) {
                return sensor_value(sensors, sensor_no, field);
            }
            return Value::None;
        }
    }
    Value::None
}

fn derived_special_value(
    ctx: &BuildContext<'_>,
    name: &str,
    data: &MeasurandData,
    station: &QueryStation,
    obstime: DateTime<Utc>,
) -> Value {
    if name.starts_with("windcompass") {
        let Some(mid) = ctx.measurand_id_of("winddirection") else {
            return Value::None;
        };
        let Some(direction) = default_measurand_value(data, mid).as_f64() else {
            return Value::None;
        };
        let compass = match name {
            "windcompass8" => derived::wind_compass8(direction),
            "windcompass16" => derived::wind_compass16(direction),
            _ => derived::wind_compass32(direction),
        };
        return Value::Text(compass.to_string());
    }

    if name == "feelslike" {
        let inputs = ["windspeedms", "relativehumidity", "temperature"]
            .map(|p| ctx.measurand_id_of(p).map(|mid| default_measurand_value(data, mid)));
        let [Some(wind), Some(rh), Some(temp)] = inputs else {
            return Value::None;
        };
        let (Some(wind), Some(rh), Some(temp)) = (wind.as_f64(), rh.as_f64(), temp.as_f64())
        else {
            return Value::None;
        };
        return Value::Double(derived::feels_like(wind, rh, temp));
    }

    if name == "smartsymbol" {
        let inputs = ["wawa", "totalcloudcover", "temperature"]
            .map(|p| ctx.measurand_id_of(p).map(|mid| default_measurand_value(data, mid)));
        let [Some(wawa), Some(cloudcover), Some(temp)] = inputs else {
            return Value::None;
        };
        let (Some(wawa), Some(cloudcover), Some(temp)) =
            (wawa.as_f64(), cloudcover.as_f64(), temp.as_f64())
        else {
            return Value::None;
        };
        return derived::smart_symbol(
            wawa as i32,
            cloudcover as i32,
            temp,
            obstime,
            station.station.latitude,
            station.station.longitude,
        )
        .map_or(Value::None, Value::Int);
    }

    Value::None
}

/// Assemble the full result for one batch of stations. Columns follow
/// the positions in `qmap`; each station contributes one contiguous row
/// range, all columns share the same timestamps within it.
pub fn build_timeseries(
    ctx: &BuildContext<'_>,
    rows: &[LocationObservation],
    qmap: &QueryMapping,
) -> ObsResult<TimeSeriesVector> {
    let station_data = build_station_data(rows);

    let station_times: BTreeMap<i32, BTreeSet<DateTime<Utc>>> = station_data
        .iter()
        .map(|(fmisid, timed)| (*fmisid, timed.keys().copied().collect()))
        .collect();
    let valid_timesteps = grid::valid_timesteps_per_station(&station_times, ctx.settings);

    let mut columns = initialize_result_vector(ctx.settings.parameters.len());

    for (fmisid, timed_data) in &station_data {
        let Some(station) = ctx.stations.get(fmisid) else {
            continue;
        };
        let Some(timesteps) = valid_timesteps.get(fmisid) else {
            continue;
        };

        // Last emitted value per not-null column, carried into gaps
        let mut carried: BTreeMap<usize, Value> = BTreeMap::new();
        let empty = MeasurandData::new();

        for obstime in timesteps {
            let data = timed_data.get(obstime);

            for (name, pos) in &qmap.timeseries_positions {
                let value = match data {
                    Some(data) => {
                        let measurand_id = qmap
                            .parameter_name_id_map
                            .get(name)
                            .ok_or_else(|| ObsError::InternalIndexing {
                                detail: format!("no measurand id for planned column '{name}'"),
                            })?;
                        data.get(measurand_id).map_or(Value::None, |sensors| {
                            sensor_value(sensors, sensor_suffix(name), DataField::Value)
                        })
                    }
                    None => Value::None,
                };
                columns[*pos].push(TimedValue::new(*obstime, value));
            }

            for (name, pos) in &qmap.special_positions {
                let data_at = data.unwrap_or(&empty);

                let mut value = if special::is_data_source_field(name) {
                    special_field_value(qmap, data_at, name, DataField::DataSource)
                } else if special::is_data_quality_field(name) {
                    special_field_value(qmap, data_at, name, DataField::DataQuality)
                } else if name.starts_with("longitude") || name.starts_with("lon") {
                    default_measurand_value(data_at, LONGITUDE_MEASURAND_ID)
                } else if name.starts_with("latitude") || name.starts_with("lat") {
                    default_measurand_value(data_at, LATITUDE_MEASURAND_ID)
                } else if name.starts_with("elevation") {
                    default_measurand_value(data_at, ELEVATION_MEASURAND_ID)
                } else if special::is_derived(name) {
                    derived_special_value(ctx, name, data_at, station, *obstime)
                } else if special::is_continuous(name) {
                    special::special_value(name, station, ctx.settings, *obstime)
                } else {
                    Value::None
                };

                if value.is_none() && special::is_not_null(name) {
                    if let Some(previous) = carried.get(pos) {
                        value = previous.clone();
                    }
                } else if special::is_not_null(name) {
                    carried.insert(*pos, value.clone());
                }

                columns[*pos].push(TimedValue::new(*obstime, value));
            }
        }
    }

    Ok(columns)
}

/// Flash results have no stations: one output row per stroke in time
/// order, parameters resolved against the flash fields.
#[must_use]
pub fn build_flash_timeseries(settings: &Settings, rows: &[FlashObservation]) -> TimeSeriesVector {
    let mut rows: Vec<&FlashObservation> = rows.iter().collect();
    rows.sort_by_key(|f| (f.stroke_time, f.flash_id));

    let mut columns = initialize_result_vector(settings.parameters.len());

    for flash in rows {
        for (pos, parameter) in settings.parameters.iter().enumerate() {
            let value = match parameter.to_ascii_lowercase().as_str() {
                "longitude" | "lon" => Value::Double(flash.longitude),
                "latitude" | "lat" => Value::Double(flash.latitude),
                "flash_id" => Value::Int(flash.flash_id),
                "multiplicity" => Value::Int(i64::from(flash.multiplicity)),
                "cloud_indicator" => Value::Int(i64::from(flash.cloud_indicator)),
                "peak_current" => flash.peak_current.map_or(Value::None, Value::Double),
                "stroke_time" | "utctime" | "time" | "localtime" => {
                    Value::Time(flash.stroke_time)
                }
                "isotime" => Value::Text(flash.stroke_time.to_rfc3339()),
                "epochtime" => Value::Int(flash.stroke_time.timestamp()),
                _ => Value::None,
            };
            columns[pos].push(TimedValue::new(flash.stroke_time, value));
        }
    }

    columns
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::obs::Observation;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn obs(fmisid: i32, hours: i64, mid: i32, sensor: i32, default_sensor: bool, value: f64) -> LocationObservation {
        LocationObservation {
            obs: Observation {
                fmisid,
                sensor_no: sensor,
                measurand_no: i32::from(default_sensor),
                data_time: t0() + Duration::hours(hours),
                measurand_id: mid,
                data_value: Some(value),
                data_quality: 1,
                data_source: 5,
                producer_id: 1,
                modified_last: t0() + Duration::hours(hours),
            },
            longitude: 25.0,
            latitude: 60.0,
            elevation: 12.0,
        }
    }

    fn station(fmisid: i32) -> QueryStation {
        QueryStation::plain(crate::stations::Station {
            fmisid,
            wmo: None,
            lpnn: None,
            rwsid: None,
            wsi: None,
            station_type: "AWS".to_string(),
            longitude: 25.0,
            latitude: 60.0,
            elevation: 12.0,
            formal_name: format!("S{fmisid}"),
            timezone: "Europe/Helsinki".to_string(),
            country: String::new(),
            iso2: String::new(),
            region: String::new(),
            station_start: t0() - Duration::days(1000),
            station_end: t0() + Duration::days(1000),
            groups: vec!["AWS".to_string()],
        })
    }

    fn parameter_map() -> ParameterMap {
        let mut raw = BTreeMap::new();
        for (name, id) in [
            ("t2m", "4"),
            ("rh", "13"),
            ("winddirection", "2"),
            ("windspeedms", "1"),
            ("relativehumidity", "13"),
            ("temperature", "4"),
        ] {
            let mut by_type = BTreeMap::new();
            by_type.insert("default".to_string(), id.to_string());
            raw.insert(name.to_string(), by_type);
        }
        ParameterMap::new(raw)
    }

    struct Fixture {
        settings: Settings,
        parameter_map: ParameterMap,
        road_foreign: RoadAndForeignIds,
        stations: BTreeMap<i32, QueryStation>,
    }

    impl Fixture {
        fn new(parameters: &[&str]) -> Self {
            let mut settings = Settings::default();
            settings.parameters = parameters.iter().map(|p| (*p).to_string()).collect();
            settings.starttime = t0();
            settings.endtime = t0() + Duration::hours(6);
            let mut stations = BTreeMap::new();
            stations.insert(100, station(100));
            stations.insert(200, station(200));
            Self {
                settings,
                parameter_map: parameter_map(),
                road_foreign: RoadAndForeignIds::new(),
                stations,
            }
        }

        fn ctx(&self) -> BuildContext<'_> {
            BuildContext {
                settings: &self.settings,
                stationtype: "observations_fmi",
                is_qc_table: false,
                parameter_map: &self.parameter_map,
                road_foreign: &self.road_foreign,
                stations: &self.stations,
            }
        }

        fn qmap(&self) -> QueryMapping {
            crate::params::mapping::build_query_mapping(
                &self.settings,
                "observations_fmi",
                false,
                &self.parameter_map,
                &self.road_foreign,
            )
            .unwrap()
        }
    }

    #[test]
    fn columns_match_parameter_count_and_order() {
        let fixture = Fixture::new(&["t2m", "fmisid", "rh"]);
        let rows = vec![
            obs(100, 0, 4, 1, true, -1.5),
            obs(100, 0, 13, 1, true, 80.0),
            obs(100, 1, 4, 1, true, -1.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();

        assert_eq!(columns.len(), 3);
        // Two timesteps for station 100
        assert_eq!(columns[0].len(), 2);
        assert_eq!(columns[0][0].value, Value::Double(-1.5));
        assert_eq!(columns[1][0].value, Value::Int(100));
        // rh missing at the second timestep
        assert_eq!(columns[2][1].value, Value::None);
    }

    #[test]
    fn default_sensor_prefers_flagged_then_smallest() {
        let fixture = Fixture::new(&["t2m"]);
        // Two sensors, neither flagged default: smallest sensor wins
        let rows = vec![
            obs(100, 0, 4, 7, false, 7.0),
            obs(100, 0, 4, 3, false, 3.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Double(3.0));

        // A flagged default sensor wins over a smaller sensor number
        let rows = vec![
            obs(100, 0, 4, 7, true, 7.0),
            obs(100, 0, 4, 3, false, 3.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Double(7.0));
    }

    #[test]
    fn explicit_sensor_is_honored() {
        let fixture = Fixture::new(&["t2m_sensornumber_7"]);
        let rows = vec![
            obs(100, 0, 4, 7, false, 7.0),
            obs(100, 0, 4, 1, true, 1.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Double(7.0));
    }

    #[test]
    fn windcompass_from_direction() {
        let fixture = Fixture::new(&["windcompass8"]);
        let rows = vec![obs(100, 0, 2, 1, true, 45.0)];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Text("NE".to_string()));
    }

    #[test]
    fn feelslike_requires_all_inputs() {
        let fixture = Fixture::new(&["feelslike"]);
        // Only wind and temperature: no humidity, must be None
        let rows = vec![
            obs(100, 0, 1, 1, true, 5.0),
            obs(100, 0, 4, 1, true, -5.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::None);

        // All three inputs present
        let rows = vec![
            obs(100, 1, 1, 1, true, 5.0),
            obs(100, 1, 13, 1, true, 80.0),
            obs(100, 1, 4, 1, true, -5.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        match &columns[0][0].value {
            Value::Double(v) => assert!(*v < -5.0, "wind chill must lower the reading, got {v}"),
            other => panic!("expected a number, got {other:?}"),
        }
    }

    #[test]
    fn observation_position_specials() {
        let fixture = Fixture::new(&["longitude", "latitude", "elevation"]);
        let rows = vec![obs(100, 0, 4, 1, true, 0.0)];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Double(25.0));
        assert_eq!(columns[1][0].value, Value::Double(60.0));
        assert_eq!(columns[2][0].value, Value::Double(12.0));
    }

    #[test]
    fn data_quality_and_source_columns() {
        let fixture = Fixture::new(&["t2m", "qc_t2m", "t2m_data_source_sensornumber_default"]);
        let rows = vec![obs(100, 0, 4, 1, true, -1.5)];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0][0].value, Value::Double(-1.5));
        assert_eq!(columns[1][0].value, Value::Int(1));
        assert_eq!(columns[2][0].value, Value::Int(5));
    }

    #[test]
    fn fixed_grid_fills_gaps_and_carries_identity() {
        let mut fixture = Fixture::new(&["t2m", "fmisid"]);
        fixture.settings.timestep = 60;
        fixture.settings.grid_mode = crate::obs::GridMode::FixedTimes;
        fixture.settings.endtime = t0() + Duration::hours(2);

        // Data only at the first grid point
        let rows = vec![obs(100, 0, 4, 1, true, 1.0)];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();

        assert_eq!(columns[0].len(), 3);
        assert_eq!(columns[0][1].value, Value::None);
        // The identity column stays continuous across the gap
        assert_eq!(columns[1][1].value, Value::Int(100));
        assert_eq!(columns[1][2].value, Value::Int(100));
    }

    #[test]
    fn latest_keeps_single_newest_row() {
        let mut fixture = Fixture::new(&["t2m"]);
        fixture.settings.latest = true;
        let rows = vec![
            obs(100, 0, 4, 1, true, 1.0),
            obs(100, 2, 4, 1, true, 3.0),
            obs(100, 1, 4, 1, true, 2.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        assert_eq!(columns[0].len(), 1);
        assert_eq!(columns[0][0].value, Value::Double(3.0));
    }

    #[test]
    fn stations_contribute_contiguous_ranges() {
        let fixture = Fixture::new(&["fmisid", "t2m"]);
        let rows = vec![
            obs(200, 0, 4, 1, true, 20.0),
            obs(100, 0, 4, 1, true, 10.0),
            obs(100, 1, 4, 1, true, 11.0),
        ];
        let columns = build_timeseries(&fixture.ctx(), &rows, &fixture.qmap()).unwrap();
        let ids: Vec<Value> = columns[0].iter().map(|tv| tv.value.clone()).collect();
        assert_eq!(ids, vec![Value::Int(100), Value::Int(100), Value::Int(200)]);
    }

    #[test]
    fn flash_rows_in_time_order() {
        let mut settings = Settings::default();
        settings.parameters = vec![
            "flash_id".to_string(),
            "longitude".to_string(),
            "multiplicity".to_string(),
        ];
        let flashes = vec![
            FlashObservation {
                flash_id: 2,
                stroke_time: t0() + Duration::minutes(5),
                stroke_time_fraction: 0,
                longitude: 25.5,
                latitude: 61.0,
                multiplicity: 1,
                cloud_indicator: 0,
                peak_current: Some(-12.0),
                modified_last: t0(),
            },
            FlashObservation {
                flash_id: 1,
                stroke_time: t0(),
                stroke_time_fraction: 0,
                longitude: 25.0,
                latitude: 60.5,
                multiplicity: 2,
                cloud_indicator: 0,
                peak_current: Some(30.0),
                modified_last: t0(),
            },
        ];
        let columns = build_flash_timeseries(&settings, &flashes);
        assert_eq!(columns.len(), 3);
        assert_eq!(columns[0][0].value, Value::Int(1));
        assert_eq!(columns[0][1].value, Value::Int(2));
        assert_eq!(columns[1][0].value, Value::Double(25.0));
    }
}
