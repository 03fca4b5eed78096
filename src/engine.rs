//! The public read API core: validates and strips parameters, resolves
//! stations, routes the fetch through the driver proxy, assembles the
//! result and restores request ordering.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::cache::{CacheStatistics, CacheTable, Counters};
use crate::config::ObsConfig;
use crate::drivers::{DriverProxy, FlashArea, FlashCounts, ProducerMetadata};
use crate::error::{ObsError, ObsResult};
use crate::obs::{LocationObservation, Observation, Settings, TaggedFmisid};
use crate::params::mapping::build_query_mapping;
use crate::params::{
    ParameterMap, QueryMapping, RoadAndForeignIds, StationtypeConfig, base_parameter_name, special,
};
use crate::stations::{MobileStationRegistry, QueryStation, Station, StationInfo};
use crate::timeseries::build::{BuildContext, build_flash_timeseries, build_timeseries};
use crate::timeseries::{TimeSeries, TimeSeriesVector, TimedValue, Value};

type PlanKey = (String, String, bool);

pub struct Engine {
    config: Arc<ObsConfig>,
    parameter_map: Arc<ParameterMap>,
    stationtype_config: StationtypeConfig,
    road_foreign: RoadAndForeignIds,
    station_info: Arc<ArcSwap<StationInfo>>,
    mobile_registry: Arc<MobileStationRegistry>,
    proxy: DriverProxy,
    plan_cache: moka::future::Cache<PlanKey, Arc<QueryMapping>>,
    stats: Arc<CacheStatistics>,
    shutdown: CancellationToken,
}

impl Engine {
    #[must_use]
    pub fn new(
        config: Arc<ObsConfig>,
        station_info: Arc<ArcSwap<StationInfo>>,
        mobile_registry: Arc<MobileStationRegistry>,
        proxy: DriverProxy,
        stats: Arc<CacheStatistics>,
        shutdown: CancellationToken,
    ) -> Self {
        let parameter_map = Arc::new(ParameterMap::new(config.parameters.clone()));
        let stationtype_config = StationtypeConfig::new(config.stationtypes.clone());
        let plan_cache = moka::future::Cache::builder()
            .max_capacity(10_000)
            .time_to_live(std::time::Duration::from_secs(3600))
            .build();
        Self {
            config,
            parameter_map,
            stationtype_config,
            road_foreign: RoadAndForeignIds::new(),
            station_info,
            mobile_registry,
            proxy,
            plan_cache,
            stats,
            shutdown,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ObsConfig {
        &self.config
    }

    #[must_use]
    pub fn station_info(&self) -> Arc<StationInfo> {
        self.station_info.load_full()
    }

    #[must_use]
    pub fn cache_counters(&self) -> Counters {
        self.stats.snapshot()
    }

    /// Producer "fmi" is a deprecated alias.
    fn resolve_stationtype(stationtype: &str) -> String {
        let lower = stationtype.to_ascii_lowercase();
        if lower == "fmi" {
            "observations_fmi".to_string()
        } else {
            lower
        }
    }

    /// True when the parameter is answerable for the station type.
    fn is_known_parameter(&self, name: &str, stationtype: &str) -> bool {
        let lower = name.to_ascii_lowercase();
        // Quality/source synthetics still need a resolvable base name
        if special::is_data_source_field(&lower) || special::is_data_quality_field(&lower) {
            return self
                .parameter_map
                .is_known(&base_parameter_name(name), stationtype);
        }
        if special::is_special(&lower) {
            return true;
        }
        self.parameter_map
            .is_known(&base_parameter_name(name), stationtype)
    }

    /// Drop parameters the producer cannot answer, remembering their
    /// positions so the result can be padded at exactly those columns.
    fn before_query(&self, settings: &Settings, stationtype: &str) -> (Settings, Vec<usize>) {
        let mut query_settings = settings.clone();
        query_settings.parameters.clear();
        let mut unknown = Vec::new();

        for (index, name) in settings.parameters.iter().enumerate() {
            if self.is_known_parameter(name, stationtype) {
                query_settings.parameters.push(name.clone());
            } else {
                tracing::debug!(parameter = %name, stationtype, "Dropping unknown parameter");
                unknown.push(index);
            }
        }
        (query_settings, unknown)
    }

    async fn query_mapping(
        &self,
        settings: &Settings,
        stationtype: &str,
        is_qc_table: bool,
    ) -> ObsResult<Arc<QueryMapping>> {
        let key: PlanKey = (
            stationtype.to_string(),
            settings.parameters.join(","),
            is_qc_table,
        );
        if let Some(plan) = self.plan_cache.get(&key).await {
            return Ok(plan);
        }
        let plan = Arc::new(build_query_mapping(
            settings,
            stationtype,
            is_qc_table,
            &self.parameter_map,
            &self.road_foreign,
        )?);
        self.plan_cache.insert(key, Arc::clone(&plan)).await;
        Ok(plan)
    }

    /// Resolve every station selector into an ordered, deduplicated
    /// station list and the tagged id list that fixes output order.
    fn resolve_stations(
        &self,
        info: &StationInfo,
        settings: &mut Settings,
        groups: &BTreeSet<String>,
    ) -> ObsResult<Vec<QueryStation>> {
        // An explicitly requested station must exist in the registry;
        // being outside its validity period is "no data", not an error.
        for item in &settings.tagged_fmisids {
            if !info.belongs_to_group(item.fmisid, groups) {
                return Err(ObsError::StationNotFound {
                    fmisid: item.fmisid,
                    groups: groups.iter().cloned().collect(),
                });
            }
        }

        let mut tagged = settings.tagged_fmisids.clone();
        tagged.extend(self.proxy.translate_to_fmisid(info, settings));

        let mut stations =
            info.find_fmisid_stations(&tagged, groups, settings.starttime, settings.endtime);

        if let Some(nearest) = settings.nearest {
            for qs in info.find_nearest_stations(
                nearest.longitude,
                nearest.latitude,
                nearest.max_distance,
                nearest.number_of_stations,
                groups,
                settings.starttime,
                settings.endtime,
            ) {
                tagged.push(TaggedFmisid::new(qs.tag.clone(), qs.station.fmisid));
                stations.push(qs);
            }
        }

        if let Some(bbox) = settings.bounding_box {
            for station in
                info.find_stations_inside_box(&bbox, groups, settings.starttime, settings.endtime)
            {
                tagged.push(TaggedFmisid::new(station.fmisid.to_string(), station.fmisid));
                stations.push(QueryStation::plain(station.clone()));
            }
        }

        if let Some(wkt) = settings.wkt_area.clone() {
            for station in
                info.find_stations_inside_area(&wkt, groups, settings.starttime, settings.endtime)?
            {
                tagged.push(TaggedFmisid::new(station.fmisid.to_string(), station.fmisid));
                stations.push(QueryStation::plain(station.clone()));
            }
        }

        let mut seen = BTreeSet::new();
        stations.retain(|s| seen.insert(s.station.fmisid));
        settings.tagged_fmisids = tagged;
        Ok(stations)
    }

    /// The observation read path: §4.J validation, §4.H routing, §4.I
    /// assembly, then row reordering back into request order.
    pub async fn values(&self, settings: Settings) -> ObsResult<TimeSeriesVector> {
        if self.shutdown.is_cancelled() {
            return Err(ObsError::ShutdownInProgress);
        }
        settings.validate()?;

        let stationtype = Self::resolve_stationtype(&settings.stationtype);
        let entry = self.stationtype_config.entry(&stationtype)?;
        let table = CacheTable::from_name(&entry.database_table).ok_or_else(|| {
            ObsError::Configuration(format!(
                "station type '{stationtype}' maps to unknown table '{}'",
                entry.database_table
            ))
        })?;
        let is_qc_table = self.stationtype_config.is_qc_table(&stationtype);

        // Intersect the requested groups with the type's allowed set
        let allowed_groups = self.stationtype_config.group_codes(&stationtype);
        let groups: BTreeSet<String> = if settings.stationgroups.is_empty() {
            allowed_groups
        } else if allowed_groups.is_empty() {
            settings.stationgroups.clone()
        } else {
            settings
                .stationgroups
                .intersection(&allowed_groups)
                .cloned()
                .collect()
        };

        let (mut query_settings, unknown) = self.before_query(&settings, &stationtype);
        if query_settings.parameters.is_empty() {
            // Nothing answerable: all columns are padding
            let mut columns = crate::timeseries::initialize_result_vector(0);
            Self::after_query(&mut columns, &settings, &unknown)?;
            return Ok(columns);
        }

        if query_settings.producer_ids.is_empty() {
            query_settings.producer_ids = self.stationtype_config.producer_ids(&stationtype);
        }

        let qmap = self
            .query_mapping(&query_settings, &stationtype, is_qc_table)
            .await?;

        let info = self.station_info.load_full();

        let mut columns = if table == CacheTable::FlashData {
            let flashes = self.proxy.read_flash(&query_settings).await?;
            build_flash_timeseries(&query_settings, &flashes)
        } else if table.is_mobile() {
            let (rows, stations) = self.fetch_mobile(table, &query_settings, &qmap).await?;
            let ctx = BuildContext {
                settings: &query_settings,
                stationtype: &stationtype,
                is_qc_table,
                parameter_map: &self.parameter_map,
                road_foreign: &self.road_foreign,
                stations: &stations,
            };
            build_timeseries(&ctx, &rows, &qmap)?
        } else {
            let stations = self.resolve_stations(&info, &mut query_settings, &groups)?;
            let rows = self
                .proxy
                .read_observations(table, &stations, &query_settings, &qmap)
                .await?;
            let station_map: BTreeMap<i32, QueryStation> = stations
                .into_iter()
                .map(|s| (s.station.fmisid, s))
                .collect();
            let ctx = BuildContext {
                settings: &query_settings,
                stationtype: &stationtype,
                is_qc_table,
                parameter_map: &self.parameter_map,
                road_foreign: &self.road_foreign,
                stations: &station_map,
            };
            build_timeseries(&ctx, &rows, &qmap)?
        };

        // Reordering uses the expanded station list from resolution
        let mut reorder_settings = settings.clone();
        reorder_settings.tagged_fmisids = query_settings.tagged_fmisids.clone();
        Self::after_query(&mut columns, &reorder_settings, &unknown)?;
        Ok(columns)
    }

    /// Mobile rows resolve their own coordinates; station codes go
    /// through the registry, unresolvable rows are dropped.
    async fn fetch_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<(Vec<LocationObservation>, BTreeMap<i32, QueryStation>)> {
        let mobile_rows = self.proxy.read_mobile(table, settings, qmap).await?;

        let mut rows = Vec::new();
        let mut stations: BTreeMap<i32, QueryStation> = BTreeMap::new();

        for m in mobile_rows {
            let resolved = match (m.fmisid, m.station_code.as_deref()) {
                (Some(fmisid), _) => Some((fmisid, None)),
                (None, Some(code)) => self
                    .mobile_registry
                    .get_station(code, m.data_time)
                    .and_then(|st| st.fmisid.map(|f| (f, Some(st)))),
                (None, None) => None,
            };
            let Some((fmisid, registry_entry)) = resolved else {
                continue;
            };

            let elevation = m
                .altitude
                .or_else(|| registry_entry.as_ref().map(|st| st.elevation))
                .unwrap_or_default();

            stations.entry(fmisid).or_insert_with(|| {
                QueryStation::plain(Station {
                    fmisid,
                    wmo: None,
                    lpnn: None,
                    rwsid: None,
                    wsi: None,
                    station_type: settings.stationtype.clone(),
                    longitude: m.longitude,
                    latitude: m.latitude,
                    elevation,
                    formal_name: m
                        .station_code
                        .clone()
                        .unwrap_or_else(|| fmisid.to_string()),
                    timezone: "UTC".to_string(),
                    country: String::new(),
                    iso2: String::new(),
                    region: String::new(),
                    station_start: DateTime::<Utc>::MIN_UTC,
                    station_end: DateTime::<Utc>::MAX_UTC,
                    groups: Vec::new(),
                })
            });

            rows.push(LocationObservation {
                obs: Observation {
                    fmisid,
                    sensor_no: m.sensor_no,
                    measurand_no: m.measurand_no,
                    data_time: m.data_time,
                    measurand_id: m.measurand_id,
                    data_value: m.data_value,
                    data_quality: m.data_quality,
                    data_source: m.data_source,
                    producer_id: m.producer_id,
                    modified_last: m.modified_last,
                },
                longitude: m.longitude,
                latitude: m.latitude,
                elevation,
            });
        }

        Ok((rows, stations))
    }

    /// Pad all-missing columns at the positions of dropped parameters,
    /// then re-order the concatenated per-station row ranges into the
    /// order of the tagged fmisid list.
    fn after_query(
        columns: &mut TimeSeriesVector,
        settings: &Settings,
        unknown: &[usize],
    ) -> ObsResult<()> {
        if !unknown.is_empty() {
            let template: TimeSeries = columns
                .first()
                .map(|ts| {
                    ts.iter()
                        .map(|tv| TimedValue::new(tv.time, Value::None))
                        .collect()
                })
                .unwrap_or_default();
            for &index in unknown {
                let at = index.min(columns.len());
                columns.insert(at, template.clone());
            }
        }

        let Some(fmisid_index) = settings
            .parameters
            .iter()
            .position(|p| p.eq_ignore_ascii_case("fmisid"))
        else {
            return Ok(());
        };
        if settings.tagged_fmisids.is_empty() || columns.is_empty() {
            return Ok(());
        }

        // Row ranges per fmisid, read from the fmisid column itself
        let fmisid_column = &columns[fmisid_index];
        let mut ranges: BTreeMap<String, (usize, usize)> = BTreeMap::new();
        for (row, tv) in fmisid_column.iter().enumerate() {
            let id = match &tv.value {
                Value::Int(v) => v.to_string(),
                Value::Double(v) => format!("{v}"),
                Value::Text(s) => s.clone(),
                _ => continue,
            };
            let entry = ranges.entry(id).or_insert((row, 0));
            entry.1 += 1;
        }

        let mut result: TimeSeriesVector = vec![Vec::new(); columns.len()];
        for tagged in &settings.tagged_fmisids {
            let Some((first, count)) = ranges.get(&tagged.fmisid.to_string()).copied() else {
                continue;
            };
            for (column_index, column) in columns.iter().enumerate() {
                if first + count > column.len() {
                    return Err(ObsError::InternalIndexing {
                        detail: format!(
                            "fmisid={} first={first} rows={count} column={column_index} len={}",
                            tagged.fmisid,
                            column.len()
                        ),
                    });
                }
                result[column_index].extend_from_slice(&column[first..first + count]);
            }
        }

        *columns = result;
        Ok(())
    }

    // ----- auxiliary listings -----

    /// Producer listing: name, producer ids and station groups.
    #[must_use]
    pub fn producers(&self) -> Vec<(String, Vec<i32>, Vec<String>)> {
        self.stationtype_config
            .stationtypes()
            .map(|name| {
                (
                    name.to_string(),
                    self.stationtype_config.producer_ids(name).into_iter().collect(),
                    self.stationtype_config.group_codes(name).into_iter().collect(),
                )
            })
            .collect()
    }

    /// Parameters answerable for a producer, with their backend ids.
    pub fn parameters_for(&self, producer: &str) -> ObsResult<Vec<(String, String)>> {
        let stationtype = Self::resolve_stationtype(producer);
        self.stationtype_config.entry(&stationtype)?;
        let mut names = self.parameter_map.names_for_stationtype(&stationtype);
        names.sort();
        Ok(names)
    }

    pub async fn metadata_for(&self, producer: &str) -> ObsResult<ProducerMetadata> {
        let stationtype = Self::resolve_stationtype(producer);
        let entry = self.stationtype_config.entry(&stationtype)?;
        let table = CacheTable::from_name(&entry.database_table).ok_or_else(|| {
            ObsError::Configuration(format!("unknown table '{}'", entry.database_table))
        })?;
        let coverage = self.proxy.time_coverage(table).await?;
        Ok(ProducerMetadata {
            starttime: coverage.map(|(start, _)| start),
            endtime: coverage.map(|(_, end)| end),
            timestep: 1,
        })
    }

    pub async fn latest_update_for(&self, producer: &str) -> ObsResult<Option<DateTime<Utc>>> {
        let stationtype = Self::resolve_stationtype(producer);
        let entry = self.stationtype_config.entry(&stationtype)?;
        let table = CacheTable::from_name(&entry.database_table).ok_or_else(|| {
            ObsError::Configuration(format!("unknown table '{}'", entry.database_table))
        })?;
        self.proxy.latest_data_time(table).await
    }

    pub async fn flash_count(
        &self,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
        areas: &[FlashArea],
    ) -> ObsResult<FlashCounts> {
        self.proxy.get_flash_count(starttime, endtime, areas).await
    }
}
