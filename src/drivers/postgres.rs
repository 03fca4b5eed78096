//! Canonical PostgreSQL backend adapter. Shares the fetch contract
//! with the mirror cache and additionally serves the incremental pulls
//! the cache admin runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    FromQueryResult, Statement,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{CacheSource, FlashArea, FlashCounts, ObservationDriver};
use crate::cache::tables::{FlashRow, MobileRow, NarrowRow, time_sql};
use crate::cache::{CacheStatistics, CacheTable};
use crate::config::{CommonInfo, ConnectInfo};
use crate::error::{ObsError, ObsResult};
use crate::obs::{
    FlashObservation, LocationObservation, MobileObservation, Observation, Settings,
};
use crate::params::{QueryMapping, RoadAndForeignIds, roadforeign::MISSING_INTEGER};
use crate::stations::mobile::MobileStation;
use crate::stations::{QueryStation, Station};

#[derive(Debug, FromQueryResult)]
struct TimeRow {
    t: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct CoverageRow {
    min_t: Option<DateTime<Utc>>,
    max_t: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct FlashCountRow {
    flashcount: i64,
    strokecount: i64,
    iccount: i64,
}

#[derive(Debug, FromQueryResult)]
struct StationRow {
    fmisid: i32,
    wmo: Option<i32>,
    lpnn: Option<i32>,
    rwsid: Option<i32>,
    wsi: Option<String>,
    station_type: String,
    longitude: f64,
    latitude: f64,
    elevation: Option<f64>,
    formal_name: String,
    timezone: Option<String>,
    country: Option<String>,
    iso2: Option<String>,
    region: Option<String>,
    station_start: DateTime<Utc>,
    station_end: DateTime<Utc>,
    station_groups: Option<String>,
}

/// The wide/QC table names its measurands with string columns; rows
/// come back with the column name and get translated to the synthetic
/// cache ids.
#[derive(Debug, FromQueryResult)]
struct QcRow {
    fmisid: i32,
    sensor_no: i32,
    data_time: DateTime<Utc>,
    parameter: String,
    data_value: Option<f64>,
    data_quality: i32,
    modified_last: DateTime<Utc>,
}

impl QcRow {
    fn into_observation(self, measurand_id: i32) -> Observation {
        Observation {
            fmisid: self.fmisid,
            sensor_no: self.sensor_no,
            // Sensor 1 is the canonical sensor on the QC side
            measurand_no: i32::from(self.sensor_no == 1),
            data_time: self.data_time,
            measurand_id,
            data_value: self.data_value,
            data_quality: self.data_quality,
            data_source: -1,
            producer_id: 0,
            modified_last: self.modified_last,
        }
    }
}

#[derive(Debug, FromQueryResult)]
struct MobileStationRow {
    station_code: String,
    fmisid: Option<i32>,
    longitude: f64,
    latitude: f64,
    elevation: Option<f64>,
    valid_from: DateTime<Utc>,
    valid_to: DateTime<Utc>,
}

pub struct PostgresDriver {
    name: String,
    db: DatabaseConnection,
    slow_query_limit: Duration,
    loads_stations: bool,
    stats: Arc<CacheStatistics>,
    road_foreign: RoadAndForeignIds,
}

impl PostgresDriver {
    /// Connect with a pool sized and time-bounded from configuration.
    pub async fn connect(
        name: &str,
        connect: &ConnectInfo,
        common: &CommonInfo,
        loads_stations: bool,
        stats: Arc<CacheStatistics>,
    ) -> ObsResult<Self> {
        let mut options = ConnectOptions::new(connect.url());
        options
            .max_connections(common.pool_size)
            .acquire_timeout(common.connection_timeout())
            .connect_timeout(Duration::from_secs(connect.connect_timeout));

        let db = Database::connect(options)
            .await
            .map_err(|e| ObsError::from_db(name, e))?;

        tracing::info!(
            driver = name,
            host = %connect.host,
            database = %connect.database,
            pool_size = common.pool_size,
            "Connected to canonical database"
        );

        Ok(Self {
            name: name.to_string(),
            db,
            slow_query_limit: Duration::from_secs(connect.slow_query_limit),
            loads_stations,
            stats,
            road_foreign: RoadAndForeignIds::new(),
        })
    }

    /// Backend column names wanted by the plan, with the synthetic id
    /// each maps back to.
    fn qc_parameter_ids(qmap: &QueryMapping) -> std::collections::BTreeMap<String, i32> {
        let mut map = std::collections::BTreeMap::new();
        for (name, id) in &qmap.parameter_name_id_map {
            if let Some(column) = qmap.parameter_name_map.get(name) {
                map.insert(column.to_ascii_uppercase(), *id);
            }
        }
        map
    }

    /// Wide/QC read: select by column name strings, translate rows back
    /// to synthetic measurand ids. No producer filter, the QC side has
    /// none.
    async fn read_qc_observations(
        &self,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>> {
        let parameter_ids = Self::qc_parameter_ids(qmap);
        if stations.is_empty() || parameter_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_backend_read();

        let coords: BTreeMap<i32, &QueryStation> =
            stations.iter().map(|s| (s.station.fmisid, s)).collect();
        let fmisids = coords
            .keys()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let columns = parameter_ids
            .keys()
            .map(|n| format!("'{n}'"))
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "SELECT data.station_id AS fmisid, data.sensor_no, data.data_time, \
             data.parameter, data.value AS data_value, data.flag AS data_quality, \
             data.modified_last \
             FROM weather_data_qc data \
             WHERE data.station_id IN ({fmisids}) \
             AND data.data_time >= {} AND data.data_time <= {} \
             AND UPPER(data.parameter) IN ({columns}) \
             ORDER BY data.station_id, data.data_time",
            time_sql(settings.starttime),
            time_sql(settings.endtime),
        );

        let mut result = Vec::new();
        for row in self.query_all(sql).await? {
            let Ok(qc) = QcRow::from_query_result(&row, "") else {
                continue;
            };
            let Some(measurand_id) = parameter_ids.get(&qc.parameter.to_ascii_uppercase()) else {
                continue;
            };
            let obs = qc.into_observation(*measurand_id);
            if !settings.data_filter.value_ok("data_quality", obs.data_quality) {
                continue;
            }
            let Some(station) = coords.get(&obs.fmisid) else {
                continue;
            };
            result.push(LocationObservation {
                obs,
                longitude: station.station.longitude,
                latitude: station.station.latitude,
                elevation: station.station.elevation,
            });
        }
        Ok(result)
    }

    /// QC pull for the mirror: fetch everything changed and translate
    /// every known column name; unknown columns are skipped.
    async fn pull_qc(
        &self,
        since_modified: Option<DateTime<Utc>>,
        since_data: DateTime<Utc>,
    ) -> ObsResult<Vec<Observation>> {
        let condition = match since_modified {
            Some(modified) => format!(
                "data.modified_last >= {} OR data.data_time >= {}",
                time_sql(modified),
                time_sql(since_data)
            ),
            None => format!("data.data_time >= {}", time_sql(since_data)),
        };

        let sql = format!(
            "SELECT data.station_id AS fmisid, data.sensor_no, data.data_time, \
             data.parameter, data.value AS data_value, data.flag AS data_quality, \
             data.modified_last \
             FROM weather_data_qc data \
             WHERE {condition} \
             ORDER BY data.station_id, data.data_time",
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| QcRow::from_query_result(row, "").ok())
            .filter_map(|qc| {
                let id = self.road_foreign.string_to_integer(&qc.parameter);
                (id != MISSING_INTEGER).then(|| qc.into_observation(id))
            })
            .collect())
    }

    /// Backend table for each mirrored kind. The narrow FIN data is
    /// served by a view joining the producer-specific tables.
    fn backend_table(table: CacheTable) -> &'static str {
        match table {
            CacheTable::ObservationData => "observation_data_v1",
            CacheTable::WeatherDataQc => "weather_data_qc",
            CacheTable::FlashData => "flash_data",
            CacheTable::RoadCloud => "roadcloud_data",
            CacheTable::NetAtmo => "netatmo_data",
            CacheTable::FmiIoT => "fmi_iot_data",
            CacheTable::TapsiQc => "tapsi_qc_data",
            CacheTable::Magnetometer => "magnetometer_data",
        }
    }

    async fn query_all(&self, sql: String) -> ObsResult<Vec<sea_orm::QueryResult>> {
        let begin = Instant::now();
        let rows = self
            .db
            .query_all(Statement::from_string(DatabaseBackend::Postgres, sql.clone()))
            .await
            .map_err(|e| ObsError::from_db(&self.name, e))?;
        let elapsed = begin.elapsed();
        if elapsed > self.slow_query_limit {
            tracing::warn!(driver = %self.name, elapsed_ms = elapsed.as_millis() as u64, sql, "Slow query");
        }
        Ok(rows)
    }
}

#[async_trait]
impl ObservationDriver for PostgresDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_observations(
        &self,
        table: CacheTable,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>> {
        if table == CacheTable::WeatherDataQc {
            return self.read_qc_observations(stations, settings, qmap).await;
        }
        if stations.is_empty() || qmap.measurand_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_backend_read();

        let coords: BTreeMap<i32, &QueryStation> =
            stations.iter().map(|s| (s.station.fmisid, s)).collect();
        let fmisids = coords
            .keys()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mids = qmap
            .measurand_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let sensor_filter = qmap
            .sensor_filter_sql()
            .map_or_else(String::new, |clause| format!(" AND {clause}"));

        let sql = format!(
            "SELECT data.station_id AS fmisid, data.sensor_no, data.measurand_no, \
             data.data_time, data.measurand_id, data.data_value, data.data_quality, \
             data.data_source, data.producer_id, data.modified_last \
             FROM {} data \
             WHERE data.station_id IN ({fmisids}) \
             AND data.data_time >= {} AND data.data_time <= {} \
             AND data.measurand_id IN ({mids}){sensor_filter} \
             ORDER BY data.station_id, data.data_time",
            Self::backend_table(table),
            time_sql(settings.starttime),
            time_sql(settings.endtime),
        );

        let mut result = Vec::new();
        for row in self.query_all(sql).await? {
            let Ok(narrow) = NarrowRow::from_query_result(&row, "") else {
                continue;
            };
            let obs = narrow.into_observation();
            if !settings.data_filter.value_ok("data_quality", obs.data_quality) {
                continue;
            }
            if !settings.producer_ok(obs.producer_id) {
                continue;
            }
            let Some(station) = coords.get(&obs.fmisid) else {
                continue;
            };
            result.push(LocationObservation {
                obs,
                longitude: station.station.longitude,
                latitude: station.station.latitude,
                elevation: station.station.elevation,
            });
        }
        Ok(result)
    }

    async fn read_flash(&self, settings: &Settings) -> ObsResult<Vec<FlashObservation>> {
        self.stats.record_backend_read();

        let bbox_filter = settings.bounding_box.as_ref().map_or_else(String::new, |b| {
            format!(
                " AND ST_Within(stroke_location, ST_MakeEnvelope({}, {}, {}, {}, 4326))",
                b.min_lon, b.min_lat, b.max_lon, b.max_lat
            )
        });

        let sql = format!(
            "SELECT flash_id, stroke_time, stroke_time_fraction, longitude, latitude, \
             multiplicity, cloud_indicator, peak_current, modified_last \
             FROM flash_data \
             WHERE stroke_time >= {} AND stroke_time <= {}{bbox_filter} \
             ORDER BY stroke_time",
            time_sql(settings.starttime),
            time_sql(settings.endtime),
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| FlashRow::from_query_result(row, "").ok())
            .map(FlashRow::into_observation)
            .collect())
    }

    async fn read_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<MobileObservation>> {
        if qmap.measurand_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_backend_read();

        let mids = qmap
            .measurand_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "SELECT station_id AS fmisid, station_code, longitude, latitude, altitude, \
             sensor_no, measurand_no, data_time, measurand_id, data_value, data_quality, \
             data_source, producer_id, created, modified_last \
             FROM {} \
             WHERE data_time >= {} AND data_time <= {} AND measurand_id IN ({mids}) \
             ORDER BY data_time",
            Self::backend_table(table),
            time_sql(settings.starttime),
            time_sql(settings.endtime),
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| MobileRow::from_query_result(row, "").ok())
            .map(MobileRow::into_observation)
            .filter(|m| settings.producer_ok(m.producer_id))
            .filter(|m| settings.data_filter.value_ok("data_quality", m.data_quality))
            .collect())
    }

    async fn get_flash_count(
        &self,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
        areas: &[FlashArea],
    ) -> ObsResult<FlashCounts> {
        let area_filter = if areas.is_empty() {
            String::new()
        } else {
            let circles = areas
                .iter()
                .map(|a| {
                    format!(
                        "ST_DistanceSphere(stroke_location, \
                         ST_SetSRID(ST_MakePoint({}, {}), 4326)) <= {}",
                        a.longitude,
                        a.latitude,
                        a.radius * 1000.0
                    )
                })
                .collect::<Vec<_>>()
                .join(" OR ");
            format!(" AND ({circles})")
        };

        let sql = format!(
            "SELECT COUNT(*) AS flashcount, \
             COALESCE(SUM(GREATEST(multiplicity, 1)), 0) AS strokecount, \
             COUNT(*) FILTER (WHERE cloud_indicator <> 0) AS iccount \
             FROM flash_data \
             WHERE stroke_time >= {} AND stroke_time <= {}{area_filter}",
            time_sql(starttime),
            time_sql(endtime),
        );

        let row = self
            .db
            .query_one(Statement::from_string(DatabaseBackend::Postgres, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.name, e))?;

        Ok(row
            .and_then(|r| FlashCountRow::from_query_result(&r, "").ok())
            .map_or_else(FlashCounts::default, |c| FlashCounts {
                flashcount: c.flashcount,
                strokecount: c.strokecount,
                iccount: c.iccount,
            }))
    }

    async fn latest_data_time(&self, table: CacheTable) -> ObsResult<Option<DateTime<Utc>>> {
        let column = match table {
            CacheTable::FlashData => "stroke_time",
            _ => "data_time",
        };
        let sql = format!(
            "SELECT MAX({column}) AS t FROM {}",
            Self::backend_table(table)
        );
        let row = self
            .db
            .query_one(Statement::from_string(DatabaseBackend::Postgres, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.name, e))?;
        Ok(row
            .and_then(|r| TimeRow::from_query_result(&r, "").ok())
            .and_then(|r| r.t))
    }

    async fn time_coverage(
        &self,
        table: CacheTable,
    ) -> ObsResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let column = match table {
            CacheTable::FlashData => "stroke_time",
            _ => "data_time",
        };
        let sql = format!(
            "SELECT MIN({column}) AS min_t, MAX({column}) AS max_t FROM {}",
            Self::backend_table(table)
        );
        let row = self
            .db
            .query_one(Statement::from_string(DatabaseBackend::Postgres, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.name, e))?;
        Ok(row
            .and_then(|r| CoverageRow::from_query_result(&r, "").ok())
            .and_then(|c| match (c.min_t, c.max_t) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => None,
            }))
    }
}

#[async_trait]
impl CacheSource for PostgresDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull_narrow(
        &self,
        table: CacheTable,
        since_modified: Option<DateTime<Utc>>,
        since_data: DateTime<Utc>,
    ) -> ObsResult<Vec<Observation>> {
        if table == CacheTable::WeatherDataQc {
            return self.pull_qc(since_modified, since_data).await;
        }
        let condition = match since_modified {
            Some(modified) => format!(
                "data.modified_last >= {} OR data.data_time >= {}",
                time_sql(modified),
                time_sql(since_data)
            ),
            None => format!("data.data_time >= {}", time_sql(since_data)),
        };

        let sql = format!(
            "SELECT data.station_id AS fmisid, data.sensor_no, data.measurand_no, \
             data.data_time, data.measurand_id, data.data_value, data.data_quality, \
             data.data_source, data.producer_id, data.modified_last \
             FROM {} data \
             WHERE {condition} \
             ORDER BY data.station_id, data.data_time",
            Self::backend_table(table),
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| NarrowRow::from_query_result(row, "").ok())
            .map(NarrowRow::into_observation)
            .collect())
    }

    async fn pull_flash(
        &self,
        since_modified: Option<DateTime<Utc>>,
        since_stroke: DateTime<Utc>,
    ) -> ObsResult<Vec<FlashObservation>> {
        let condition = match since_modified {
            Some(modified) => format!(
                "modified_last >= {} OR stroke_time >= {}",
                time_sql(modified),
                time_sql(since_stroke)
            ),
            None => format!("stroke_time >= {}", time_sql(since_stroke)),
        };

        let sql = format!(
            "SELECT flash_id, stroke_time, stroke_time_fraction, longitude, latitude, \
             multiplicity, cloud_indicator, peak_current, modified_last \
             FROM flash_data WHERE {condition} ORDER BY stroke_time",
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| FlashRow::from_query_result(row, "").ok())
            .map(FlashRow::into_observation)
            .collect())
    }

    async fn pull_mobile(
        &self,
        table: CacheTable,
        since_created: DateTime<Utc>,
    ) -> ObsResult<Vec<MobileObservation>> {
        let sql = format!(
            "SELECT station_id AS fmisid, station_code, longitude, latitude, altitude, \
             sensor_no, measurand_no, data_time, measurand_id, data_value, data_quality, \
             data_source, producer_id, created, modified_last \
             FROM {} WHERE created >= {} ORDER BY created",
            Self::backend_table(table),
            time_sql(since_created),
        );

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| MobileRow::from_query_result(row, "").ok())
            .map(MobileRow::into_observation)
            .collect())
    }

    fn responsible_for_loading_stations(&self) -> bool {
        self.loads_stations
    }

    async fn load_stations(&self) -> ObsResult<Vec<Station>> {
        let sql = "SELECT fmisid, wmo, lpnn, rwsid, wsi, station_type, longitude, latitude, \
                   elevation, formal_name, timezone, country, iso2, region, station_start, \
                   station_end, station_groups \
                   FROM stations_v1 ORDER BY fmisid"
            .to_string();

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| StationRow::from_query_result(row, "").ok())
            .map(|r| Station {
                fmisid: r.fmisid,
                wmo: r.wmo,
                lpnn: r.lpnn,
                rwsid: r.rwsid,
                wsi: r.wsi,
                station_type: r.station_type,
                longitude: r.longitude,
                latitude: r.latitude,
                elevation: r.elevation.unwrap_or_default(),
                formal_name: r.formal_name,
                timezone: r.timezone.unwrap_or_else(|| "UTC".to_string()),
                country: r.country.unwrap_or_default(),
                iso2: r.iso2.unwrap_or_default(),
                region: r.region.unwrap_or_default(),
                station_start: r.station_start,
                station_end: r.station_end,
                groups: r
                    .station_groups
                    .map(|g| {
                        g.split(',')
                            .map(|s| s.trim().to_string())
                            .filter(|s| !s.is_empty())
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect())
    }

    async fn load_mobile_stations(&self) -> ObsResult<Vec<MobileStation>> {
        let sql = "SELECT station_code, fmisid, longitude, latitude, elevation, valid_from, \
                   valid_to FROM fmi_iot_stations ORDER BY station_code"
            .to_string();

        Ok(self
            .query_all(sql)
            .await?
            .iter()
            .filter_map(|row| MobileStationRow::from_query_result(row, "").ok())
            .map(|r| MobileStation {
                station_code: r.station_code,
                fmisid: r.fmisid,
                longitude: r.longitude,
                latitude: r.latitude,
                elevation: r.elevation.unwrap_or_default(),
                valid_from: r.valid_from,
                valid_to: r.valid_to,
            })
            .collect())
    }
}
