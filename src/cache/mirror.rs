//! Local SQLite mirror of a rolling window of the canonical database.
//! One file per process, one table per data kind, each table addressed
//! by its own `{starttime, endtime}` window under a reader-writer lock.

use chrono::{DateTime, Duration, Utc};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection,
    FromQueryResult, Statement,
};
use sea_orm_migration::MigratorTrait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

use super::tables::{self, FlashRow, MobileRow, NarrowRow, time_sql};
use super::{CacheStatistics, CacheTable};
use crate::config::{CommonInfo, FakeCacheWindow};
use crate::error::{ObsError, ObsResult};
use crate::obs::{FlashObservation, LocationObservation, MobileObservation, Observation, Settings};
use crate::params::QueryMapping;
use crate::stations::QueryStation;

type Window = Option<(DateTime<Utc>, DateTime<Utc>)>;

#[derive(Debug, FromQueryResult)]
struct TimeRow {
    t: Option<DateTime<Utc>>,
}

#[derive(Debug, FromQueryResult)]
struct WindowRow {
    min_t: Option<DateTime<Utc>>,
    max_t: Option<DateTime<Utc>>,
}

pub struct MirrorCache {
    db: DatabaseConnection,
    driver_name: String,
    windows: HashMap<CacheTable, RwLock<Window>>,
    fake: HashMap<CacheTable, Vec<FakeCacheWindow>>,
    stats: Arc<CacheStatistics>,
}

impl MirrorCache {
    /// Open (creating if needed) the mirror file and bring its schema up
    /// to date.
    pub async fn open(
        driver_name: &str,
        common: &CommonInfo,
        stats: Arc<CacheStatistics>,
    ) -> ObsResult<Self> {
        let file = common.spatialite_file.as_deref().ok_or_else(|| {
            ObsError::Configuration(format!(
                "cache driver '{driver_name}' has no spatialite_file configured"
            ))
        })?;

        let mut options = ConnectOptions::new(format!("sqlite://{file}?mode=rwc"));
        options
            .max_connections(common.pool_size)
            .acquire_timeout(common.connection_timeout());

        let db = Database::connect(options)
            .await
            .map_err(|e| ObsError::from_db(driver_name, e))?;

        migration::Migrator::up(&db, None)
            .await
            .map_err(|e| ObsError::from_db(driver_name, e))?;

        let fake: HashMap<CacheTable, Vec<FakeCacheWindow>> = common
            .fake_cache
            .iter()
            .filter_map(|(name, windows)| {
                CacheTable::from_name(name).map(|t| (t, windows.clone()))
            })
            .collect();

        let cache = Self {
            db,
            driver_name: driver_name.to_string(),
            windows: CacheTable::ALL
                .into_iter()
                .map(|t| (t, RwLock::new(None)))
                .collect(),
            fake,
            stats,
        };

        for table in CacheTable::ALL {
            cache.refresh_window(table).await?;
        }
        tracing::info!(driver = driver_name, file, "Mirror cache opened");
        Ok(cache)
    }

    #[must_use]
    pub fn driver_name(&self) -> &str {
        &self.driver_name
    }

    #[must_use]
    pub fn is_fake(&self, table: CacheTable) -> bool {
        self.fake.contains_key(&table)
    }

    fn time_column(table: CacheTable) -> &'static str {
        match table {
            CacheTable::FlashData => "stroke_time",
            _ => "data_time",
        }
    }

    fn window_lock(&self, table: CacheTable) -> &RwLock<Window> {
        self.windows.get(&table).expect("all tables have windows")
    }

    /// The currently published `{starttime, endtime}` of a table.
    #[must_use]
    pub fn window(&self, table: CacheTable) -> Window {
        *self.window_lock(table).read().expect("window lock poisoned")
    }

    /// True iff the request interval is covered by this mirror.
    #[must_use]
    pub fn data_available(&self, table: CacheTable, settings: &Settings) -> bool {
        if let Some(windows) = self.fake.get(&table) {
            return windows
                .iter()
                .any(|w| w.starttime <= settings.starttime && settings.endtime <= w.endtime);
        }
        match self.window(table) {
            Some((known_start, _)) => settings.starttime >= known_start,
            None => false,
        }
    }

    async fn query_all(&self, sql: String) -> ObsResult<Vec<sea_orm::QueryResult>> {
        self.db
            .query_all(Statement::from_string(DatabaseBackend::Sqlite, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.driver_name, e))
    }

    async fn execute(&self, sql: String) -> ObsResult<u64> {
        self.db
            .execute(Statement::from_string(DatabaseBackend::Sqlite, sql))
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| ObsError::from_db(&self.driver_name, e))
    }

    /// Re-read the real `{MIN, MAX}` of the table and publish it.
    async fn refresh_window(&self, table: CacheTable) -> ObsResult<()> {
        let column = Self::time_column(table);
        let sql = format!(
            "SELECT MIN({column}) AS min_t, MAX({column}) AS max_t FROM {}",
            table.sql_table()
        );
        let row = self
            .db
            .query_one(Statement::from_string(DatabaseBackend::Sqlite, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.driver_name, e))?;

        let window = row
            .and_then(|r| WindowRow::from_query_result(&r, "").ok())
            .and_then(|w| match (w.min_t, w.max_t) {
                (Some(min), Some(max)) => Some((min, max)),
                _ => None,
            });

        *self.window_lock(table).write().expect("window lock poisoned") = window;
        Ok(())
    }

    async fn max_time(&self, table: CacheTable, column: &str) -> ObsResult<Option<DateTime<Utc>>> {
        let sql = format!("SELECT MAX({column}) AS t FROM {}", table.sql_table());
        let row = self
            .db
            .query_one(Statement::from_string(DatabaseBackend::Sqlite, sql))
            .await
            .map_err(|e| ObsError::from_db(&self.driver_name, e))?;
        Ok(row
            .and_then(|r| TimeRow::from_query_result(&r, "").ok())
            .and_then(|r| r.t))
    }

    /// Latest observation time present, used by the updater to decide
    /// what to pull next.
    pub async fn latest_data_time(&self, table: CacheTable) -> ObsResult<Option<DateTime<Utc>>> {
        self.max_time(table, Self::time_column(table)).await
    }

    pub async fn latest_modified_time(
        &self,
        table: CacheTable,
    ) -> ObsResult<Option<DateTime<Utc>>> {
        self.max_time(table, "modified_last").await
    }

    async fn fill_with(&self, table: CacheTable, statements: Vec<String>) -> ObsResult<usize> {
        let mut inserted = 0_u64;
        for sql in statements {
            inserted += self.execute(sql).await?;
        }
        self.refresh_window(table).await?;
        self.stats.record_mirror_insert(inserted);
        Ok(inserted as usize)
    }

    /// Idempotent upsert of narrow rows; returns how many were new.
    pub async fn fill_narrow(&self, table: CacheTable, rows: &[Observation]) -> ObsResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.fill_with(table, tables::narrow_insert_sql(table.sql_table(), rows))
            .await
    }

    pub async fn fill_flash(&self, rows: &[FlashObservation]) -> ObsResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.fill_with(CacheTable::FlashData, tables::flash_insert_sql(rows))
            .await
    }

    pub async fn fill_mobile(
        &self,
        table: CacheTable,
        rows: &[MobileObservation],
    ) -> ObsResult<usize> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.fill_with(table, tables::mobile_insert_sql(table.sql_table(), rows))
            .await
    }

    /// Delete rows older than `time_to_keep` ago. The published window
    /// start moves forward first so readers stop claiming coverage of
    /// the range while it is being deleted.
    pub async fn clean(&self, table: CacheTable, time_to_keep: Duration) -> ObsResult<()> {
        let now = Utc::now();
        let raw = now - time_to_keep;
        let cutoff = DateTime::<Utc>::from_timestamp(raw.timestamp() - raw.timestamp() % 60, 0)
            .unwrap_or(raw);

        {
            let mut window = self.window_lock(table).write().expect("window lock poisoned");
            if let Some((start, end)) = *window {
                *window = Some((start.max(cutoff), end));
            }
        }

        let column = Self::time_column(table);
        let deleted = self
            .execute(format!(
                "DELETE FROM {} WHERE {column} < {}",
                table.sql_table(),
                time_sql(cutoff)
            ))
            .await?;
        if deleted > 0 {
            tracing::debug!(table = %table, deleted, cutoff = %cutoff, "Mirror cache cleaned");
        }

        self.refresh_window(table).await
    }

    /// Read narrow rows for the given stations, filtered down to the
    /// request's measurands, sensors, data quality and producers.
    pub async fn read_narrow(
        &self,
        table: CacheTable,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>> {
        if stations.is_empty() || qmap.measurand_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_mirror_read();

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
            "SELECT fmisid, sensor_no, measurand_no, data_time, measurand_id, data_value, \
             data_quality, data_source, producer_id, modified_last \
             FROM {} data \
             WHERE data.fmisid IN ({fmisids}) \
             AND data.data_time >= {} AND data.data_time <= {} \
             AND data.measurand_id IN ({mids}){sensor_filter} \
             ORDER BY data.fmisid, data.data_time",
            table.sql_table(),
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
            // The QC side carries no producer ids
            if table != CacheTable::WeatherDataQc && !settings.producer_ok(obs.producer_id) {
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

    /// Flash rows inside the request interval, optionally limited to
    /// the request bounding box.
    pub async fn read_flash(&self, settings: &Settings) -> ObsResult<Vec<FlashObservation>> {
        self.stats.record_mirror_read();

        let bbox_filter = settings.bounding_box.as_ref().map_or_else(String::new, |b| {
            format!(
                " AND longitude >= {} AND longitude <= {} AND latitude >= {} AND latitude <= {}",
                b.min_lon, b.max_lon, b.min_lat, b.max_lat
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

    /// Mobile rows inside the request interval for the wanted
    /// measurands.
    pub async fn read_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<MobileObservation>> {
        if qmap.measurand_ids.is_empty() {
            return Ok(Vec::new());
        }
        self.stats.record_mirror_read();

        let mids = qmap
            .measurand_ids
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");

        let sql = format!(
            "SELECT fmisid, station_code, longitude, latitude, altitude, sensor_no, \
             measurand_no, data_time, measurand_id, data_value, data_quality, data_source, \
             producer_id, created, modified_last \
             FROM {} \
             WHERE data_time >= {} AND data_time <= {} AND measurand_id IN ({mids}) \
             ORDER BY data_time",
            table.sql_table(),
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
}
