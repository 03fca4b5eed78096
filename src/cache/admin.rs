//! Periodic updater: one task per mirrored table plus one for station
//! metadata. Each task pulls new rows from the canonical backend into
//! the local caches and trims them to their retention windows. Backend
//! failures are logged and retried on the next period, they never
//! propagate out of the loops.

use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::{CacheStatistics, CacheTable, MirrorCache, ObservationMemoryCache};
use crate::config::CommonInfo;
use crate::drivers::CacheSource;
use crate::error::ObsResult;
use crate::stations::{self, MobileStationRegistry, StationInfo};

pub struct CacheAdmin {
    source: Arc<dyn CacheSource>,
    mirror: Arc<MirrorCache>,
    memory: Arc<ObservationMemoryCache>,
    stats: Arc<CacheStatistics>,
    common: CommonInfo,
    station_info: Arc<ArcSwap<StationInfo>>,
    mobile_registry: Arc<MobileStationRegistry>,
    stations_file: Option<PathBuf>,
    shutdown: CancellationToken,
}

impl CacheAdmin {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        source: Arc<dyn CacheSource>,
        mirror: Arc<MirrorCache>,
        memory: Arc<ObservationMemoryCache>,
        stats: Arc<CacheStatistics>,
        common: CommonInfo,
        station_info: Arc<ArcSwap<StationInfo>>,
        mobile_registry: Arc<MobileStationRegistry>,
        shutdown: CancellationToken,
    ) -> Self {
        let stations_file = common.serialized_stations_file.clone().map(PathBuf::from);
        Self {
            source,
            mirror,
            memory,
            stats,
            common,
            station_info,
            mobile_registry,
            stations_file,
            shutdown,
        }
    }

    fn retention(&self, table: CacheTable) -> Duration {
        let hours = match table {
            CacheTable::ObservationData => self.common.fin_cache_duration_hours,
            CacheTable::WeatherDataQc => self.common.ext_cache_duration_hours,
            CacheTable::FlashData => self.common.flash_cache_duration_hours,
            CacheTable::Magnetometer => self.common.magnetometer_cache_duration_hours,
            _ => self.common.mobile_cache_duration_hours,
        };
        Duration::hours(hours)
    }

    fn update_interval(&self, table: CacheTable) -> std::time::Duration {
        let secs = match table {
            CacheTable::ObservationData => self.common.fin_cache_update_interval_secs,
            CacheTable::WeatherDataQc => self.common.ext_cache_update_interval_secs,
            CacheTable::FlashData => self.common.flash_cache_update_interval_secs,
            CacheTable::RoadCloud => self.common.roadcloud_cache_update_interval_secs,
            CacheTable::NetAtmo => self.common.netatmo_cache_update_interval_secs,
            CacheTable::FmiIoT => self.common.fmi_iot_cache_update_interval_secs,
            CacheTable::TapsiQc => self.common.tapsi_qc_cache_update_interval_secs,
            CacheTable::Magnetometer => self.common.magnetometer_cache_update_interval_secs,
        };
        std::time::Duration::from_secs(secs.max(1))
    }

    /// Spawn every update loop. Fire and forget; the loops stop when
    /// the shutdown token is cancelled.
    pub fn spawn_all(self: &Arc<Self>) {
        if self.common.disable_all_cache_updates {
            tracing::info!("All cache updates disabled by configuration");
            return;
        }

        for table in CacheTable::ALL {
            let admin = Arc::clone(self);
            tokio::spawn(async move { admin.run_table_loop(table).await });
        }

        let admin = Arc::clone(self);
        tokio::spawn(async move { admin.run_stations_loop().await });
    }

    /// Sleep up to `period`, waking early on shutdown. Returns false
    /// when the loop should stop.
    async fn sleep_or_shutdown(&self, period: std::time::Duration) -> bool {
        tokio::select! {
            () = self.shutdown.cancelled() => false,
            () = tokio::time::sleep(period) => true,
        }
    }

    async fn run_table_loop(&self, table: CacheTable) {
        if self.mirror.is_fake(table) {
            tracing::info!(table = %table, "Fake cache, no periodic updates");
            return;
        }

        let interval = self.update_interval(table);
        tracing::info!(table = %table, interval_secs = interval.as_secs(), "Starting cache update loop");

        // Shrink an over-large file left behind by a previous run
        // before the first update.
        if let Err(e) = self.mirror.clean(table, self.retention(table)).await {
            tracing::error!(table = %table, error = %e, "Initial cache clean failed");
        }

        let mut pass: u64 = 0;
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let begin = std::time::Instant::now();
            match self.update_table(table, pass).await {
                Ok(count) => {
                    tracing::info!(
                        table = %table,
                        rows = count,
                        elapsed_ms = begin.elapsed().as_millis() as u64,
                        "Cache update finished"
                    );
                }
                Err(e) => {
                    tracing::error!(table = %table, error = %e, "Cache update failed, retrying next period");
                }
            }
            pass += 1;

            if !self.sleep_or_shutdown(interval).await {
                break;
            }
        }
        tracing::info!(table = %table, "Cache update loop stopped");
    }

    /// One update pass for a table. Returns the number of new rows.
    async fn update_table(&self, table: CacheTable, pass: u64) -> ObsResult<usize> {
        match table {
            CacheTable::FlashData => self.update_flash().await,
            t if t.is_mobile() => self.update_mobile(table, pass).await,
            _ => self.update_narrow(table).await,
        }
    }

    /// Clamp a cache timestamp so clock skew on the canonical side can
    /// not push the pull window into the future.
    fn clamp_to_now(t: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        t.map(|t| t.min(now))
    }

    async fn update_narrow(&self, table: CacheTable) -> ObsResult<usize> {
        let now = Utc::now();
        let retention = self.retention(table);
        let min_t = now - retention;

        let latest_data = Self::clamp_to_now(self.mirror.latest_data_time(table).await?, now);
        let latest_modified =
            Self::clamp_to_now(self.mirror.latest_modified_time(table).await?, now)
                // Safety margin for non-monotonic writes on the canonical side
                .map(|t| t - Duration::seconds(self.common.update_extra_interval as i64));

        let since_data = latest_data.map_or(min_t, |t| t.max(min_t));

        let rows = self.source.pull_narrow(table, latest_modified, since_data).await?;
        let count = self.mirror.fill_narrow(table, &rows).await?;

        self.mirror.clean(table, retention).await?;

        if table == CacheTable::ObservationData {
            let inserted = self.memory.fill(&rows);
            self.stats.record_memory_insert(inserted as u64);
            self.memory
                .clean(now - Duration::hours(self.common.fin_memory_cache_duration_hours));
        }

        Ok(count)
    }

    async fn update_flash(&self) -> ObsResult<usize> {
        let now = Utc::now();
        let retention = self.retention(CacheTable::FlashData);
        let min_t = now - retention;

        let latest_stroke =
            Self::clamp_to_now(self.mirror.latest_data_time(CacheTable::FlashData).await?, now);
        let latest_modified =
            Self::clamp_to_now(self.mirror.latest_modified_time(CacheTable::FlashData).await?, now)
                .map(|t| t - Duration::seconds(self.common.update_extra_interval as i64));

        let since_stroke = latest_stroke.map_or(min_t, |t| t.max(min_t));

        let rows = self.source.pull_flash(latest_modified, since_stroke).await?;
        let count = self.mirror.fill_flash(&rows).await?;
        self.mirror.clean(CacheTable::FlashData, retention).await?;
        Ok(count)
    }

    /// Mobile observations arrive late; every N-th pass widens the
    /// lookback to hours instead of minutes.
    async fn update_mobile(&self, table: CacheTable, pass: u64) -> ObsResult<usize> {
        let now = Utc::now();
        let retention = self.retention(table);
        let min_t = now - retention;

        let latest = Self::clamp_to_now(self.mirror.latest_modified_time(table).await?, now);

        let wide_pass = self.common.update_extra_interval > 0
            && pass % self.common.update_extra_interval == 0;
        let lookback = if wide_pass {
            Duration::hours(3)
        } else {
            Duration::minutes(15)
        };

        let since = latest.map_or(min_t, |t| (t - lookback).max(min_t));

        let rows = self.source.pull_mobile(table, since).await?;
        let count = self.mirror.fill_mobile(table, &rows).await?;
        self.mirror.clean(table, retention).await?;
        Ok(count)
    }

    /// Periodic backend reloads. The serialized snapshot was already
    /// installed at startup, so requests can resolve stations while the
    /// first backend load is still running.
    async fn run_stations_loop(&self) {
        let interval =
            std::time::Duration::from_secs(self.common.stations_cache_update_interval_secs.max(1));

        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            if let Err(e) = self.reload_stations().await {
                tracing::error!(error = %e, "Station reload failed, retrying next period");
            }

            if !self.sleep_or_shutdown(interval).await {
                break;
            }
        }
        tracing::info!("Station update loop stopped");
    }

    /// Load station metadata from the authoritative backend, persist
    /// the snapshot and publish it. Also refreshes the mobile-station
    /// registry.
    pub async fn reload_stations(&self) -> ObsResult<bool> {
        if !self.source.responsible_for_loading_stations() {
            return Ok(false);
        }

        let loaded = self.source.load_stations().await?;
        if loaded.is_empty() {
            tracing::warn!("Backend returned no stations, keeping the current snapshot");
            return Ok(false);
        }

        if let Some(path) = &self.stations_file {
            if let Err(e) = stations::store::save(path, &loaded) {
                tracing::error!(error = %e, "Cannot persist station snapshot");
            }
        }

        let count = loaded.len();
        self.station_info.store(Arc::new(StationInfo::new(loaded)));

        let mobile = self.source.load_mobile_stations().await?;
        if !mobile.is_empty() {
            self.mobile_registry.replace(mobile);
        }

        tracing::info!(stations = count, "Station snapshot reloaded");
        Ok(true)
    }
}
