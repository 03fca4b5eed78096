//! The cache tier exposed through the driver trait. Observation reads
//! try the in-memory window first and fall back to the SQLite mirror;
//! flash and mobile reads go straight to the mirror.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use super::{FlashArea, FlashCounts, ObservationDriver};
use crate::cache::{CacheStatistics, CacheTable, MirrorCache, ObservationMemoryCache};
use crate::error::ObsResult;
use crate::obs::{FlashObservation, LocationObservation, MobileObservation, Settings};
use crate::params::QueryMapping;
use crate::stations::QueryStation;

pub struct MirrorDriver {
    mirror: Arc<MirrorCache>,
    memory: Arc<ObservationMemoryCache>,
    stats: Arc<CacheStatistics>,
}

impl MirrorDriver {
    #[must_use]
    pub fn new(
        mirror: Arc<MirrorCache>,
        memory: Arc<ObservationMemoryCache>,
        stats: Arc<CacheStatistics>,
    ) -> Self {
        Self {
            mirror,
            memory,
            stats,
        }
    }

    /// The memory cache serves the request iff it has been filled and
    /// its window reaches back to the request start.
    fn memory_covers(&self, settings: &Settings) -> bool {
        self.memory
            .get_start_time()
            .is_some_and(|start| settings.starttime >= start)
    }
}

#[async_trait]
impl ObservationDriver for MirrorDriver {
    fn name(&self) -> &str {
        self.mirror.driver_name()
    }

    fn is_cache(&self) -> bool {
        true
    }

    fn data_available(&self, table: CacheTable, settings: &Settings) -> bool {
        if table == CacheTable::ObservationData && self.memory_covers(settings) {
            return true;
        }
        self.mirror.data_available(table, settings)
    }

    async fn read_observations(
        &self,
        table: CacheTable,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>> {
        if table == CacheTable::ObservationData && self.memory_covers(settings) {
            self.stats.record_memory_read();
            return Ok(self.memory.read(stations, settings, qmap));
        }
        self.mirror.read_narrow(table, stations, settings, qmap).await
    }

    async fn read_flash(&self, settings: &Settings) -> ObsResult<Vec<FlashObservation>> {
        self.mirror.read_flash(settings).await
    }

    async fn read_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<MobileObservation>> {
        self.mirror.read_mobile(table, settings, qmap).await
    }

    async fn get_flash_count(
        &self,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
        areas: &[FlashArea],
    ) -> ObsResult<FlashCounts> {
        let mut settings = Settings::default();
        settings.starttime = starttime;
        settings.endtime = endtime;

        let flashes = self.mirror.read_flash(&settings).await?;
        let in_area = |f: &FlashObservation| {
            areas.is_empty()
                || areas.iter().any(|a| {
                    crate::stations::haversine_distance_m(
                        a.longitude,
                        a.latitude,
                        f.longitude,
                        f.latitude,
                    ) <= a.radius * 1000.0
                })
        };

        let mut counts = FlashCounts::default();
        for flash in flashes.iter().filter(|f| in_area(f)) {
            counts.flashcount += 1;
            counts.strokecount += i64::from(flash.multiplicity.max(1));
            if flash.cloud_indicator != 0 {
                counts.iccount += 1;
            }
        }
        Ok(counts)
    }

    async fn latest_data_time(&self, table: CacheTable) -> ObsResult<Option<DateTime<Utc>>> {
        self.mirror.latest_data_time(table).await
    }

    async fn time_coverage(
        &self,
        table: CacheTable,
    ) -> ObsResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        Ok(self.mirror.window(table))
    }
}
