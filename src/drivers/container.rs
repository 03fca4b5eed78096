//! Table/period routing: each table maps to an ordered list of
//! `(max_days, driver)` pairs and a request resolves to the most
//! specific driver that still covers its start time.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use super::{FlashArea, FlashCounts, ObservationDriver};
use crate::cache::CacheTable;
use crate::error::{ObsError, ObsResult};
use crate::obs::{
    FlashObservation, LocationObservation, MobileObservation, Settings, TaggedFmisid,
};
use crate::params::QueryMapping;
use crate::stations::{QueryStation, StationInfo};

/// Marker for unbounded coverage.
pub const UNBOUNDED_DAYS: i32 = i32::MAX;

/// Routing key under which a fallback driver answers for any table.
pub const ANY_TABLE: &str = "*";

#[derive(Clone)]
struct DriverDays {
    max_days: i32,
    driver: Arc<dyn ObservationDriver>,
}

#[derive(Default)]
pub struct DriverContainer {
    drivers: HashMap<String, Vec<DriverDays>>,
}

impl DriverContainer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_driver(&mut self, table: &str, max_days: i32, driver: Arc<dyn ObservationDriver>) {
        self.drivers
            .entry(table.to_string())
            .or_default()
            .push(DriverDays { max_days, driver });
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    fn sorted_for(&self, table: &str) -> ObsResult<Vec<DriverDays>> {
        let entries = match self.drivers.get(table) {
            Some(entries) => entries,
            None => self
                .drivers
                .get(ANY_TABLE)
                .ok_or_else(|| ObsError::NoDriverForTable {
                    table: table.to_string(),
                })?,
        };
        let mut entries = entries.clone();
        entries.sort_by_key(|e| e.max_days);
        Ok(entries)
    }

    /// Resolve one driver for `(table, [t0, t1])`:
    /// an undefined period picks the shortest horizon, otherwise the
    /// first driver (ascending `max_days`) whose horizon still reaches
    /// back to `t0`.
    pub fn resolve(
        &self,
        table: &str,
        starttime: Option<DateTime<Utc>>,
        endtime: Option<DateTime<Utc>>,
    ) -> ObsResult<Arc<dyn ObservationDriver>> {
        let entries = self.sorted_for(table)?;

        let (Some(starttime), Some(endtime)) = (starttime, endtime) else {
            return entries
                .first()
                .map(|e| Arc::clone(&e.driver))
                .ok_or_else(|| ObsError::NoDriverForTable {
                    table: table.to_string(),
                });
        };

        let now = Utc::now();
        for entry in &entries {
            if entry.max_days == UNBOUNDED_DAYS {
                return Ok(Arc::clone(&entry.driver));
            }
            let horizon_start = now - Duration::days(i64::from(entry.max_days));
            if starttime >= horizon_start {
                return Ok(Arc::clone(&entry.driver));
            }
        }

        Err(ObsError::NoDriverForPeriod {
            table: table.to_string(),
            starttime: starttime.to_rfc3339(),
            endtime: endtime.to_rfc3339(),
        })
    }

    /// All drivers covering the period, most specific first. The proxy
    /// walks these until one reports its data available.
    pub fn candidates(
        &self,
        table: &str,
        starttime: Option<DateTime<Utc>>,
        endtime: Option<DateTime<Utc>>,
    ) -> ObsResult<Vec<Arc<dyn ObservationDriver>>> {
        let entries = self.sorted_for(table)?;

        let (Some(starttime), Some(endtime)) = (starttime, endtime) else {
            return Ok(entries.iter().map(|e| Arc::clone(&e.driver)).collect());
        };

        let now = Utc::now();
        let covering: Vec<Arc<dyn ObservationDriver>> = entries
            .iter()
            .filter(|e| {
                e.max_days == UNBOUNDED_DAYS
                    || starttime >= now - Duration::days(i64::from(e.max_days))
            })
            .map(|e| Arc::clone(&e.driver))
            .collect();

        if covering.is_empty() {
            return Err(ObsError::NoDriverForPeriod {
                table: table.to_string(),
                starttime: starttime.to_rfc3339(),
                endtime: endtime.to_rfc3339(),
            });
        }
        Ok(covering)
    }
}

/// Routes each read to a cache or a backend and owns the cross-driver
/// dispatch duties: station-id translation and flash counting.
pub struct DriverProxy {
    container: DriverContainer,
}

impl DriverProxy {
    #[must_use]
    pub fn new(container: DriverContainer) -> Self {
        Self { container }
    }

    #[must_use]
    pub fn container(&self) -> &DriverContainer {
        &self.container
    }

    /// Walk the covering drivers (most specific first) and read from
    /// the first whose data is available for the request.
    async fn pick(
        &self,
        table: CacheTable,
        settings: &Settings,
    ) -> ObsResult<Arc<dyn ObservationDriver>> {
        let candidates = self.container.candidates(
            table.name(),
            Some(settings.starttime),
            Some(settings.endtime),
        )?;
        let mut fallback = None;
        for driver in candidates {
            if driver.is_cache() && !settings.use_data_cache {
                continue;
            }
            if driver.data_available(table, settings) {
                return Ok(driver);
            }
            fallback = Some(driver);
        }
        fallback.ok_or_else(|| ObsError::NoDriverForPeriod {
            table: table.name().to_string(),
            starttime: settings.starttime.to_rfc3339(),
            endtime: settings.endtime.to_rfc3339(),
        })
    }

    pub async fn read_observations(
        &self,
        table: CacheTable,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>> {
        let driver = self.pick(table, settings).await?;
        tracing::debug!(table = %table, driver = driver.name(), "Routing observation read");
        driver.read_observations(table, stations, settings, qmap).await
    }

    pub async fn read_flash(&self, settings: &Settings) -> ObsResult<Vec<FlashObservation>> {
        let driver = self.pick(CacheTable::FlashData, settings).await?;
        tracing::debug!(driver = driver.name(), "Routing flash read");
        driver.read_flash(settings).await
    }

    pub async fn read_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<MobileObservation>> {
        let driver = self.pick(table, settings).await?;
        tracing::debug!(table = %table, driver = driver.name(), "Routing mobile read");
        driver.read_mobile(table, settings, qmap).await
    }

    pub async fn get_flash_count(
        &self,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
        areas: &[FlashArea],
    ) -> ObsResult<FlashCounts> {
        let driver = self
            .container
            .resolve("flash_data", Some(starttime), Some(endtime))?;
        driver.get_flash_count(starttime, endtime, areas).await
    }

    pub async fn latest_data_time(&self, table: CacheTable) -> ObsResult<Option<DateTime<Utc>>> {
        let driver = self.container.resolve(table.name(), None, None)?;
        driver.latest_data_time(table).await
    }

    /// Coverage metadata comes from the driver with the widest horizon,
    /// not from the short-window caches.
    pub async fn time_coverage(
        &self,
        table: CacheTable,
    ) -> ObsResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        let candidates = self.container.candidates(table.name(), None, None)?;
        match candidates.last() {
            Some(driver) => driver.time_coverage(table).await,
            None => Ok(None),
        }
    }

    /// Translate external station identifiers into tagged fmisids using
    /// the live station registry. The registry is the same authority
    /// every backend consults, so one implementation serves all drivers.
    #[must_use]
    pub fn translate_to_fmisid(
        &self,
        station_info: &StationInfo,
        settings: &Settings,
    ) -> Vec<TaggedFmisid> {
        let reference = settings.endtime;
        let mut tagged = Vec::new();
        tagged.extend(station_info.translate_wmo_to_fmisid(&settings.wmos, reference));
        tagged.extend(station_info.translate_lpnn_to_fmisid(&settings.lpnns, reference));
        tagged.extend(station_info.translate_rwsid_to_fmisid(&settings.rwsids, reference));
        tagged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct NamedDriver(&'static str);

    #[async_trait]
    impl ObservationDriver for NamedDriver {
        fn name(&self) -> &str {
            self.0
        }

        async fn read_observations(
            &self,
            _table: CacheTable,
            _stations: &[QueryStation],
            _settings: &Settings,
            _qmap: &QueryMapping,
        ) -> ObsResult<Vec<LocationObservation>> {
            Ok(Vec::new())
        }

        async fn read_flash(&self, _settings: &Settings) -> ObsResult<Vec<FlashObservation>> {
            Ok(Vec::new())
        }

        async fn read_mobile(
            &self,
            _table: CacheTable,
            _settings: &Settings,
            _qmap: &QueryMapping,
        ) -> ObsResult<Vec<MobileObservation>> {
            Ok(Vec::new())
        }

        async fn get_flash_count(
            &self,
            _starttime: DateTime<Utc>,
            _endtime: DateTime<Utc>,
            _areas: &[FlashArea],
        ) -> ObsResult<FlashCounts> {
            Ok(FlashCounts::default())
        }

        async fn latest_data_time(
            &self,
            _table: CacheTable,
        ) -> ObsResult<Option<DateTime<Utc>>> {
            Ok(None)
        }
    }

    fn container() -> DriverContainer {
        let mut container = DriverContainer::new();
        container.add_driver("observation_data", UNBOUNDED_DAYS, Arc::new(NamedDriver("B")));
        container.add_driver("observation_data", 2, Arc::new(NamedDriver("A")));
        container
    }

    #[test]
    fn recent_period_picks_shortest_horizon() {
        let now = Utc::now();
        let driver = container()
            .resolve("observation_data", Some(now - Duration::days(1)), Some(now))
            .unwrap();
        assert_eq!(driver.name(), "A");
    }

    #[test]
    fn old_period_picks_unbounded() {
        let now = Utc::now();
        let driver = container()
            .resolve("observation_data", Some(now - Duration::days(5)), Some(now))
            .unwrap();
        assert_eq!(driver.name(), "B");
    }

    #[test]
    fn undefined_period_picks_shortest() {
        let driver = container().resolve("observation_data", None, None).unwrap();
        assert_eq!(driver.name(), "A");
    }

    #[test]
    fn missing_table_fails() {
        let err = match container().resolve("no_such_table", None, None) {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, ObsError::NoDriverForTable { .. }));
    }

    #[test]
    fn fallback_any_table_applies() {
        let mut container = DriverContainer::new();
        container.add_driver(ANY_TABLE, UNBOUNDED_DAYS, Arc::new(NamedDriver("D")));
        let driver = container.resolve("whatever", None, None).unwrap();
        assert_eq!(driver.name(), "D");
    }

    #[test]
    fn too_old_period_fails() {
        let mut container = DriverContainer::new();
        container.add_driver("observation_data", 2, Arc::new(NamedDriver("A")));
        let now = Utc::now();
        let err = match container
            .resolve("observation_data", Some(now - Duration::days(10)), Some(now))
        {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(matches!(err, ObsError::NoDriverForPeriod { .. }));
    }

    #[test]
    fn candidates_ordered_most_specific_first() {
        let now = Utc::now();
        let drivers = container()
            .candidates("observation_data", Some(now - Duration::days(1)), Some(now))
            .unwrap();
        let names: Vec<&str> = drivers.iter().map(|d| d.name()).collect();
        assert_eq!(names, vec!["A", "B"]);
    }
}
