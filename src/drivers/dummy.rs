//! A driver that answers every read with an empty result. Registered
//! for all tables when no backend is active, and used as a stub in
//! tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CacheSource, FlashArea, FlashCounts, ObservationDriver};
use crate::cache::CacheTable;
use crate::error::ObsResult;
use crate::obs::{
    FlashObservation, LocationObservation, MobileObservation, Observation, Settings,
};
use crate::params::QueryMapping;
use crate::stations::mobile::MobileStation;
use crate::stations::{QueryStation, Station};

#[derive(Debug, Default)]
pub struct DummyDriver {
    name: String,
}

impl DummyDriver {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

#[async_trait]
impl ObservationDriver for DummyDriver {
    fn name(&self) -> &str {
        &self.name
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

    async fn latest_data_time(&self, _table: CacheTable) -> ObsResult<Option<DateTime<Utc>>> {
        Ok(None)
    }
}

#[async_trait]
impl CacheSource for DummyDriver {
    fn name(&self) -> &str {
        &self.name
    }

    async fn pull_narrow(
        &self,
        _table: CacheTable,
        _since_modified: Option<DateTime<Utc>>,
        _since_data: DateTime<Utc>,
    ) -> ObsResult<Vec<Observation>> {
        Ok(Vec::new())
    }

    async fn pull_flash(
        &self,
        _since_modified: Option<DateTime<Utc>>,
        _since_stroke: DateTime<Utc>,
    ) -> ObsResult<Vec<FlashObservation>> {
        Ok(Vec::new())
    }

    async fn pull_mobile(
        &self,
        _table: CacheTable,
        _since_created: DateTime<Utc>,
    ) -> ObsResult<Vec<MobileObservation>> {
        Ok(Vec::new())
    }

    async fn load_stations(&self) -> ObsResult<Vec<Station>> {
        Ok(Vec::new())
    }

    async fn load_mobile_stations(&self) -> ObsResult<Vec<MobileStation>> {
        Ok(Vec::new())
    }
}
