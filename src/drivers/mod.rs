//! Database drivers: a uniform read interface over the canonical
//! databases and the local caches, plus the proxy that routes each
//! request to the right one.

pub mod container;
pub mod dummy;
pub mod mirror;
pub mod postgres;

pub use container::{DriverContainer, DriverProxy};
pub use dummy::DummyDriver;
pub use mirror::MirrorDriver;
pub use postgres::PostgresDriver;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::cache::CacheTable;
use crate::error::ObsResult;
use crate::obs::{
    FlashObservation, LocationObservation, MobileObservation, Observation, Settings,
};
use crate::params::QueryMapping;
use crate::stations::mobile::MobileStation;
use crate::stations::{QueryStation, Station};

/// Lightning statistics for an interval and area.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct FlashCounts {
    pub flashcount: i64,
    pub strokecount: i64,
    pub iccount: i64,
}

/// A circle of interest for flash counting.
#[derive(Debug, Clone, Copy)]
pub struct FlashArea {
    pub longitude: f64,
    pub latitude: f64,
    /// Kilometers.
    pub radius: f64,
}

/// Coverage metadata served per producer.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProducerMetadata {
    pub starttime: Option<DateTime<Utc>>,
    pub endtime: Option<DateTime<Utc>>,
    /// Nominal timestep of the producer, minutes.
    pub timestep: u32,
}

/// The read contract shared by backend databases and the local caches.
#[async_trait]
pub trait ObservationDriver: Send + Sync {
    fn name(&self) -> &str;

    /// Caches answer only when their window covers the request; backend
    /// databases cover everything.
    fn data_available(&self, table: CacheTable, settings: &Settings) -> bool {
        let _ = (table, settings);
        true
    }

    /// True for the local cache tiers. Requests with `use_data_cache`
    /// off skip these.
    fn is_cache(&self) -> bool {
        false
    }

    async fn read_observations(
        &self,
        table: CacheTable,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<LocationObservation>>;

    async fn read_flash(&self, settings: &Settings) -> ObsResult<Vec<FlashObservation>>;

    async fn read_mobile(
        &self,
        table: CacheTable,
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> ObsResult<Vec<MobileObservation>>;

    async fn get_flash_count(
        &self,
        starttime: DateTime<Utc>,
        endtime: DateTime<Utc>,
        areas: &[FlashArea],
    ) -> ObsResult<FlashCounts>;

    /// Latest `data_time` the driver holds for a table, for the
    /// latest-update endpoint.
    async fn latest_data_time(&self, table: CacheTable) -> ObsResult<Option<DateTime<Utc>>>;

    /// Full time range the driver can serve for a table, for the
    /// metadata endpoint.
    async fn time_coverage(
        &self,
        table: CacheTable,
    ) -> ObsResult<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        Ok(self.latest_data_time(table).await?.map(|end| (end, end)))
    }
}

/// The pull contract the cache admin uses against a canonical backend.
#[async_trait]
pub trait CacheSource: Send + Sync {
    fn name(&self) -> &str;

    /// Rows changed since `since_modified` or observed since
    /// `since_data`, for incremental mirror fills.
    async fn pull_narrow(
        &self,
        table: CacheTable,
        since_modified: Option<DateTime<Utc>>,
        since_data: DateTime<Utc>,
    ) -> ObsResult<Vec<Observation>>;

    async fn pull_flash(
        &self,
        since_modified: Option<DateTime<Utc>>,
        since_stroke: DateTime<Utc>,
    ) -> ObsResult<Vec<FlashObservation>>;

    /// Mobile rows created since the given instant.
    async fn pull_mobile(
        &self,
        table: CacheTable,
        since_created: DateTime<Utc>,
    ) -> ObsResult<Vec<MobileObservation>>;

    /// Whether this backend is the authority for station metadata.
    fn responsible_for_loading_stations(&self) -> bool {
        false
    }

    async fn load_stations(&self) -> ObsResult<Vec<Station>>;

    async fn load_mobile_stations(&self) -> ObsResult<Vec<MobileStation>>;
}
