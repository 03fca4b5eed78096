//! The cache tier: lock-free in-memory window, SQLite mirror and the
//! admin that keeps both filled and trimmed.

pub mod admin;
pub mod memory;
pub mod mirror;
pub mod tables;

pub use memory::ObservationMemoryCache;
pub use mirror::MirrorCache;

use std::sync::RwLock;

/// The mirrored tables. Variant order is also the admin task order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CacheTable {
    ObservationData,
    WeatherDataQc,
    FlashData,
    RoadCloud,
    NetAtmo,
    FmiIoT,
    TapsiQc,
    Magnetometer,
}

impl CacheTable {
    pub const ALL: [Self; 8] = [
        Self::ObservationData,
        Self::WeatherDataQc,
        Self::FlashData,
        Self::RoadCloud,
        Self::NetAtmo,
        Self::FmiIoT,
        Self::TapsiQc,
        Self::Magnetometer,
    ];

    /// The routing key used by configuration and the driver proxy.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::ObservationData => "observation_data",
            Self::WeatherDataQc => "weather_data_qc",
            Self::FlashData => "flash_data",
            Self::RoadCloud => "roadcloud",
            Self::NetAtmo => "netatmo",
            Self::FmiIoT => "fmi_iot",
            Self::TapsiQc => "tapsi_qc",
            Self::Magnetometer => "magnetometer",
        }
    }

    /// The SQL table in the local mirror.
    #[must_use]
    pub fn sql_table(self) -> &'static str {
        match self {
            Self::ObservationData => "observation_data",
            Self::WeatherDataQc => "weather_data_qc",
            Self::FlashData => "flash_data",
            Self::RoadCloud => "roadcloud_data",
            Self::NetAtmo => "netatmo_data",
            Self::FmiIoT => "fmi_iot_data",
            Self::TapsiQc => "tapsi_qc_data",
            Self::Magnetometer => "magnetometer_data",
        }
    }

    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    /// Mobile tables get the alternating wide/narrow update lookback.
    #[must_use]
    pub fn is_mobile(self) -> bool {
        matches!(
            self,
            Self::RoadCloud | Self::NetAtmo | Self::FmiIoT | Self::TapsiQc
        )
    }
}

impl std::fmt::Display for CacheTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Read/write counters published on the health endpoint. Contention is
/// low, a plain reader-writer lock is enough.
#[derive(Debug, Default)]
pub struct CacheStatistics {
    inner: RwLock<Counters>,
}

#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct Counters {
    pub memory_rows_inserted: u64,
    pub mirror_rows_inserted: u64,
    pub memory_reads: u64,
    pub mirror_reads: u64,
    pub backend_reads: u64,
}

impl CacheStatistics {
    pub fn record_memory_insert(&self, rows: u64) {
        self.inner.write().expect("stats lock poisoned").memory_rows_inserted += rows;
    }

    pub fn record_mirror_insert(&self, rows: u64) {
        self.inner.write().expect("stats lock poisoned").mirror_rows_inserted += rows;
    }

    pub fn record_memory_read(&self) {
        self.inner.write().expect("stats lock poisoned").memory_reads += 1;
    }

    pub fn record_mirror_read(&self) {
        self.inner.write().expect("stats lock poisoned").mirror_reads += 1;
    }

    pub fn record_backend_read(&self) {
        self.inner.write().expect("stats lock poisoned").backend_reads += 1;
    }

    #[must_use]
    pub fn snapshot(&self) -> Counters {
        *self.inner.read().expect("stats lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_names_round_trip() {
        for table in CacheTable::ALL {
            assert_eq!(CacheTable::from_name(table.name()), Some(table));
        }
        assert_eq!(CacheTable::from_name("nope"), None);
    }

    #[test]
    fn mobile_classification() {
        assert!(CacheTable::NetAtmo.is_mobile());
        assert!(!CacheTable::ObservationData.is_mobile());
        assert!(!CacheTable::FlashData.is_mobile());
    }
}
