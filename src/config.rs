use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

/// Top-level configuration, loaded from a hierarchical TOML file whose
/// path comes from the `METOBS_CONFIG` environment variable.
#[derive(Debug, Clone, Deserialize)]
pub struct ObsConfig {
    #[serde(default)]
    pub api: ApiConfig,

    /// Station type name -> groups, producers and backing table.
    #[serde(default)]
    pub stationtypes: BTreeMap<String, StationtypeEntry>,

    /// Parameter name -> station type -> backend column id or name.
    /// The "default" station type is the fallback entry.
    #[serde(default)]
    pub parameters: BTreeMap<String, BTreeMap<String, String>>,

    #[serde(default)]
    pub database_driver_info: DatabaseDriverInfo,

    /// Per-driver cache tuning, keyed by driver name.
    #[serde(default)]
    pub common_info: BTreeMap<String, CommonInfo>,

    /// Per-driver connection settings, keyed by driver name.
    #[serde(default)]
    pub connect_info: BTreeMap<String, ConnectInfo>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub disable_rate_limiting: bool,
    pub rate_limit_metadata_per_second: u64,
    pub rate_limit_metadata_burst: u32,
    pub rate_limit_data_per_second: u64,
    pub rate_limit_data_burst: u32,
    /// Bearer token required by /admin endpoints. None disables them.
    pub admin_token: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            disable_rate_limiting: false,
            rate_limit_metadata_per_second: 1,
            rate_limit_metadata_burst: 60,
            rate_limit_data_per_second: 10,
            rate_limit_data_burst: 60,
            admin_token: None,
        }
    }
}

impl ApiConfig {
    #[must_use]
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationtypeEntry {
    #[serde(default)]
    pub station_groups: Vec<String>,
    #[serde(default)]
    pub producer_ids: Vec<i32>,
    pub database_table: String,
    #[serde(default)]
    pub use_common_query_method: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DatabaseDriverInfo {
    #[serde(default)]
    pub observation_database: Vec<DriverEntry>,
    #[serde(default)]
    pub observation_cache: Vec<DriverEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DriverEntry {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    #[serde(default)]
    pub producers: Vec<String>,
    /// Table name -> max coverage in days; `i32::MAX` means unbounded.
    #[serde(default)]
    pub tables: BTreeMap<String, i32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommonInfo {
    pub pool_size: u32,
    pub connection_timeout_secs: u64,

    pub fin_cache_duration_hours: i64,
    pub fin_memory_cache_duration_hours: i64,
    pub ext_cache_duration_hours: i64,
    pub flash_cache_duration_hours: i64,
    pub mobile_cache_duration_hours: i64,
    pub magnetometer_cache_duration_hours: i64,

    pub fin_cache_update_interval_secs: u64,
    pub ext_cache_update_interval_secs: u64,
    pub flash_cache_update_interval_secs: u64,
    pub roadcloud_cache_update_interval_secs: u64,
    pub netatmo_cache_update_interval_secs: u64,
    pub fmi_iot_cache_update_interval_secs: u64,
    pub tapsi_qc_cache_update_interval_secs: u64,
    pub magnetometer_cache_update_interval_secs: u64,
    pub stations_cache_update_interval_secs: u64,

    /// Safety margin subtracted from the latest modified_last, and the
    /// wide-lookback cadence for mobile tables (every N-th pass).
    pub update_extra_interval: u64,

    pub disable_all_cache_updates: bool,
    pub serialized_stations_file: Option<String>,
    pub spatialite_file: Option<String>,

    /// Static windows per table name. Non-empty turns the table into a
    /// fake cache that never auto-updates.
    pub fake_cache: BTreeMap<String, Vec<FakeCacheWindow>>,
}

impl Default for CommonInfo {
    fn default() -> Self {
        Self {
            pool_size: 10,
            connection_timeout_secs: 30,
            fin_cache_duration_hours: 48,
            fin_memory_cache_duration_hours: 12,
            ext_cache_duration_hours: 24,
            flash_cache_duration_hours: 168,
            mobile_cache_duration_hours: 24,
            magnetometer_cache_duration_hours: 24,
            fin_cache_update_interval_secs: 60,
            ext_cache_update_interval_secs: 120,
            flash_cache_update_interval_secs: 60,
            roadcloud_cache_update_interval_secs: 300,
            netatmo_cache_update_interval_secs: 300,
            fmi_iot_cache_update_interval_secs: 300,
            tapsi_qc_cache_update_interval_secs: 300,
            magnetometer_cache_update_interval_secs: 300,
            stations_cache_update_interval_secs: 3600,
            update_extra_interval: 10,
            disable_all_cache_updates: false,
            serialized_stations_file: None,
            spatialite_file: None,
            fake_cache: BTreeMap::new(),
        }
    }
}

impl CommonInfo {
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.connection_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct FakeCacheWindow {
    pub starttime: chrono::DateTime<chrono::Utc>,
    pub endtime: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConnectInfo {
    pub host: String,
    #[serde(default = "default_pg_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
    /// Queries slower than this many seconds are logged at warn level.
    #[serde(default = "default_slow_query_limit")]
    pub slow_query_limit: u64,
}

impl ConnectInfo {
    #[must_use]
    pub fn url(&self) -> String {
        format!(
            "postgres://{}:{}@{}:{}/{}",
            self.username, self.password, self.host, self.port, self.database
        )
    }
}

fn default_true() -> bool {
    true
}

fn default_pg_port() -> u16 {
    5432
}

fn default_encoding() -> String {
    "UTF8".to_string()
}

fn default_connect_timeout() -> u64 {
    30
}

fn default_slow_query_limit() -> u64 {
    5
}

impl ObsConfig {
    /// Load configuration from the file named by `METOBS_CONFIG`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the variable is unset, the file is
    /// unreadable, or the TOML fails to parse.
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let path =
            std::env::var("METOBS_CONFIG").map_err(|_| ConfigError::Missing("METOBS_CONFIG"))?;
        Self::from_file(&path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e.to_string()))?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, entry) in &self.stationtypes {
            if entry.database_table.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "stationtype '{name}' has an empty database_table"
                )));
            }
        }
        for driver in self.active_database_drivers() {
            if !self.connect_info.contains_key(&driver.name) {
                return Err(ConfigError::Invalid(format!(
                    "driver '{}' has no connect_info block",
                    driver.name
                )));
            }
        }
        Ok(())
    }

    pub fn active_database_drivers(&self) -> impl Iterator<Item = &DriverEntry> {
        self.database_driver_info
            .observation_database
            .iter()
            .filter(|d| d.active)
    }

    pub fn active_cache_drivers(&self) -> impl Iterator<Item = &DriverEntry> {
        self.database_driver_info
            .observation_cache
            .iter()
            .filter(|d| d.active)
    }

    /// Cache tuning for a driver, falling back to defaults when the
    /// driver has no common_info block.
    #[must_use]
    pub fn common_info_for(&self, driver: &str) -> CommonInfo {
        self.common_info.get(driver).cloned().unwrap_or_default()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Cannot read configuration file '{0}': {1}")]
    Io(String, String),
    #[error("Cannot parse configuration: {0}")]
    Parse(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl From<ConfigError> for crate::error::ObsError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [api]
            port = 8080

            [stationtypes.road]
            station_groups = ["RWS", "EXTRWS"]
            producer_ids = [1, 2]
            database_table = "weather_data_qc"

            [[database_driver_info.observation_cache]]
            name = "spatialite_cache"
            tables = { observation_data = 2 }
        "#;
        let config = ObsConfig::from_toml(toml).unwrap();
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.stationtypes["road"].station_groups.len(), 2);
        let caches: Vec<_> = config.active_cache_drivers().collect();
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].tables["observation_data"], 2);
    }

    #[test]
    fn rejects_missing_connect_info() {
        let toml = r#"
            [[database_driver_info.observation_database]]
            name = "postgresql_fmi_observations"
        "#;
        assert!(ObsConfig::from_toml(toml).is_err());
    }

    #[test]
    fn stationtype_requires_table() {
        let toml = r#"
            [stationtypes.broken]
            database_table = ""
        "#;
        assert!(ObsConfig::from_toml(toml).is_err());
    }
}
