use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::BTreeMap;

/// Error type covering the whole read path. Every variant knows the
/// component it originated in and can render a diagnostics map for logs
/// and error responses.
#[derive(Debug, thiserror::Error)]
pub enum ObsError {
    #[error("Unknown parameter '{name}' for station type '{stationtype}'")]
    UnknownParameter { name: String, stationtype: String },

    #[error("Station {fmisid} not found for groups {groups:?}")]
    StationNotFound { fmisid: i32, groups: Vec<String> },

    #[error("No database driver registered for table '{table}'")]
    NoDriverForTable { table: String },

    #[error("No database driver covers table '{table}' for period {starttime}..{endtime}")]
    NoDriverForPeriod {
        table: String,
        starttime: String,
        endtime: String,
    },

    #[error("No connection available from driver '{driver}': {detail}")]
    NoConnection { driver: String, detail: String },

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Serialization error for '{path}': {detail}")]
    Serialization { path: String, detail: String },

    #[error("Internal indexing error: {detail}")]
    InternalIndexing { detail: String },

    #[error("Shutdown in progress")]
    ShutdownInProgress,

    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,
}

impl ObsError {
    /// The component the error originated in, for log correlation.
    pub fn component(&self) -> &'static str {
        match self {
            Self::UnknownParameter { .. } => "query_planner",
            Self::StationNotFound { .. } => "station_registry",
            Self::NoDriverForTable { .. } | Self::NoDriverForPeriod { .. } => "driver_proxy",
            Self::NoConnection { .. } | Self::Database(_) => "database_driver",
            Self::Configuration(_) => "config",
            Self::Serialization { .. } => "station_store",
            Self::InternalIndexing { .. } => "result_builder",
            Self::ShutdownInProgress => "engine",
            Self::BadRequest(_) | Self::Unauthorized => "api",
        }
    }

    /// Key/value diagnostics attached to the error.
    pub fn diagnostics(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        match self {
            Self::UnknownParameter { name, stationtype } => {
                map.insert("parameter", name.clone());
                map.insert("stationtype", stationtype.clone());
            }
            Self::StationNotFound { fmisid, groups } => {
                map.insert("fmisid", fmisid.to_string());
                map.insert("groups", groups.join(","));
            }
            Self::NoDriverForTable { table } => {
                map.insert("table", table.clone());
            }
            Self::NoDriverForPeriod {
                table,
                starttime,
                endtime,
            } => {
                map.insert("table", table.clone());
                map.insert("starttime", starttime.clone());
                map.insert("endtime", endtime.clone());
            }
            Self::NoConnection { driver, detail } => {
                map.insert("driver", driver.clone());
                map.insert("detail", detail.clone());
            }
            Self::Serialization { path, detail } => {
                map.insert("path", path.clone());
                map.insert("detail", detail.clone());
            }
            Self::InternalIndexing { detail } => {
                map.insert("detail", detail.clone());
            }
            _ => {}
        }
        map
    }

    /// Map a sea-orm error into `NoConnection` when the pool timed out,
    /// otherwise keep it as a database error.
    pub fn from_db(driver: &str, err: sea_orm::DbErr) -> Self {
        if matches!(err, sea_orm::DbErr::ConnectionAcquire(_)) {
            Self::NoConnection {
                driver: driver.to_string(),
                detail: err.to_string(),
            }
        } else {
            Self::Database(err)
        }
    }
}

impl IntoResponse for ObsError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::UnknownParameter { .. }
            | Self::BadRequest(_)
            | Self::NoDriverForPeriod { .. } => StatusCode::BAD_REQUEST,
            Self::StationNotFound { .. } => StatusCode::NOT_FOUND,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NoConnection { .. } | Self::ShutdownInProgress => StatusCode::SERVICE_UNAVAILABLE,
            Self::NoDriverForTable { .. }
            | Self::Configuration(_)
            | Self::Serialization { .. }
            | Self::InternalIndexing { .. }
            | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(
                component = self.component(),
                diagnostics = ?self.diagnostics(),
                "{self}"
            );
        }

        let body = Json(json!({
            "error": self.to_string(),
            "component": self.component(),
            "diagnostics": self.diagnostics(),
        }));

        (status, body).into_response()
    }
}

pub type ObsResult<T> = Result<T, ObsError>;
