//! Row mapping and SQL text for the mirror tables. All statements are
//! generated against the SQLite schema owned by the `migration` crate;
//! inserts go through `INSERT OR IGNORE` keyed by the content hash so
//! filling is idempotent.

use chrono::{DateTime, SecondsFormat, Utc};
use sea_orm::FromQueryResult;

use crate::obs::{FlashObservation, MobileObservation, Observation};

/// Rows per generated INSERT statement.
pub const INSERT_CHUNK: usize = 500;

pub fn time_sql(t: DateTime<Utc>) -> String {
    format!("'{}'", t.to_rfc3339_opts(SecondsFormat::Secs, true))
}

fn float_sql(v: Option<f64>) -> String {
    v.map_or_else(|| "NULL".to_string(), |v| format!("{v}"))
}

fn int_opt_sql(v: Option<i32>) -> String {
    v.map_or_else(|| "NULL".to_string(), |v| v.to_string())
}

fn text_opt_sql(v: Option<&str>) -> String {
    v.map_or_else(
        || "NULL".to_string(),
        |s| format!("'{}'", s.replace('\'', "''")),
    )
}

/// The content hash is stored in SQLite's 64-bit integer column.
fn hash_sql(hash: u64) -> String {
    (hash as i64).to_string()
}

#[derive(Debug, FromQueryResult)]
pub struct NarrowRow {
    pub fmisid: i32,
    pub sensor_no: i32,
    pub measurand_no: i32,
    pub data_time: DateTime<Utc>,
    pub measurand_id: i32,
    pub data_value: Option<f64>,
    pub data_quality: i32,
    pub data_source: i32,
    pub producer_id: i32,
    pub modified_last: DateTime<Utc>,
}

impl NarrowRow {
    #[must_use]
    pub fn into_observation(self) -> Observation {
        Observation {
            fmisid: self.fmisid,
            sensor_no: self.sensor_no,
            measurand_no: self.measurand_no,
            data_time: self.data_time,
            measurand_id: self.measurand_id,
            data_value: self.data_value,
            data_quality: self.data_quality,
            data_source: self.data_source,
            producer_id: self.producer_id,
            modified_last: self.modified_last,
        }
    }
}

#[derive(Debug, FromQueryResult)]
pub struct FlashRow {
    pub flash_id: i64,
    pub stroke_time: DateTime<Utc>,
    pub stroke_time_fraction: i32,
    pub longitude: f64,
    pub latitude: f64,
    pub multiplicity: i32,
    pub cloud_indicator: i32,
    pub peak_current: Option<f64>,
    pub modified_last: DateTime<Utc>,
}

impl FlashRow {
    #[must_use]
    pub fn into_observation(self) -> FlashObservation {
        FlashObservation {
            flash_id: self.flash_id,
            stroke_time: self.stroke_time,
            stroke_time_fraction: self.stroke_time_fraction,
            longitude: self.longitude,
            latitude: self.latitude,
            multiplicity: self.multiplicity,
            cloud_indicator: self.cloud_indicator,
            peak_current: self.peak_current,
            modified_last: self.modified_last,
        }
    }
}

#[derive(Debug, FromQueryResult)]
pub struct MobileRow {
    pub fmisid: Option<i32>,
    pub station_code: Option<String>,
    pub longitude: f64,
    pub latitude: f64,
    pub altitude: Option<f64>,
    pub sensor_no: i32,
    pub measurand_no: i32,
    pub data_time: DateTime<Utc>,
    pub measurand_id: i32,
    pub data_value: Option<f64>,
    pub data_quality: i32,
    pub data_source: i32,
    pub producer_id: i32,
    pub created: DateTime<Utc>,
    pub modified_last: DateTime<Utc>,
}

impl MobileRow {
    #[must_use]
    pub fn into_observation(self) -> MobileObservation {
        MobileObservation {
            fmisid: self.fmisid,
            station_code: self.station_code,
            longitude: self.longitude,
            latitude: self.latitude,
            altitude: self.altitude,
            sensor_no: self.sensor_no,
            measurand_no: self.measurand_no,
            data_time: self.data_time,
            measurand_id: self.measurand_id,
            data_value: self.data_value,
            data_quality: self.data_quality,
            data_source: self.data_source,
            producer_id: self.producer_id,
            created: self.created,
            modified_last: self.modified_last,
        }
    }
}

/// Multi-row idempotent inserts for a narrow table, chunked.
#[must_use]
pub fn narrow_insert_sql(table: &str, rows: &[Observation]) -> Vec<String> {
    rows.chunks(INSERT_CHUNK)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|o| {
                    format!(
                        "({},{},{},{},{},{},{},{},{},{},{})",
                        hash_sql(o.hash_value()),
                        o.fmisid,
                        o.sensor_no,
                        o.measurand_no,
                        time_sql(o.data_time),
                        o.measurand_id,
                        float_sql(o.data_value),
                        o.data_quality,
                        o.data_source,
                        o.producer_id,
                        time_sql(o.modified_last),
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "INSERT OR IGNORE INTO {table} \
                 (hash, fmisid, sensor_no, measurand_no, data_time, measurand_id, \
                  data_value, data_quality, data_source, producer_id, modified_last) \
                 VALUES {values}"
            )
        })
        .collect()
}

#[must_use]
pub fn flash_insert_sql(rows: &[FlashObservation]) -> Vec<String> {
    rows.chunks(INSERT_CHUNK)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|f| {
                    format!(
                        "({},{},{},{},{},{},{},{},{},{})",
                        hash_sql(f.hash_value()),
                        f.flash_id,
                        time_sql(f.stroke_time),
                        f.stroke_time_fraction,
                        f.longitude,
                        f.latitude,
                        f.multiplicity,
                        f.cloud_indicator,
                        float_sql(f.peak_current),
                        time_sql(f.modified_last),
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "INSERT OR IGNORE INTO flash_data \
                 (hash, flash_id, stroke_time, stroke_time_fraction, longitude, latitude, \
                  multiplicity, cloud_indicator, peak_current, modified_last) \
                 VALUES {values}"
            )
        })
        .collect()
}

#[must_use]
pub fn mobile_insert_sql(table: &str, rows: &[MobileObservation]) -> Vec<String> {
    rows.chunks(INSERT_CHUNK)
        .map(|chunk| {
            let values = chunk
                .iter()
                .map(|m| {
                    format!(
                        "({},{},{},{},{},{},{},{},{},{},{},{},{},{},{},{})",
                        hash_sql(m.hash_value()),
                        int_opt_sql(m.fmisid),
                        text_opt_sql(m.station_code.as_deref()),
                        m.longitude,
                        m.latitude,
                        float_sql(m.altitude),
                        m.sensor_no,
                        m.measurand_no,
                        time_sql(m.data_time),
                        m.measurand_id,
                        float_sql(m.data_value),
                        m.data_quality,
                        m.data_source,
                        m.producer_id,
                        time_sql(m.created),
                        time_sql(m.modified_last),
                    )
                })
                .collect::<Vec<_>>()
                .join(",");
            format!(
                "INSERT OR IGNORE INTO {table} \
                 (hash, fmisid, station_code, longitude, latitude, altitude, sensor_no, \
                  measurand_no, data_time, measurand_id, data_value, data_quality, \
                  data_source, producer_id, created, modified_last) \
                 VALUES {values}"
            )
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn obs() -> Observation {
        Observation {
            fmisid: 100,
            sensor_no: 1,
            measurand_no: 1,
            data_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            measurand_id: 4,
            data_value: None,
            data_quality: 1,
            data_source: -1,
            producer_id: 1,
            modified_last: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 30).unwrap(),
        }
    }

    #[test]
    fn narrow_insert_has_null_for_missing_value() {
        let sql = narrow_insert_sql("observation_data", &[obs()]);
        assert_eq!(sql.len(), 1);
        assert!(sql[0].contains("INSERT OR IGNORE INTO observation_data"));
        assert!(sql[0].contains("NULL"));
        assert!(sql[0].contains("'2026-03-01T12:00:00Z'"));
    }

    #[test]
    fn chunking_splits_large_batches() {
        let rows: Vec<Observation> = (0..(INSERT_CHUNK + 1))
            .map(|i| {
                let mut o = obs();
                o.fmisid = i as i32;
                o
            })
            .collect();
        let sql = narrow_insert_sql("observation_data", &rows);
        assert_eq!(sql.len(), 2);
    }

    #[test]
    fn station_code_is_escaped() {
        let row = MobileObservation {
            fmisid: None,
            station_code: Some("o'hara".to_string()),
            longitude: 25.0,
            latitude: 60.0,
            altitude: None,
            sensor_no: 1,
            measurand_no: 1,
            data_time: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            measurand_id: 1,
            data_value: Some(1.0),
            data_quality: 1,
            data_source: -1,
            producer_id: 3,
            created: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            modified_last: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
        };
        let sql = mobile_insert_sql("netatmo_data", &[row]);
        assert!(sql[0].contains("'o''hara'"));
    }
}
