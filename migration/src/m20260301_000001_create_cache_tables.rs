use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Narrow observation tables share one shape: one row per
/// (station, time, measurand, sensor) sample, keyed by a content hash so
/// repeated fills are idempotent.
const NARROW_TABLES: &[&str] = &["observation_data", "weather_data_qc", "magnetometer_data"];

/// Mobile tables carry their own coordinates and an external station code.
const MOBILE_TABLES: &[&str] = &[
    "roadcloud_data",
    "netatmo_data",
    "fmi_iot_data",
    "tapsi_qc_data",
];

fn narrow_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            hash          INTEGER NOT NULL PRIMARY KEY,
            fmisid        INTEGER NOT NULL,
            sensor_no     INTEGER NOT NULL,
            measurand_no  INTEGER NOT NULL,
            data_time     TEXT    NOT NULL,
            measurand_id  INTEGER NOT NULL,
            data_value    REAL,
            data_quality  INTEGER NOT NULL,
            data_source   INTEGER NOT NULL DEFAULT -1,
            producer_id   INTEGER NOT NULL,
            modified_last TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_data_time ON {table} (data_time);
        CREATE INDEX IF NOT EXISTS idx_{table}_fmisid_time ON {table} (fmisid, data_time);
        CREATE INDEX IF NOT EXISTS idx_{table}_modified ON {table} (modified_last);"
    )
}

fn mobile_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (
            hash          INTEGER NOT NULL PRIMARY KEY,
            fmisid        INTEGER,
            station_code  TEXT,
            longitude     REAL    NOT NULL,
            latitude      REAL    NOT NULL,
            altitude      REAL,
            sensor_no     INTEGER NOT NULL,
            measurand_no  INTEGER NOT NULL,
            data_time     TEXT    NOT NULL,
            measurand_id  INTEGER NOT NULL,
            data_value    REAL,
            data_quality  INTEGER NOT NULL,
            data_source   INTEGER NOT NULL DEFAULT -1,
            producer_id   INTEGER NOT NULL,
            created       TEXT    NOT NULL,
            modified_last TEXT    NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_{table}_data_time ON {table} (data_time);
        CREATE INDEX IF NOT EXISTS idx_{table}_created ON {table} (created);"
    )
}

const FLASH_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS flash_data (
        hash                 INTEGER NOT NULL PRIMARY KEY,
        flash_id             INTEGER NOT NULL,
        stroke_time          TEXT    NOT NULL,
        stroke_time_fraction INTEGER NOT NULL DEFAULT 0,
        longitude            REAL    NOT NULL,
        latitude             REAL    NOT NULL,
        multiplicity         INTEGER NOT NULL DEFAULT 0,
        cloud_indicator      INTEGER NOT NULL DEFAULT 0,
        peak_current         REAL,
        modified_last        TEXT    NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_flash_data_stroke_time ON flash_data (stroke_time);
    CREATE INDEX IF NOT EXISTS idx_flash_data_modified ON flash_data (modified_last);";

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();

        for table in NARROW_TABLES {
            conn.execute_unprepared(&narrow_table_sql(table)).await?;
        }

        for table in MOBILE_TABLES {
            conn.execute_unprepared(&mobile_table_sql(table)).await?;
        }

        conn.execute_unprepared(FLASH_TABLE_SQL).await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let conn = manager.get_connection();

        for table in NARROW_TABLES.iter().chain(MOBILE_TABLES) {
            conn.execute_unprepared(&format!("DROP TABLE IF EXISTS {table}"))
                .await?;
        }
        conn.execute_unprepared("DROP TABLE IF EXISTS flash_data")
            .await?;

        Ok(())
    }
}
