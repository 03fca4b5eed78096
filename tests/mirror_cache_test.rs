//! Mirror cache behavior against a real SQLite file: idempotent fills,
//! window maintenance and trimming.

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use std::sync::Arc;

use metobs_db::cache::{CacheStatistics, CacheTable, MirrorCache};
use metobs_db::config::CommonInfo;
use metobs_db::obs::{Observation, Settings};
use metobs_db::params::{DEFAULT_SENSOR_NUMBER, QueryMapping};
use metobs_db::stations::{QueryStation, Station};

fn now_s() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp(now.timestamp(), 0).unwrap()
}

async fn open_cache(tag: &str) -> (MirrorCache, PathBuf) {
    let path = std::env::temp_dir().join(format!(
        "metobs_mirror_{tag}_{}.sqlite",
        std::process::id()
    ));
    let _ = std::fs::remove_file(&path);

    let mut common = CommonInfo::default();
    common.spatialite_file = Some(path.display().to_string());

    let cache = MirrorCache::open("test_cache", &common, Arc::new(CacheStatistics::default()))
        .await
        .expect("mirror cache must open on a fresh file");
    (cache, path)
}

fn observation(fmisid: i32, data_time: DateTime<Utc>, measurand_id: i32, value: f64) -> Observation {
    Observation {
        fmisid,
        sensor_no: 1,
        measurand_no: 1,
        data_time,
        measurand_id,
        data_value: Some(value),
        data_quality: 1,
        data_source: -1,
        producer_id: 1,
        modified_last: data_time,
    }
}

fn station(fmisid: i32) -> QueryStation {
    QueryStation::plain(Station {
        fmisid,
        wmo: None,
        lpnn: None,
        rwsid: None,
        wsi: None,
        station_type: "AWS".to_string(),
        longitude: 25.0,
        latitude: 60.0,
        elevation: 2.0,
        formal_name: format!("Station {fmisid}"),
        timezone: "Europe/Helsinki".to_string(),
        country: String::new(),
        iso2: String::new(),
        region: String::new(),
        station_start: now_s() - Duration::days(10_000),
        station_end: now_s() + Duration::days(10_000),
        groups: vec!["AWS".to_string()],
    })
}

fn qmap() -> QueryMapping {
    let mut qmap = QueryMapping::default();
    qmap.measurand_ids.push(4);
    qmap.sensor_number_to_measurand_ids
        .entry(DEFAULT_SENSOR_NUMBER)
        .or_default()
        .insert(4);
    qmap
}

#[tokio::test]
async fn fill_is_idempotent_and_publishes_window() {
    let (cache, path) = open_cache("idempotent").await;
    let t = now_s() - Duration::hours(1);
    let rows = vec![
        observation(100, t, 4, 1.0),
        observation(100, t + Duration::minutes(10), 4, 2.0),
        observation(200, t, 4, 3.0),
    ];

    let first = cache
        .fill_narrow(CacheTable::ObservationData, &rows)
        .await
        .unwrap();
    assert_eq!(first, 3);

    let second = cache
        .fill_narrow(CacheTable::ObservationData, &rows)
        .await
        .unwrap();
    assert_eq!(second, 0);

    let window = cache.window(CacheTable::ObservationData).unwrap();
    assert_eq!(window.0, t);
    assert_eq!(window.1, t + Duration::minutes(10));

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn clean_drops_old_rows_and_advances_window() {
    let (cache, path) = open_cache("clean").await;
    let old = now_s() - Duration::hours(3);
    let fresh = now_s() - Duration::hours(1);
    cache
        .fill_narrow(
            CacheTable::ObservationData,
            &[observation(100, old, 4, 1.0), observation(100, fresh, 4, 2.0)],
        )
        .await
        .unwrap();

    cache
        .clean(CacheTable::ObservationData, Duration::hours(2))
        .await
        .unwrap();

    let window = cache.window(CacheTable::ObservationData).unwrap();
    assert_eq!(window.0, fresh);

    let mut settings = Settings::default();
    settings.starttime = now_s() - Duration::hours(4);
    settings.endtime = now_s();
    settings.producer_ids.insert(1);

    let rows = cache
        .read_narrow(CacheTable::ObservationData, &[station(100)], &settings, &qmap())
        .await
        .unwrap();
    let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
    assert_eq!(values, vec![2.0]);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn read_narrow_applies_request_filters() {
    let (cache, path) = open_cache("filters").await;
    let t = now_s() - Duration::hours(1);

    let mut wrong_producer = observation(100, t, 4, 1.0);
    wrong_producer.producer_id = 99;
    let mut bad_quality = observation(100, t + Duration::minutes(1), 4, 2.0);
    bad_quality.data_quality = 9;
    let other_measurand = observation(100, t + Duration::minutes(2), 7, 3.0);
    let good = observation(100, t + Duration::minutes(3), 4, 4.0);

    cache
        .fill_narrow(
            CacheTable::ObservationData,
            &[wrong_producer, bad_quality, other_measurand, good],
        )
        .await
        .unwrap();

    let mut settings = Settings::default();
    settings.starttime = t;
    settings.endtime = now_s();
    settings.producer_ids.insert(1);
    settings.data_filter.set("data_quality", "le 2");

    let rows = cache
        .read_narrow(CacheTable::ObservationData, &[station(100)], &settings, &qmap())
        .await
        .unwrap();
    let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
    assert_eq!(values, vec![4.0]);

    std::fs::remove_file(path).ok();
}

#[tokio::test]
async fn data_available_follows_the_window() {
    let (cache, path) = open_cache("available").await;
    let t = now_s() - Duration::hours(2);

    let mut settings = Settings::default();
    settings.starttime = now_s() - Duration::hours(1);
    settings.endtime = now_s();

    // Nothing mirrored yet
    assert!(!cache.data_available(CacheTable::ObservationData, &settings));

    cache
        .fill_narrow(CacheTable::ObservationData, &[observation(100, t, 4, 1.0)])
        .await
        .unwrap();

    // Request starts inside the window
    assert!(cache.data_available(CacheTable::ObservationData, &settings));

    // Request reaching before the window is not covered
    settings.starttime = now_s() - Duration::hours(5);
    assert!(!cache.data_available(CacheTable::ObservationData, &settings));

    // Other tables are still empty
    assert!(!cache.data_available(CacheTable::NetAtmo, &settings));

    std::fs::remove_file(path).ok();
}
