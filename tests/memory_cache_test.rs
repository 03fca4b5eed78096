//! In-memory cache behavior under concurrent fill and read.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use metobs_db::cache::ObservationMemoryCache;
use metobs_db::obs::{Observation, Settings};
use metobs_db::params::{DEFAULT_SENSOR_NUMBER, QueryMapping};
use metobs_db::stations::{QueryStation, Station};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap()
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
        latitude: 65.0,
        elevation: 0.0,
        formal_name: format!("Station {fmisid}"),
        timezone: "Europe/Helsinki".to_string(),
        country: String::new(),
        iso2: String::new(),
        region: String::new(),
        station_start: t0() - Duration::days(10_000),
        station_end: t0() + Duration::days(10_000),
        groups: vec!["AWS".to_string()],
    })
}

fn qmap(measurand_count: i32) -> QueryMapping {
    let mut qmap = QueryMapping::default();
    for mid in 0..measurand_count {
        qmap.measurand_ids.push(mid);
        qmap.sensor_number_to_measurand_ids
            .entry(DEFAULT_SENSOR_NUMBER)
            .or_default()
            .insert(mid);
    }
    qmap
}

fn observation(fmisid: i32, datatime: DateTime<Utc>, measurand_id: i32) -> Observation {
    Observation {
        fmisid,
        sensor_no: 1,
        measurand_no: 1,
        data_time: datatime,
        measurand_id,
        data_value: Some(f64::from(measurand_id)),
        data_quality: 1,
        data_source: -1,
        producer_id: 1,
        modified_last: datatime,
    }
}

/// One writer inserts per-station batches while readers scan; every
/// loaded view must be consistent and the final content complete.
#[test]
fn insert_and_find_in_parallel() {
    let cache = Arc::new(ObservationMemoryCache::new());
    let station_count = 200;
    let measurand_count = 10;
    let endtime = t0() + Duration::days(31);

    let stations: Vec<QueryStation> = (0..station_count).map(station).collect();

    let writer_cache = Arc::clone(&cache);
    let fill_thread = std::thread::spawn(move || {
        for fmisid in 0..station_count {
            let mut items = Vec::new();
            let mut datatime = t0();
            while datatime < endtime {
                for measurand_id in 0..measurand_count {
                    items.push(observation(fmisid, datatime, measurand_id));
                }
                datatime += Duration::hours(6);
            }
            writer_cache.fill(&items);
        }
    });

    let mut settings = Settings::default();
    settings.starttime = t0();
    settings.endtime = endtime;
    settings.producer_ids.insert(1);
    let qmap = qmap(measurand_count);

    // Keep reading while the writer works; snapshots must stay
    // time-ordered per station.
    loop {
        let rows = cache.read(&stations, &settings, &qmap);
        let mut previous: Option<(i32, DateTime<Utc>)> = None;
        for row in &rows {
            if let Some((fmisid, time)) = previous {
                if fmisid == row.obs.fmisid {
                    assert!(time <= row.obs.data_time, "rows out of order");
                }
            }
            previous = Some((row.obs.fmisid, row.obs.data_time));
        }
        if fill_thread.is_finished() {
            break;
        }
    }
    fill_thread.join().unwrap();

    let rows = cache.read(&stations, &settings, &qmap);
    assert!(rows.len() > 1000);

    // 31 days at 6 h steps = 124 rows per measurand per station
    let expected = station_count as usize * measurand_count as usize * 124;
    assert_eq!(rows.len(), expected);
}

#[test]
fn fill_read_clean_cycle() {
    let cache = ObservationMemoryCache::new();
    let batch: Vec<Observation> = (0..3)
        .map(|h| observation(100, t0() + Duration::hours(h), 1))
        .collect();

    assert_eq!(cache.fill(&batch), 3);
    assert_eq!(cache.fill(&batch), 0);

    let mut settings = Settings::default();
    settings.starttime = t0();
    settings.endtime = t0() + Duration::hours(2);
    settings.producer_ids.insert(1);

    let rows = cache.read(&[station(100)], &settings, &qmap(2));
    assert_eq!(rows.len(), 3);

    cache.clean(t0() + Duration::hours(1));
    assert_eq!(cache.get_start_time(), Some(t0() + Duration::hours(1)));

    let rows = cache.read(&[station(100)], &settings, &qmap(2));
    let times: Vec<DateTime<Utc>> = rows.iter().map(|r| r.obs.data_time).collect();
    assert_eq!(
        times,
        vec![t0() + Duration::hours(1), t0() + Duration::hours(2)]
    );
}
