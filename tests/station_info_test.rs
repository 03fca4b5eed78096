//! Station registry search determinism.

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::BTreeSet;

use metobs_db::stations::{Station, StationInfo};

fn station(fmisid: i32, name: &str, lon: f64, lat: f64) -> Station {
    Station {
        fmisid,
        wmo: None,
        lpnn: None,
        rwsid: None,
        wsi: None,
        station_type: "AWS".to_string(),
        longitude: lon,
        latitude: lat,
        elevation: 0.0,
        formal_name: name.to_string(),
        timezone: "Europe/Helsinki".to_string(),
        country: "Finland".to_string(),
        iso2: "FI".to_string(),
        region: String::new(),
        station_start: Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        station_end: Utc.with_ymd_and_hms(2100, 1, 1, 0, 0, 0).unwrap(),
        groups: vec!["AWS".to_string()],
    }
}

fn interval() -> (DateTime<Utc>, DateTime<Utc>) {
    let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    (start, start + Duration::days(1))
}

/// Three stations share exact coordinates; the k-nearest result must be
/// decided by name, not by insertion order into the spatial index.
#[test]
fn nearest_two_with_ties_is_deterministic() {
    let s1 = station(1, "S1", 24.94, 60.17);
    let s2 = station(2, "S2", 24.94, 60.17);
    let s3 = station(3, "S3", 24.94, 60.17);
    let s4 = station(4, "S4", 24.99, 60.21);

    let orders: Vec<Vec<Station>> = vec![
        vec![s1.clone(), s2.clone(), s3.clone(), s4.clone()],
        vec![s3.clone(), s1.clone(), s4.clone(), s2.clone()],
        vec![s4, s3, s2, s1],
    ];

    let (start, end) = interval();
    for stations in orders {
        let info = StationInfo::new(stations);
        let found =
            info.find_nearest_stations(24.945, 60.175, 50_000.0, 2, &BTreeSet::new(), start, end);
        let names: Vec<&str> = found.iter().map(|qs| qs.station.formal_name.as_str()).collect();
        assert_eq!(names, vec!["S1", "S2"]);
    }
}

#[test]
fn repeated_searches_return_identical_lists() {
    let info = StationInfo::new(vec![
        station(10, "North", 24.9, 60.4),
        station(11, "South", 24.9, 60.0),
        station(12, "Center", 24.9, 60.2),
    ]);
    let (start, end) = interval();

    let first =
        info.find_nearest_stations(24.9, 60.19, 100_000.0, 3, &BTreeSet::new(), start, end);
    for _ in 0..10 {
        let again =
            info.find_nearest_stations(24.9, 60.19, 100_000.0, 3, &BTreeSet::new(), start, end);
        let a: Vec<i32> = first.iter().map(|qs| qs.station.fmisid).collect();
        let b: Vec<i32> = again.iter().map(|qs| qs.station.fmisid).collect();
        assert_eq!(a, b);
    }
}

/// belongsToGroup implies getStation succeeds inside the validity
/// interval.
#[test]
fn group_membership_implies_lookup() {
    let info = StationInfo::new(vec![station(42, "Member", 25.0, 61.0)]);
    let groups = BTreeSet::from(["AWS".to_string()]);
    assert!(info.belongs_to_group(42, &groups));

    let t = Utc.with_ymd_and_hms(2050, 6, 1, 0, 0, 0).unwrap();
    let found = info.get_station(42, &groups, t).unwrap();
    assert_eq!(found.fmisid, 42);
}

#[test]
fn multiple_records_per_fmisid_resolved_by_time() {
    let mut early = station(7, "Old site", 25.0, 60.0);
    early.station_end = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
    let mut late = station(7, "New site", 25.5, 60.5);
    late.station_start = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 1).unwrap();

    let info = StationInfo::new(vec![early, late]);
    let groups = BTreeSet::new();

    let t_old = Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap();
    let t_new = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    assert_eq!(info.get_station(7, &groups, t_old).unwrap().formal_name, "Old site");
    assert_eq!(info.get_station(7, &groups, t_new).unwrap().formal_name, "New site");
}
