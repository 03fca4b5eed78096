//! Lock-free rolling window of the most recent observations.
//!
//! Sharing works through atomic shared pointers on two levels: the map
//! from fmisid to station data, and each station's observation vector.
//! Exactly one writer (the cache admin) calls `fill` and `clean`; any
//! number of readers call `read` concurrently. Published vectors are
//! never mutated afterwards, writers build new ones and swap.
//!
//! On an update the whole map is copied. Tracking whether a new station
//! appeared would save the copy, but the map holds only shared pointers
//! and copying ~1000 entries is cheaper than getting that bookkeeping
//! right. Readers that loaded the old map keep a consistent view until
//! they drop it.

use arc_swap::{ArcSwap, ArcSwapOption};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::obs::{LocationObservation, Observation, Settings};
use crate::params::{DEFAULT_SENSOR_NUMBER, QueryMapping};
use crate::stations::QueryStation;

type StationObservations = Vec<Observation>;
type Observations = HashMap<i32, Arc<ArcSwap<StationObservations>>>;

#[derive(Default)]
pub struct ObservationMemoryCache {
    observations: ArcSwapOption<Observations>,

    /// Oldest time the cache still covers. Set on the first fill, then
    /// maintained by `clean`.
    start_time: ArcSwapOption<DateTime<Utc>>,

    /// Content hashes of every row in the cache. Only the single writer
    /// touches this, the mutex is uncontended by contract.
    hashes: Mutex<HashSet<u64>>,
}

impl ObservationMemoryCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The time of the oldest observation still covered, or None if the
    /// cache has never been filled.
    #[must_use]
    pub fn get_start_time(&self) -> Option<DateTime<Utc>> {
        self.start_time.load_full().map(|t| *t)
    }

    /// Add new observations. Rows whose content hash is already present
    /// are dropped, so repeated fills are idempotent. Returns the number
    /// of rows actually inserted. Single-writer only.
    pub fn fill(&self, cache_data: &[Observation]) -> usize {
        let mut hashes = self.hashes.lock().expect("memory cache hash lock poisoned");

        let mut new_rows: BTreeMap<i32, Vec<&Observation>> = BTreeMap::new();
        let mut new_hashes = HashSet::new();
        for obs in cache_data {
            let hash = obs.hash_value();
            if !hashes.contains(&hash) && new_hashes.insert(hash) {
                new_rows.entry(obs.fmisid).or_default().push(obs);
            }
        }

        if !new_rows.is_empty() {
            // Copy the current map; the per-station pointers are shared
            // with readers of the old map, which is safe since station
            // vectors are replaced, never mutated.
            let mut new_cache: Observations = self
                .observations
                .load_full()
                .map(|map| (*map).clone())
                .unwrap_or_default();

            for (fmisid, rows) in &new_rows {
                let slot = new_cache
                    .entry(*fmisid)
                    .or_insert_with(|| Arc::new(ArcSwap::from_pointee(Vec::new())));

                let current = slot.load_full();
                let mut updated: StationObservations = (*current).clone();
                updated.extend(rows.iter().map(|o| (*o).clone()));
                updated.sort_by_key(|o| o.data_time);
                slot.store(Arc::new(updated));
            }

            self.observations.store(Some(Arc::new(new_cache)));

            for hash in &new_hashes {
                hashes.insert(*hash);
            }
        }

        // First fill establishes the coverage start
        if self.start_time.load().is_none() {
            if let Some(oldest) = cache_data.iter().map(|o| o.data_time).min() {
                self.start_time.store(Some(Arc::new(oldest)));
            }
        }

        new_hashes.len()
    }

    /// Drop all observations older than `new_start_time`. The new start
    /// time is published first so no reader can claim coverage of the
    /// range that is being removed. Single-writer only.
    pub fn clean(&self, new_start_time: DateTime<Utc>) {
        let Some(old_cache) = self.observations.load_full() else {
            return;
        };

        self.start_time.store(Some(Arc::new(new_start_time)));

        let mut hashes = self.hashes.lock().expect("memory cache hash lock poisoned");

        let new_cache: Observations = (*old_cache).clone();
        for slot in new_cache.values() {
            let data = slot.load_full();
            let cut = data.partition_point(|o| o.data_time < new_start_time);
            if cut == 0 {
                continue;
            }
            for obs in &data[..cut] {
                hashes.remove(&obs.hash_value());
            }
            slot.store(Arc::new(data[cut..].to_vec()));
        }

        self.observations.store(Some(Arc::new(new_cache)));
    }

    /// Read matching observations for the given stations. Rows come out
    /// in non-decreasing `data_time` order per station. Safe to call
    /// concurrently with `fill`/`clean`.
    #[must_use]
    pub fn read(
        &self,
        stations: &[QueryStation],
        settings: &Settings,
        qmap: &QueryMapping,
    ) -> Vec<LocationObservation> {
        let mut result = Vec::new();

        let Some(cache) = self.observations.load_full() else {
            return result;
        };

        let valid_sensors: HashSet<i32> = qmap
            .sensor_number_to_measurand_ids
            .keys()
            .copied()
            .collect();
        let default_sensor_ok =
            valid_sensors.is_empty() || valid_sensors.contains(&DEFAULT_SENSOR_NUMBER);

        for station in stations {
            let Some(slot) = cache.get(&station.station.fmisid) else {
                continue;
            };
            let data = slot.load_full();

            let begin = data.partition_point(|o| o.data_time < settings.starttime);

            for obs in &data[begin..] {
                if obs.data_time > settings.endtime {
                    break;
                }
                if !qmap.measurand_ids.contains(&obs.measurand_id) {
                    continue;
                }
                let sensor_ok = (obs.measurand_no == 1 && default_sensor_ok)
                    || valid_sensors.contains(&obs.sensor_no);
                if !sensor_ok {
                    continue;
                }
                if !settings.data_filter.value_ok("data_quality", obs.data_quality) {
                    continue;
                }
                if !settings.producer_ok(obs.producer_id) {
                    continue;
                }

                result.push(LocationObservation {
                    obs: obs.clone(),
                    longitude: station.station.longitude,
                    latitude: station.station.latitude,
                    elevation: station.station.elevation,
                });
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap()
    }

    fn row(fmisid: i32, hours: i64, value: f64) -> Observation {
        Observation {
            fmisid,
            sensor_no: 1,
            measurand_no: 1,
            data_time: t0() + Duration::hours(hours),
            measurand_id: 1,
            data_value: Some(value),
            data_quality: 1,
            data_source: -1,
            producer_id: 1,
            modified_last: t0() + Duration::hours(hours),
        }
    }

    fn test_station(fmisid: i32) -> QueryStation {
        QueryStation::plain(crate::stations::Station {
            fmisid,
            wmo: None,
            lpnn: None,
            rwsid: None,
            wsi: None,
            station_type: "AWS".to_string(),
            longitude: 25.0,
            latitude: 60.0,
            elevation: 5.0,
            formal_name: format!("Station {fmisid}"),
            timezone: "Europe/Helsinki".to_string(),
            country: String::new(),
            iso2: String::new(),
            region: String::new(),
            station_start: t0() - Duration::days(10000),
            station_end: t0() + Duration::days(10000),
            groups: vec!["AWS".to_string()],
        })
    }

    fn qmap() -> QueryMapping {
        let mut qmap = QueryMapping::default();
        qmap.measurand_ids.push(1);
        qmap.sensor_number_to_measurand_ids
            .entry(DEFAULT_SENSOR_NUMBER)
            .or_default()
            .insert(1);
        qmap
    }

    fn settings() -> Settings {
        let mut s = Settings::default();
        s.starttime = t0();
        s.endtime = t0() + Duration::hours(2);
        s.producer_ids.insert(1);
        s
    }

    #[test]
    fn round_trip_preserves_order_and_values() {
        let cache = ObservationMemoryCache::new();
        // Insert out of order; read must come back time-sorted
        let inserted = cache.fill(&[row(100, 2, 12.0), row(100, 0, 10.0), row(100, 1, 11.0)]);
        assert_eq!(inserted, 3);

        let rows = cache.read(&[test_station(100)], &settings(), &qmap());
        let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
        assert_eq!(values, vec![10.0, 11.0, 12.0]);
    }

    #[test]
    fn double_fill_is_idempotent() {
        let cache = ObservationMemoryCache::new();
        let batch = [row(100, 0, 10.0), row(100, 1, 11.0), row(100, 2, 12.0)];
        assert_eq!(cache.fill(&batch), 3);
        assert_eq!(cache.fill(&batch), 0);

        let rows = cache.read(&[test_station(100)], &settings(), &qmap());
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn clean_drops_old_rows_and_publishes_start_time() {
        let cache = ObservationMemoryCache::new();
        cache.fill(&[row(100, 0, 10.0), row(100, 1, 11.0), row(100, 2, 12.0)]);

        cache.clean(t0() + Duration::hours(1));

        assert_eq!(cache.get_start_time(), Some(t0() + Duration::hours(1)));
        let rows = cache.read(&[test_station(100)], &settings(), &qmap());
        let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
        assert_eq!(values, vec![11.0, 12.0]);
    }

    #[test]
    fn changed_row_passes_dedup() {
        let cache = ObservationMemoryCache::new();
        cache.fill(&[row(100, 0, 10.0)]);
        let mut corrected = row(100, 0, 10.0);
        corrected.data_value = Some(10.5);
        assert_eq!(cache.fill(&[corrected]), 1);
    }

    #[test]
    fn start_time_none_before_first_fill() {
        let cache = ObservationMemoryCache::new();
        assert_eq!(cache.get_start_time(), None);
        cache.fill(&[row(100, 3, 1.0), row(100, 1, 2.0)]);
        assert_eq!(cache.get_start_time(), Some(t0() + Duration::hours(1)));
    }

    #[test]
    fn read_filters_producer_and_quality() {
        let cache = ObservationMemoryCache::new();
        let mut foreign = row(100, 0, 1.0);
        foreign.producer_id = 99;
        let mut bad = row(100, 1, 2.0);
        bad.data_quality = 8;
        cache.fill(&[foreign, bad, row(100, 2, 3.0)]);

        let mut s = settings();
        s.data_filter.set("data_quality", "le 2");
        let rows = cache.read(&[test_station(100)], &s, &qmap());
        let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
        assert_eq!(values, vec![3.0]);
    }

    #[test]
    fn read_filters_unrequested_measurands_and_sensors() {
        let cache = ObservationMemoryCache::new();
        let mut other_measurand = row(100, 0, 1.0);
        other_measurand.measurand_id = 7;
        let mut extra_sensor = row(100, 1, 2.0);
        extra_sensor.sensor_no = 5;
        extra_sensor.measurand_no = 2; // not the default sensor
        cache.fill(&[other_measurand, extra_sensor, row(100, 2, 3.0)]);

        let rows = cache.read(&[test_station(100)], &settings(), &qmap());
        let values: Vec<f64> = rows.iter().filter_map(|r| r.obs.data_value).collect();
        assert_eq!(values, vec![3.0]);
    }

    #[test]
    fn concurrent_fill_and_read() {
        let cache = Arc::new(ObservationMemoryCache::new());
        let writer = Arc::clone(&cache);

        let handle = std::thread::spawn(move || {
            for station in 0..50 {
                let batch: Vec<Observation> =
                    (0..20).map(|h| row(station, h % 3, f64::from(station))).collect();
                writer.fill(&batch);
            }
        });

        // Readers race the writer; every loaded snapshot must be
        // internally consistent (sorted, within the window).
        for _ in 0..100 {
            let stations: Vec<QueryStation> = (0..50).map(test_station).collect();
            let rows = cache.read(&stations, &settings(), &qmap());
            let mut last: Option<(i32, DateTime<Utc>)> = None;
            for r in &rows {
                if let Some((fmisid, time)) = last {
                    if fmisid == r.obs.fmisid {
                        assert!(time <= r.obs.data_time);
                    }
                }
                last = Some((r.obs.fmisid, r.obs.data_time));
            }
        }

        handle.join().unwrap();
    }
}
